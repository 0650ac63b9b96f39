//! `ProcessRunner` drives one child process from spawn to exit.

use std::path::Path;
use std::process::ExitStatus;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    capture::{clean_line, truncate_text, LineBuffer},
    error::{ExecError, Result},
    launch::build_command,
    types::{ExitKind, ProcessOutcome, RunOptions},
};

/// Longest single output line kept; longer lines are middle-truncated.
const MAX_LINE_CHARS: usize = 4_096;

/// Why the streaming phase stopped before both pipes closed.
enum Interrupt {
    Deadline,
    Shutdown,
}

/// Launches task targets and supervises them until they exit.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    options: RunOptions,
}

impl ProcessRunner {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run `target` to completion.
    ///
    /// Every merged output line is passed to `on_line` as it arrives. The
    /// deadline in [`RunOptions::timeout`] covers the whole run; when it
    /// expires, or `cancel` flips to `true`, the child's process group is
    /// killed and reaped before this returns.
    ///
    /// # Errors
    ///
    /// - `Spawn`: the child could not be started.
    /// - `Io`: waiting for the child failed.
    ///
    /// A non-zero exit, a timeout and a cancellation are reported through
    /// [`ProcessOutcome::exit`], not as errors.
    pub async fn run<F>(
        &self,
        target: &Path,
        mut cancel: watch::Receiver<bool>,
        mut on_line: F,
    ) -> Result<ProcessOutcome>
    where
        F: FnMut(&str) + Send,
    {
        let started = Instant::now();
        let timeout_secs = self.options.timeout.as_secs();

        let mut child = build_command(target, &self.options.interpreters)
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", target.display())))?;
        let pid = child.id();
        info!(pid, target = %target.display(), "child spawned");

        // stdout and stderr feed one channel, so lines interleave in arrival
        // order. The channel closes once both pipes hit EOF.
        let (tx, mut rx) = mpsc::channel::<String>(256);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(stderr, tx.clone())));
        }
        drop(tx);

        let mut capture = LineBuffer::new(self.options.output_max_lines);
        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);

        let interrupt = loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => {
                        info!(target: "hourglass_exec::output", pid, "{line}");
                        on_line(&line);
                        capture.push(line);
                    }
                    None => break None,
                },
                _ = &mut deadline => break Some(Interrupt::Deadline),
                _ = cancelled(&mut cancel) => break Some(Interrupt::Shutdown),
            }
        };

        let exit = match interrupt {
            None => {
                tokio::select! {
                    status = child.wait() => exit_kind(status?),
                    _ = &mut deadline => {
                        kill_tree(&mut child, pid).await;
                        ExitKind::TimedOut { secs: timeout_secs }
                    }
                    _ = cancelled(&mut cancel) => {
                        kill_tree(&mut child, pid).await;
                        ExitKind::Cancelled
                    }
                }
            }
            Some(Interrupt::Deadline) => {
                kill_tree(&mut child, pid).await;
                ExitKind::TimedOut { secs: timeout_secs }
            }
            Some(Interrupt::Shutdown) => {
                kill_tree(&mut child, pid).await;
                ExitKind::Cancelled
            }
        };

        for reader in readers {
            reader.abort();
        }
        // Lines already queued when the child was killed still belong to
        // this run.
        while let Ok(line) = rx.try_recv() {
            on_line(&line);
            capture.push(line);
        }

        match &exit {
            ExitKind::TimedOut { secs } => warn!(pid, secs, "child killed after deadline"),
            ExitKind::Cancelled => warn!(pid, "child killed on shutdown"),
            other => debug!(pid, exit = ?other, "child exited"),
        }

        let total_lines = capture.seen();
        Ok(ProcessOutcome {
            exit,
            output: capture.into_lines(),
            total_lines,
            pid,
            elapsed: started.elapsed(),
        })
    }
}

fn exit_kind(status: ExitStatus) -> ExitKind {
    match status.code() {
        Some(code) => ExitKind::Exited { code },
        None => ExitKind::Signalled,
    }
}

/// Resolves once `cancel` reads `true`. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Read `reader` line by line into `tx`, dropping blank lines.
async fn pump_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = clean_line(&buf);
                if line.trim().is_empty() {
                    continue;
                }
                let line = truncate_text(&line, MAX_LINE_CHARS);
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("output pipe read failed: {e}");
                break;
            }
        }
    }
}

/// SIGKILL the child's process group, then kill and reap the child itself.
async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(raw_pid) = pid {
        // Safety: the child was spawned with process_group(0), so its pid is
        // also its process group id and nothing else lives in that group.
        unsafe {
            libc::killpg(raw_pid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        debug!("kill after group kill failed (child already gone?): {e}");
    }
}
