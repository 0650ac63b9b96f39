//! One execution of one task, from launch to history record.

use std::sync::Arc;
use std::time::Duration;

use hourglass_core::{Clock, HourglassConfig};
use hourglass_exec::{
    capture::truncate_text, types::EXIT_CODE_SENTINEL, ExitKind, ProcessRunner, RunOptions,
    SelfGuard,
};
use hourglass_history::{ExecutionRecord, HistoryRecorder};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    events::{EventBus, TaskEvents},
    retry::{self, RetryDecision},
    store::TaskStore,
    types::{Task, TaskStatus},
};

/// How a finished run is booked.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Success,
    /// Failed; the retry policy applies.
    Retryable(String),
    /// Failed; the retry path is skipped.
    Terminal(String),
}

/// Puts a task back to idle and persists the store when dropped, so a
/// panicking or aborted worker never leaves its task stuck in `running`.
struct RunningGuard {
    store: Arc<TaskStore>,
    task_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let reset = self.store.modify(&self.task_id, |t| {
            if t.status == TaskStatus::Running {
                t.status = TaskStatus::Idle;
            }
        });
        if reset.is_err() {
            // removed while running
            debug!(task_id = %self.task_id, "finished task no longer in store");
        }
        if let Err(e) = self.store.persist() {
            error!(task_id = %self.task_id, "persisting after run failed: {e}");
        }
    }
}

/// Executes tasks and books their outcome.
pub struct TaskWorker {
    store: Arc<TaskStore>,
    history: Arc<HistoryRecorder>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    runner: ProcessRunner,
    guard: SelfGuard,
    retry_on_timeout: bool,
    error_max_chars: usize,
}

impl TaskWorker {
    pub fn new(
        store: Arc<TaskStore>,
        history: Arc<HistoryRecorder>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: &HourglassConfig,
    ) -> Self {
        let runner = ProcessRunner::new(RunOptions {
            timeout: Duration::from_secs(config.scheduler.max_task_timeout_secs),
            output_max_lines: config.exec.output_max_lines,
            interpreters: config.exec.interpreters.clone(),
        });
        Self {
            store,
            history,
            events,
            clock,
            runner,
            guard: SelfGuard::current(),
            retry_on_timeout: config.scheduler.retry_on_timeout,
            error_max_chars: config.exec.error_max_chars,
        }
    }

    /// Replace the guard used to reject the scheduler's own executable.
    pub fn with_self_guard(mut self, guard: SelfGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `task` once and book the outcome.
    ///
    /// Counters, retry state and `last_error` are updated on the stored task,
    /// one [`ExecutionRecord`] is written to history, and the task ends idle
    /// with the store persisted whatever happens. Returns `None` when the run
    /// was refused before launch (self-invocation, task removed).
    pub async fn execute(&self, task: Task, cancel: watch::Receiver<bool>) -> Option<ExecutionRecord> {
        let _running = RunningGuard {
            store: Arc::clone(&self.store),
            task_id: task.id.clone(),
        };

        if self.guard.is_self(&task.path) {
            warn!(task_id = %task.id, path = %task.path.display(), "refusing to launch the scheduler itself");
            self.events
                .on_task_error(&task.name, "Target is the scheduler executable");
            return None;
        }
        if self
            .store
            .modify(&task.id, |t| t.status = TaskStatus::Running)
            .is_err()
        {
            warn!(task_id = %task.id, "task vanished before launch");
            return None;
        }

        info!(task_id = %task.id, name = %task.name, priority = %task.priority, "task started");
        self.events.on_task_started(&task.name, task.priority);

        let start = self.clock.now();
        let events = Arc::clone(&self.events);
        let result = self
            .runner
            .run(&task.path, cancel, move |line| events.on_log_line(line))
            .await;
        let end = self.clock.now();

        let (verdict, exit_code, output) = match result {
            Ok(outcome) => {
                let verdict = match outcome.exit {
                    ExitKind::Exited { code: 0 } => Verdict::Success,
                    ExitKind::Exited { code } => Verdict::Retryable(format!("Exit code: {code}")),
                    ExitKind::Signalled => Verdict::Retryable("Terminated by signal".to_string()),
                    ExitKind::TimedOut { secs } => {
                        let msg = format!("Timeout ({secs}s)");
                        if self.retry_on_timeout {
                            Verdict::Retryable(msg)
                        } else {
                            Verdict::Terminal(msg)
                        }
                    }
                    ExitKind::Cancelled => Verdict::Terminal("Cancelled by shutdown".to_string()),
                };
                (verdict, outcome.exit.code(), outcome.output.join("\n"))
            }
            Err(e) => (
                Verdict::Retryable(e.to_string()),
                EXIT_CODE_SENTINEL,
                String::new(),
            ),
        };

        let mut record = ExecutionRecord::new(&task.id, &task.name, start, end);
        record.exit_code = exit_code;
        record.output = output;

        match verdict {
            Verdict::Success => {
                record.success = true;
                let _ = self.store.modify(&task.id, |t| {
                    t.success_count += 1;
                    t.current_retry = 0;
                    t.last_error.clear();
                });
                info!(task_id = %task.id, name = %task.name, duration_secs = record.duration, "task completed");
            }
            Verdict::Retryable(ref msg) | Verdict::Terminal(ref msg) => {
                let message = truncate_text(msg, self.error_max_chars);
                record.error_message = message.clone();
                let retryable = matches!(verdict, Verdict::Retryable(_));

                let booked = self.store.modify(&task.id, |t| {
                    t.fail_count += 1;
                    t.last_error = message.clone();
                    retryable.then(|| retry::on_failure(t, end))
                });
                warn!(task_id = %task.id, name = %task.name, exit_code, "task failed: {message}");
                self.events.on_task_error(&task.name, &message);

                match booked.ok().flatten() {
                    Some(RetryDecision::Scheduled { attempt, max, at }) => {
                        info!(task_id = %task.id, attempt, max, retry_at = %at, "retry scheduled");
                        self.events.on_task_retry(&task.name, attempt, max);
                    }
                    Some(RetryDecision::Exhausted { max }) => {
                        warn!(task_id = %task.id, name = %task.name, max, "max retries exhausted");
                    }
                    None => {}
                }
            }
        }

        self.events
            .on_task_completed(&task.name, record.duration, record.success);
        self.history.add_record(&record);
        Some(record)
    }
}
