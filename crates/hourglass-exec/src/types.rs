//! Shared data types for hourglass-exec.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exit code recorded when the child produced none of its own
/// (timeout, kill, launch failure).
pub const EXIT_CODE_SENTINEL: i32 = -1;

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Configuration knobs for one execution.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Hard deadline covering output streaming and the wait for exit.
    pub timeout: Duration,

    /// Number of most recent output lines kept in [`ProcessOutcome::output`].
    pub output_max_lines: usize,

    /// Lowercase file extension → launcher argv prefix, e.g. `py → [python3]`.
    pub interpreters: BTreeMap<String, Vec<String>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        let mut interpreters = BTreeMap::new();
        interpreters.insert("sh".to_string(), vec!["sh".to_string()]);
        interpreters.insert("py".to_string(), vec!["python3".to_string()]);
        Self {
            timeout: Duration::from_secs(3600),
            output_max_lines: 50,
            interpreters,
        }
    }
}

// ---------------------------------------------------------------------------
// ExitKind / ProcessOutcome
// ---------------------------------------------------------------------------

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExitKind {
    /// The child exited on its own with this code.
    Exited { code: i32 },

    /// The child was terminated by a signal it did not get from us.
    Signalled,

    /// The deadline expired and the child was killed.
    TimedOut { secs: u64 },

    /// A shutdown request arrived and the child was killed.
    Cancelled,
}

impl ExitKind {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitKind::Exited { code: 0 })
    }

    /// The exit code to record; [`EXIT_CODE_SENTINEL`] when there is none.
    pub fn code(&self) -> i32 {
        match self {
            ExitKind::Exited { code } => *code,
            _ => EXIT_CODE_SENTINEL,
        }
    }
}

/// Everything observed about one finished child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub exit: ExitKind,

    /// The most recent `output_max_lines` lines of merged stdout/stderr,
    /// oldest first, ANSI escapes stripped.
    pub output: Vec<String>,

    /// Total non-blank lines seen, including those dropped from `output`.
    pub total_lines: usize,

    pub pid: Option<u32>,

    /// Wall-clock time from spawn to exit (or kill).
    pub elapsed: Duration,
}
