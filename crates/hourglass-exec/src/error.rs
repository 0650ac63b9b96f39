//! Error types for the hourglass-exec crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised before or while driving a child process.
///
/// A child that runs and exits non-zero, times out or is cancelled is *not*
/// an error; see [`crate::types::ExitKind`].
#[derive(Debug, Error)]
pub enum ExecError {
    /// The child process could not be spawned.
    #[error("Spawn failed: {0}")]
    Spawn(String),

    /// Underlying I/O failure while reading output or waiting for exit.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The target resolves to the scheduler's own executable.
    #[error("Refusing to launch the scheduler itself: {}", path.display())]
    SelfInvocation { path: PathBuf },

    /// The target path is unusable (missing, relative, not a file).
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ExecError>;
