use thiserror::Error;

/// Errors that can occur within the history subsystem.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Reading, writing or deleting a partition file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A partition could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HistoryError>;
