use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Reading or writing the task store failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The task file could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The task definition breaks a model rule (empty name, `end <= start`, bad target).
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// A task with the same name or target already exists and the caller did not confirm.
    #[error("Duplicate task: {name}")]
    DuplicateTask { name: String },

    /// No task with the given ID exists in the store.
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },
}

impl From<hourglass_exec::ExecError> for SchedulerError {
    fn from(e: hourglass_exec::ExecError) -> Self {
        SchedulerError::InvalidTask(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
