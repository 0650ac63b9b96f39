use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable audit entry for one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// UUID v4 string.
    pub id: String,
    pub task_id: String,
    /// Task name at the time of the run; survives later renames.
    pub task_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Wall-clock duration in seconds.
    pub duration: f64,
    pub success: bool,
    /// Child exit code, or -1 for timeout / kill / launch failure.
    pub exit_code: i32,
    /// Empty on success.
    #[serde(default)]
    pub error_message: String,
    /// Tail of the merged output, newline separated.
    #[serde(default)]
    pub output: String,
}

impl ExecutionRecord {
    /// Start a record with a fresh id; outcome fields are filled by the caller.
    pub fn new(
        task_id: impl Into<String>,
        task_name: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        let duration = (end_time - start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            task_name: task_name.into(),
            start_time,
            end_time,
            duration,
            success: false,
            exit_code: -1,
            error_message: String::new(),
            output: String::new(),
        }
    }
}
