use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hourglass_core::config::SchedulerConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};

/// Category given to tasks that don't carry one.
pub const DEFAULT_CATEGORY: &str = "Genel";

/// How often a task recurs. The magnitude lives on the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Frequency {
    /// Every `magnitude` minutes.
    Minutely,
    /// Every `magnitude` hours.
    Hourly,
    /// `magnitude` evenly spaced runs per day.
    TimesPerDay,
    /// Every `magnitude` days.
    Daily,
    /// Every `magnitude` weeks.
    Weekly,
}

impl From<String> for Frequency {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "minutely" => Frequency::Minutely,
            "hourly" => Frequency::Hourly,
            "times_per_day" => Frequency::TimesPerDay,
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            other => {
                warn!(kind = %other, "unknown frequency kind, treating as times_per_day");
                Frequency::TimesPerDay
            }
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Frequency::Minutely => "minutely",
            Frequency::Hourly => "hourly",
            Frequency::TimesPerDay => "times_per_day",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        };
        write!(f, "{s}")
    }
}

/// Priority rank, serialised as its integer (1 = critical … 4 = low).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(from = "i64", into = "i64")]
pub enum Priority {
    Critical = 1,
    High = 2,
    #[default]
    Normal = 3,
    Low = 4,
}

impl From<i64> for Priority {
    fn from(rank: i64) -> Self {
        match rank {
            1 => Priority::Critical,
            2 => Priority::High,
            3 => Priority::Normal,
            4 => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

impl From<Priority> for i64 {
    fn from(p: Priority) -> Self {
        p as i64
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// Transient run state. Never trusted from disk: every load resets it to `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its next trigger.
    #[default]
    Idle,
    /// A worker owns the task right now.
    Running,
    /// `end_time` has passed; the task is never dispatched again.
    Expired,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// A recurring job definition plus its mutable run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// UUID v4 string, stable across edits.
    pub id: String,
    /// Unique among tasks, compared case-insensitively.
    pub name: String,
    /// Absolute path of the executable or script.
    pub path: PathBuf,
    pub category: String,
    pub priority: Priority,

    pub start_time: DateTime<Utc>,
    /// Exclusive upper bound; always after `start_time`.
    pub end_time: DateTime<Utc>,
    pub frequency: Frequency,
    /// Always >= 1.
    pub magnitude: u32,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,

    pub status: TaskStatus,
    /// A paused task is never dispatched, whatever its status.
    pub paused: bool,
    pub run_count: u64,
    pub success_count: u64,
    pub fail_count: u64,

    pub max_retries: u32,
    /// Seconds between a failure and its retry.
    pub retry_delay: u64,
    /// Always <= `max_retries`.
    pub current_retry: u32,
    /// Empty when the last run succeeded.
    pub last_error: String,
}

impl Task {
    /// `true` once `now` is past the task's window.
    pub fn is_past_end(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time
    }

    /// `true` when the task should be dispatched at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.paused
            && self.status == TaskStatus::Idle
            && !self.is_past_end(now)
            && now >= self.next_run
    }

    /// Drop everything learned from earlier runs: the task starts over at
    /// `start_time` as if freshly added.
    pub fn reset_runtime(&mut self) {
        self.next_run = self.start_time;
        self.last_run = None;
        self.status = TaskStatus::Idle;
        self.paused = false;
        self.run_count = 0;
        self.success_count = 0;
        self.fail_count = 0;
        self.current_retry = 0;
        self.last_error.clear();
    }
}

/// Per-task defaults taken from configuration at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDefaults {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl TaskDefaults {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.retry_max,
            retry_delay_secs: config.retry_delay_secs,
        }
    }
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// A task as found on disk or in an import file: everything beyond the
/// definition itself is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTask {
    pub id: Option<String>,
    pub name: String,
    pub path: PathBuf,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub frequency: Frequency,
    pub magnitude: Option<i64>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub paused: Option<bool>,
    pub run_count: Option<u64>,
    pub success_count: Option<u64>,
    pub fail_count: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<u64>,
    pub current_retry: Option<u32>,
    pub last_error: Option<String>,
}

impl StoredTask {
    /// Fill every missing field with its default and reset the run status.
    ///
    /// This is the only place defaults are applied.
    pub fn materialize(self, defaults: &TaskDefaults) -> Task {
        let max_retries = self.max_retries.unwrap_or(defaults.max_retries);
        Task {
            id: self
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            path: self.path,
            category: self
                .category
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            priority: self.priority.unwrap_or_default(),
            start_time: self.start_time,
            end_time: self.end_time,
            frequency: self.frequency,
            magnitude: clamp_magnitude(self.magnitude.unwrap_or(1)),
            next_run: self.next_run.unwrap_or(self.start_time),
            last_run: self.last_run,
            status: TaskStatus::Idle,
            paused: self.paused.unwrap_or(false),
            run_count: self.run_count.unwrap_or(0),
            success_count: self.success_count.unwrap_or(0),
            fail_count: self.fail_count.unwrap_or(0),
            max_retries,
            retry_delay: self.retry_delay.unwrap_or(defaults.retry_delay_secs),
            current_retry: self.current_retry.unwrap_or(0).min(max_retries),
            last_error: self.last_error.unwrap_or_default(),
        }
    }
}

impl From<Task> for StoredTask {
    fn from(t: Task) -> Self {
        Self {
            id: Some(t.id),
            name: t.name,
            path: t.path,
            category: Some(t.category),
            priority: Some(t.priority),
            start_time: t.start_time,
            end_time: t.end_time,
            frequency: t.frequency,
            magnitude: Some(i64::from(t.magnitude)),
            next_run: Some(t.next_run),
            last_run: t.last_run,
            paused: Some(t.paused),
            run_count: Some(t.run_count),
            success_count: Some(t.success_count),
            fail_count: Some(t.fail_count),
            max_retries: Some(t.max_retries),
            retry_delay: Some(t.retry_delay),
            current_retry: Some(t.current_retry),
            last_error: Some(t.last_error),
        }
    }
}

fn clamp_magnitude(raw: i64) -> u32 {
    u32::try_from(raw.max(1)).unwrap_or(u32::MAX)
}

/// Input for creating or redefining a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub frequency: Frequency,
    pub magnitude: u32,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay: Option<u64>,
}

impl NewTask {
    /// Check the definition and return the canonical target path.
    pub fn validate(&self) -> Result<PathBuf> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("name must not be empty".into()));
        }
        check_window(&self.name, self.start_time, self.end_time)?;
        if self.magnitude == 0 {
            return Err(SchedulerError::InvalidTask(format!(
                "{}: magnitude must be at least 1",
                self.name
            )));
        }
        Ok(hourglass_exec::guard::validate_target(&self.path)?)
    }

    /// Build a fresh idle task with zeroed counters.
    pub(crate) fn into_task(self, id: String, path: PathBuf, defaults: &TaskDefaults) -> Task {
        let max_retries = self.max_retries.unwrap_or(defaults.max_retries);
        Task {
            id,
            name: self.name.trim().to_string(),
            path,
            category: self
                .category
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            priority: self.priority,
            start_time: self.start_time,
            end_time: self.end_time,
            frequency: self.frequency,
            magnitude: self.magnitude,
            next_run: self.start_time,
            last_run: None,
            status: TaskStatus::Idle,
            paused: false,
            run_count: 0,
            success_count: 0,
            fail_count: 0,
            max_retries,
            retry_delay: self.retry_delay.unwrap_or(defaults.retry_delay_secs),
            current_retry: 0,
            last_error: String::new(),
        }
    }
}

/// Reject windows where `end` is not after `start`.
pub fn check_window(name: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end <= start {
        return Err(SchedulerError::InvalidTask(format!(
            "{name}: end time must be after start time"
        )));
    }
    Ok(())
}

/// Two targets are the same when they resolve to the same file.
pub fn same_target(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
