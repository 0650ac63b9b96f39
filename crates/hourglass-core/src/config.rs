use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HourglassError, Result};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_MAX_TASK_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_RETRY_MAX: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;
pub const DEFAULT_BACKUP_KEEP_COUNT: usize = 10;
pub const DEFAULT_KEEP_HISTORY_DAYS: u32 = 30;
pub const DEFAULT_OUTPUT_MAX_LINES: usize = 50;
pub const DEFAULT_ERROR_MAX_CHARS: usize = 500;

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "HOURGLASS_CONFIG";

/// Top-level config (hourglass.toml + HOURGLASS_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourglassConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub exec: ExecConfig,
}

/// Which instant a due task's next trigger is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextRunAnchor {
    /// The tick time that dispatched the task. Missed slots are never replayed.
    #[default]
    Tick,
    /// The task's previous `next_run`, keeping a fixed cadence.
    PreviousTrigger,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    /// Hard wall-clock limit for a single execution.
    pub max_task_timeout_secs: u64,
    /// Default `max_retries` for tasks that don't carry their own.
    pub retry_max: u32,
    /// Default `retry_delay` (seconds) for tasks that don't carry their own.
    pub retry_delay_secs: u64,
    /// Timeouts are terminal unless this is set.
    pub retry_on_timeout: bool,
    pub max_concurrent_tasks: usize,
    /// How long in-flight workers may keep running after a stop request
    /// before their children are killed.
    pub shutdown_grace_secs: u64,
    pub next_run_anchor: NextRunAnchor,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_task_timeout_secs: DEFAULT_MAX_TASK_TIMEOUT_SECS,
            retry_max: DEFAULT_RETRY_MAX,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            retry_on_timeout: false,
            max_concurrent_tasks: 16,
            shutdown_grace_secs: 10,
            next_run_anchor: NextRunAnchor::Tick,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub tasks_path: String,
    pub backups_dir: String,
    pub auto_backup: bool,
    pub backup_keep_count: usize,
    pub backup_on_exit: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            tasks_path: default_data_path("tasks.json"),
            backups_dir: default_data_path("backups"),
            auto_backup: true,
            backup_keep_count: DEFAULT_BACKUP_KEEP_COUNT,
            backup_on_exit: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub dir: String,
    pub keep_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: default_data_path("history"),
            keep_days: DEFAULT_KEEP_HISTORY_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Number of most recent output lines kept on an execution record.
    pub output_max_lines: usize,
    pub error_max_chars: usize,
    /// File extension (lowercase, no dot) → launcher argv prefix.
    pub interpreters: BTreeMap<String, Vec<String>>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            output_max_lines: DEFAULT_OUTPUT_MAX_LINES,
            error_max_chars: DEFAULT_ERROR_MAX_CHARS,
            interpreters: default_interpreters(),
        }
    }
}

fn default_interpreters() -> BTreeMap<String, Vec<String>> {
    let python = if cfg!(windows) { "python" } else { "python3" };
    let mut map = BTreeMap::new();
    map.insert("py".to_string(), vec![python.to_string()]);
    map.insert("sh".to_string(), vec!["sh".to_string()]);
    map.insert(
        "ps1".to_string(),
        ["powershell", "-NoProfile", "-ExecutionPolicy", "Bypass", "-File"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    map.insert("bat".to_string(), vec!["cmd".to_string(), "/C".to_string()]);
    map.insert("cmd".to_string(), vec!["cmd".to_string(), "/C".to_string()]);
    map
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn default_data_path(leaf: &str) -> String {
    format!("{}/.hourglass/{}", home_dir(), leaf)
}

fn default_config_path() -> String {
    default_data_path("hourglass.toml")
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => Path::new(&home_dir()).join(rest),
        None => PathBuf::from(path),
    }
}

impl StorageConfig {
    pub fn tasks_path(&self) -> PathBuf {
        expand_home(&self.tasks_path)
    }

    pub fn backups_dir(&self) -> PathBuf {
        expand_home(&self.backups_dir)
    }
}

impl HistoryConfig {
    pub fn dir(&self) -> PathBuf {
        expand_home(&self.dir)
    }
}

impl HourglassConfig {
    /// Load config from a TOML file with HOURGLASS_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `HOURGLASS_CONFIG`
    ///   3. ~/.hourglass/hourglass.toml
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `HOURGLASS_SCHEDULER__POLL_INTERVAL_SECS=5`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
            .unwrap_or_else(default_config_path);
        let file = expand_home(&path);
        if !file.exists() {
            warn!(path = %file.display(), "no config file, using defaults and environment");
        }

        let config: HourglassConfig = Figment::new()
            .merge(Toml::file(&file))
            .merge(Env::prefixed("HOURGLASS_").split("__"))
            .extract()
            .map_err(|e| HourglassError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn at_least_one(key: &'static str, value: u64) -> Result<()> {
            if value == 0 {
                return Err(HourglassError::InvalidSetting {
                    key,
                    reason: "must be at least 1".to_string(),
                });
            }
            Ok(())
        }

        at_least_one("scheduler.poll_interval_secs", self.scheduler.poll_interval_secs)?;
        at_least_one(
            "scheduler.max_task_timeout_secs",
            self.scheduler.max_task_timeout_secs,
        )?;
        at_least_one(
            "scheduler.max_concurrent_tasks",
            self.scheduler.max_concurrent_tasks as u64,
        )?;
        at_least_one("exec.output_max_lines", self.exec.output_max_lines as u64)?;
        if self.storage.tasks_path.trim().is_empty() {
            return Err(HourglassError::InvalidSetting {
                key: "storage.tasks_path",
                reason: "must not be empty".to_string(),
            });
        }
        for (ext, argv) in &self.exec.interpreters {
            if argv.is_empty() {
                return Err(HourglassError::InvalidSetting {
                    key: "exec.interpreters",
                    reason: format!("launcher for .{ext} is empty"),
                });
            }
        }
        Ok(())
    }
}
