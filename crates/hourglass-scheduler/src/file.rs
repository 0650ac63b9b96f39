//! On-disk task list: atomic replace, `.backup` sibling, timestamped snapshots.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hourglass_core::{config::StorageConfig, fsutil::write_atomic_with, Clock};
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    types::{check_window, StoredTask, Task, TaskDefaults},
};

const SNAPSHOT_PREFIX: &str = "tasks_backup_";
const SNAPSHOT_SUFFIX: &str = ".json";

/// The task store's backing file and its backups.
pub struct TaskFile {
    path: PathBuf,
    backups_dir: PathBuf,
    auto_backup: bool,
    keep_count: usize,
    clock: Arc<dyn Clock>,
}

impl TaskFile {
    /// A task file with automatic snapshots disabled.
    pub fn new(path: impl Into<PathBuf>, backups_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            backups_dir: backups_dir.into(),
            auto_backup: false,
            keep_count: hourglass_core::config::DEFAULT_BACKUP_KEEP_COUNT,
            clock,
        }
    }

    pub fn from_config(config: &StorageConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.tasks_path(), config.backups_dir(), clock)
            .with_auto_backup(config.auto_backup, config.backup_keep_count)
    }

    /// Snapshot into the backup directory after every successful save,
    /// keeping the `keep_count` most recent snapshots.
    pub fn with_auto_backup(mut self, enabled: bool, keep_count: usize) -> Self {
        self.auto_backup = enabled;
        self.keep_count = keep_count.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    /// `tasks.json` → `tasks.json.backup`
    pub fn backup_sibling(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".backup");
        self.path.with_file_name(name)
    }

    /// Read the task list, falling back through `.backup` and the newest
    /// snapshot. Never fails: with nothing readable the list is empty.
    pub fn load(&self, defaults: &TaskDefaults) -> Vec<Task> {
        let mut candidates = vec![self.path.clone(), self.backup_sibling()];
        if let Some(newest) = self.snapshots().pop() {
            candidates.push(newest);
        }

        for (i, candidate) in candidates.iter().enumerate() {
            if !candidate.exists() {
                continue;
            }
            match read_tasks(candidate, defaults) {
                Ok(tasks) => {
                    if i > 0 {
                        warn!(path = %candidate.display(), "task file unreadable, loaded fallback copy");
                    }
                    info!(path = %candidate.display(), count = tasks.len(), "tasks loaded");
                    return tasks;
                }
                Err(e) => warn!(path = %candidate.display(), "cannot read task file: {e}"),
            }
        }

        info!(path = %self.path.display(), "no readable task file, starting empty");
        Vec::new()
    }

    /// Replace the task file with `tasks`.
    ///
    /// The previous file is kept as `.backup` until the new one is in place.
    /// On failure the previous file is left (or put back) untouched.
    pub fn save(&self, tasks: &[Task]) -> Result<()> {
        self.save_with(tasks, |from, to| fs::rename(from, to))
    }

    fn save_with<R>(&self, tasks: &[Task], rename: R) -> Result<()>
    where
        R: FnOnce(&Path, &Path) -> std::io::Result<()>,
    {
        let bytes = serde_json::to_vec_pretty(tasks)?;
        let backup = self.backup_sibling();

        let had_previous = self.path.exists();
        if had_previous {
            if let Err(e) = fs::copy(&self.path, &backup) {
                warn!(path = %backup.display(), "could not keep previous task file: {e}");
            }
        }

        if let Err(e) = write_atomic_with(&self.path, &bytes, rename) {
            error!(path = %self.path.display(), "task file write failed: {e}");
            if backup.exists() && !self.path.exists() {
                if let Err(restore) = fs::rename(&backup, &self.path) {
                    error!(path = %self.path.display(), "restoring previous task file failed: {restore}");
                }
            }
            return Err(e.into());
        }

        if had_previous {
            let _ = fs::remove_file(&backup);
        }
        debug!(path = %self.path.display(), count = tasks.len(), "tasks saved");

        if self.auto_backup {
            if let Err(e) = self.backup_now() {
                warn!("task snapshot failed: {e}");
            }
        }
        Ok(())
    }

    /// Copy the current task file into the backup directory and prune.
    ///
    /// Returns the snapshot path, or `None` when there is no task file yet.
    pub fn backup_now(&self) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::create_dir_all(&self.backups_dir)?;
        let stamp = self.clock.now().format("%Y%m%d_%H%M%S");
        let target = self
            .backups_dir
            .join(format!("{SNAPSHOT_PREFIX}{stamp}{SNAPSHOT_SUFFIX}"));
        fs::copy(&self.path, &target)?;
        debug!(path = %target.display(), "task snapshot written");
        self.prune_backups();
        Ok(Some(target))
    }

    /// Delete the oldest snapshots beyond the keep count. Returns how many went.
    pub fn prune_backups(&self) -> usize {
        let snapshots = self.snapshots();
        let excess = snapshots.len().saturating_sub(self.keep_count);
        let mut removed = 0;
        for old in snapshots.into_iter().take(excess) {
            match fs::remove_file(&old) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %old.display(), "could not delete old snapshot: {e}"),
            }
        }
        if removed > 0 {
            debug!(removed, "old task snapshots pruned");
        }
        removed
    }

    /// Snapshot files, oldest first.
    pub fn snapshots(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.backups_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(SNAPSHOT_SUFFIX))
            .collect();
        // the timestamp format sorts lexicographically
        names.sort();
        names.into_iter().map(|n| self.backups_dir.join(n)).collect()
    }
}

/// Parse a task list file. Unparseable or invalid entries are skipped;
/// a file that is not a JSON array is an error.
pub fn read_tasks(path: &Path, defaults: &TaskDefaults) -> Result<Vec<Task>> {
    let raw = fs::read(path)?;
    let values: Vec<serde_json::Value> = serde_json::from_slice(&raw)?;
    Ok(materialize_all(values, defaults))
}

fn materialize_all(values: Vec<serde_json::Value>, defaults: &TaskDefaults) -> Vec<Task> {
    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(values.len());
    for value in values {
        let stored: StoredTask = match serde_json::from_value(value) {
            Ok(s) => s,
            Err(e) => {
                warn!("skipping malformed task entry: {e}");
                continue;
            }
        };
        let task = stored.materialize(defaults);
        if let Err(e) = check_window(&task.name, task.start_time, task.end_time) {
            warn!(task_id = %task.id, "skipping task: {e}");
            continue;
        }
        if !seen.insert(task.id.clone()) {
            warn!(task_id = %task.id, name = %task.name, "skipping task with duplicate id");
            continue;
        }
        tasks.push(task);
    }
    tasks
}
