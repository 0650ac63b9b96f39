use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use hourglass_exec::SelfGuard;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, SchedulerError},
    file::TaskFile,
    types::{check_window, same_target, NewTask, StoredTask, Task, TaskDefaults, TaskStatus},
};

/// Outcome of an import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    /// Tasks added, each with a freshly generated id.
    pub added: Vec<Task>,
    pub skipped: Vec<SkippedImport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedImport {
    pub name: String,
    pub reason: String,
}

/// Owner of the task list.
///
/// All access goes through one coarse lock. Saves are serialised by a
/// second lock so a later `persist` always writes a newer snapshot.
pub struct TaskStore {
    file: TaskFile,
    defaults: TaskDefaults,
    guard: SelfGuard,
    tasks: Mutex<Vec<Task>>,
    save_lock: Mutex<()>,
}

impl TaskStore {
    /// Load the task list from `file`. Never fails; see [`TaskFile::load`].
    pub fn open(file: TaskFile, defaults: TaskDefaults) -> Self {
        let tasks = file.load(&defaults);
        Self {
            file,
            defaults,
            guard: SelfGuard::current(),
            tasks: Mutex::new(tasks),
            save_lock: Mutex::new(()),
        }
    }

    /// Replace the guard used to reject the scheduler's own executable.
    pub fn with_self_guard(mut self, guard: SelfGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn file(&self) -> &TaskFile {
        &self.file
    }

    pub fn defaults(&self) -> &TaskDefaults {
        &self.defaults
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Task>> {
        // a panicking worker must not wedge the scheduler
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` over the whole list under the lock.
    pub(crate) fn with_tasks<R>(&self, f: impl FnOnce(&mut Vec<Task>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn list(&self) -> Vec<Task> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        self.lock()
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Mutate one task under the lock.
    ///
    /// Nothing is persisted; call [`persist`](Self::persist) afterwards.
    pub fn modify<R>(&self, id: &str, f: impl FnOnce(&mut Task) -> R) -> Result<R> {
        let mut tasks = self.lock();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| not_found(id))?;
        Ok(f(task))
    }

    /// Add a new task. It starts idle with zeroed counters and
    /// `next_run = start_time`.
    ///
    /// A save failure is returned but the task stays in memory.
    pub fn add(&self, new: NewTask, confirm_duplicate: bool) -> Result<Task> {
        let path = self.check_new(&new)?;
        let task = {
            let mut tasks = self.lock();
            if !confirm_duplicate {
                check_duplicate(&tasks, None, &new.name, &path)?;
            }
            let task = new.into_task(Uuid::new_v4().to_string(), path, &self.defaults);
            tasks.push(task.clone());
            task
        };
        info!(task_id = %task.id, name = %task.name, "task added");
        self.persist()?;
        Ok(task)
    }

    /// Redefine an existing task. Id and counters are kept; the schedule
    /// restarts at the new `start_time`.
    pub fn update(&self, id: &str, new: NewTask, confirm_duplicate: bool) -> Result<Task> {
        let path = self.check_new(&new)?;
        let task = {
            let mut tasks = self.lock();
            if !confirm_duplicate {
                check_duplicate(&tasks, Some(id), &new.name, &path)?;
            }
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| not_found(id))?;

            let fresh = new.into_task(task.id.clone(), path, &self.defaults);
            let running = task.status == TaskStatus::Running;
            *task = Task {
                status: if running { TaskStatus::Running } else { TaskStatus::Idle },
                paused: task.paused,
                last_run: task.last_run,
                run_count: task.run_count,
                success_count: task.success_count,
                fail_count: task.fail_count,
                current_retry: task.current_retry.min(fresh.max_retries),
                last_error: std::mem::take(&mut task.last_error),
                ..fresh
            };
            task.clone()
        };
        info!(task_id = %task.id, name = %task.name, "task updated");
        self.persist()?;
        Ok(task)
    }

    pub fn remove(&self, id: &str) -> Result<Task> {
        let removed = {
            let mut tasks = self.lock();
            let pos = tasks
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(|| not_found(id))?;
            tasks.remove(pos)
        };
        info!(task_id = %removed.id, name = %removed.name, "task removed");
        self.persist()?;
        Ok(removed)
    }

    pub fn set_paused(&self, id: &str, paused: bool) -> Result<Task> {
        let task = self.modify(id, |t| {
            t.paused = paused;
            t.clone()
        })?;
        info!(task_id = %task.id, name = %task.name, paused, "task pause state changed");
        self.persist()?;
        Ok(task)
    }

    /// Add tasks from an export. Every imported task gets a new id and
    /// starts with a clean run history.
    ///
    /// Tasks whose name or target matches an existing (or earlier imported)
    /// task are skipped unless `confirm_duplicates` is set.
    pub fn import(&self, incoming: Vec<StoredTask>, confirm_duplicates: bool) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        {
            let mut tasks = self.lock();
            for stored in incoming {
                let mut task = stored.materialize(&self.defaults);
                task.id = Uuid::new_v4().to_string();
                task.reset_runtime();

                let rejection = check_window(&task.name, task.start_time, task.end_time)
                    .err()
                    .or_else(|| {
                        self.guard
                            .check(&task.path)
                            .err()
                            .map(SchedulerError::from)
                    })
                    .or_else(|| {
                        if confirm_duplicates {
                            None
                        } else {
                            check_duplicate(&tasks, None, &task.name, &task.path).err()
                        }
                    });
                if let Some(reason) = rejection {
                    warn!(name = %task.name, "import skipped: {reason}");
                    report.skipped.push(SkippedImport {
                        name: task.name,
                        reason: reason.to_string(),
                    });
                    continue;
                }

                tasks.push(task.clone());
                report.added.push(task);
            }
        }

        info!(
            added = report.added.len(),
            skipped = report.skipped.len(),
            "tasks imported"
        );
        if !report.added.is_empty() {
            self.persist()?;
        }
        Ok(report)
    }

    /// Import a JSON array of tasks from `path`.
    pub fn import_file(&self, path: &Path, confirm_duplicates: bool) -> Result<ImportReport> {
        let raw = std::fs::read(path)?;
        let incoming: Vec<StoredTask> = serde_json::from_slice(&raw)?;
        self.import(incoming, confirm_duplicates)
    }

    /// Write the current list to `path` as pretty JSON. Returns the count.
    pub fn export_file(&self, path: &Path) -> Result<usize> {
        let tasks = self.list();
        hourglass_core::fsutil::write_atomic(path, &serde_json::to_vec_pretty(&tasks)?)?;
        info!(path = %path.display(), count = tasks.len(), "tasks exported");
        Ok(tasks.len())
    }

    /// Save the current list to the task file.
    pub fn persist(&self) -> Result<()> {
        let _save = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = self.list();
        self.file.save(&snapshot)
    }

    /// Snapshot the task file into the backup directory.
    pub fn backup_now(&self) -> Result<Option<PathBuf>> {
        let _save = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.file.backup_now()
    }

    fn check_new(&self, new: &NewTask) -> Result<PathBuf> {
        let path = new.validate()?;
        self.guard.check(&path)?;
        Ok(path)
    }
}

fn not_found(id: &str) -> SchedulerError {
    SchedulerError::TaskNotFound { id: id.to_string() }
}

/// `DuplicateTask` when another task shares the name (case-insensitive)
/// or resolves to the same target.
fn check_duplicate(tasks: &[Task], except_id: Option<&str>, name: &str, path: &Path) -> Result<()> {
    let wanted = name.trim().to_lowercase();
    let clash = tasks
        .iter()
        .filter(|t| Some(t.id.as_str()) != except_id)
        .find(|t| t.name.trim().to_lowercase() == wanted || same_target(&t.path, path));
    match clash {
        Some(existing) => Err(SchedulerError::DuplicateTask {
            name: existing.name.clone(),
        }),
        None => Ok(()),
    }
}
