use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::{debug, error};

use crate::types::Priority;

/// Notifications the scheduler emits to the outside world (UI refresh,
/// chat or desktop notifications, log windows).
///
/// Every method has a no-op default so sinks implement only what they need.
pub trait TaskEvents: Send + Sync {
    fn on_task_started(&self, _name: &str, _priority: Priority) {}
    /// `duration` in seconds.
    fn on_task_completed(&self, _name: &str, _duration: f64, _success: bool) {}
    fn on_task_error(&self, _name: &str, _message: &str) {}
    fn on_task_retry(&self, _name: &str, _attempt: u32, _max: u32) {}
    fn on_log_line(&self, _message: &str) {}
    fn on_tasks_changed(&self) {}
}

/// Fans events out to every registered sink.
///
/// A panicking sink is logged and skipped; it never reaches the scheduler.
#[derive(Default)]
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn TaskEvents>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn TaskEvents>) {
        let mut sinks = self.sinks.write().unwrap_or_else(|e| e.into_inner());
        sinks.push(sink);
        debug!(count = sinks.len(), "event sink registered");
    }

    pub fn len(&self) -> usize {
        self.sinks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, event: &'static str, f: impl Fn(&dyn TaskEvents)) {
        let sinks = self.sinks.read().unwrap_or_else(|e| e.into_inner());
        for sink in sinks.iter() {
            if catch_unwind(AssertUnwindSafe(|| f(sink.as_ref()))).is_err() {
                error!(event, "event sink panicked, ignored");
            }
        }
    }
}

impl TaskEvents for EventBus {
    fn on_task_started(&self, name: &str, priority: Priority) {
        self.emit("task_started", |s| s.on_task_started(name, priority));
    }

    fn on_task_completed(&self, name: &str, duration: f64, success: bool) {
        self.emit("task_completed", |s| s.on_task_completed(name, duration, success));
    }

    fn on_task_error(&self, name: &str, message: &str) {
        self.emit("task_error", |s| s.on_task_error(name, message));
    }

    fn on_task_retry(&self, name: &str, attempt: u32, max: u32) {
        self.emit("task_retry", |s| s.on_task_retry(name, attempt, max));
    }

    fn on_log_line(&self, message: &str) {
        self.emit("log_line", |s| s.on_log_line(message));
    }

    fn on_tasks_changed(&self) {
        self.emit("tasks_changed", |s| s.on_tasks_changed());
    }
}
