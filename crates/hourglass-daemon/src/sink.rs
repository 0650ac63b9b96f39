use hourglass_scheduler::{Priority, TaskEvents};
use tracing::{debug, trace};

const TARGET: &str = "hourglass::events";

/// Renders scheduler events as log lines on the `hourglass::events` target.
///
/// The scheduler already logs the same moments at `info`; this sink exists
/// so an operator can follow the collaborator feed alone
/// (`RUST_LOG=hourglass::events=debug`).
pub struct TracingEvents;

impl TaskEvents for TracingEvents {
    fn on_task_started(&self, name: &str, priority: Priority) {
        debug!(target: TARGET, %name, %priority, "started");
    }

    fn on_task_completed(&self, name: &str, duration: f64, success: bool) {
        debug!(target: TARGET, %name, duration_secs = duration, success, "completed");
    }

    fn on_task_error(&self, name: &str, message: &str) {
        debug!(target: TARGET, %name, "error: {message}");
    }

    fn on_task_retry(&self, name: &str, attempt: u32, max: u32) {
        debug!(target: TARGET, %name, attempt, max, "retry");
    }

    fn on_log_line(&self, message: &str) {
        trace!(target: TARGET, "{message}");
    }

    fn on_tasks_changed(&self) {
        debug!(target: TARGET, "tasks changed");
    }
}
