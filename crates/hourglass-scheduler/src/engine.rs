use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hourglass_core::config::{NextRunAnchor, SchedulerConfig};
use hourglass_core::Clock;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    events::{EventBus, TaskEvents},
    schedule::{next_run, next_run_after},
    store::TaskStore,
    types::{Task, TaskStatus},
    worker::TaskWorker,
};

/// How long killed children get to be reaped before their workers are aborted.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// What one scan of the task list did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Ids of tasks handed to a worker, in list order.
    pub dispatched: Vec<String>,
    /// Ids of tasks that crossed their end time on this tick.
    pub expired: Vec<String>,
    /// Due tasks left for a later tick because the concurrency limit was hit.
    pub deferred: usize,
}

impl TickReport {
    pub fn changed(&self) -> bool {
        !self.dispatched.is_empty() || !self.expired.is_empty()
    }
}

/// Polling dispatcher: scans the task list every poll interval and hands due
/// tasks to concurrent workers.
pub struct SchedulerEngine {
    store: Arc<TaskStore>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    worker: Arc<TaskWorker>,
    settings: SchedulerConfig,
    workers: JoinSet<()>,
    /// In-flight workers by task id.
    running: HashMap<String, AbortHandle>,
    /// Flipped to `true` to kill every running child.
    kill_tx: watch::Sender<bool>,
}

impl SchedulerEngine {
    pub fn new(worker: TaskWorker, settings: &SchedulerConfig) -> Self {
        let (kill_tx, _) = watch::channel(false);
        Self {
            store: Arc::clone(worker.store()),
            events: Arc::clone(worker.events()),
            clock: Arc::clone(worker.clock()),
            worker: Arc::new(worker),
            settings: settings.clone(),
            workers: JoinSet::new(),
            running: HashMap::new(),
            kill_tx,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Number of workers still running.
    pub fn in_flight(&self) -> usize {
        self.running.values().filter(|h| !h.is_finished()).count()
    }

    /// `true` while a worker for `task_id` is running.
    pub fn is_running(&self, task_id: &str) -> bool {
        self.running
            .get(task_id)
            .is_some_and(|h| !h.is_finished())
    }

    /// Main loop. Ticks every poll interval until `shutdown` broadcasts `true`,
    /// then drains in-flight workers.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let poll = Duration::from_secs(self.settings.poll_interval_secs.max(1));
        info!(poll_secs = poll.as_secs(), tasks = self.store.len(), "scheduler engine started");

        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick();
                    if report.changed() || report.deferred > 0 {
                        debug!(
                            dispatched = report.dispatched.len(),
                            expired = report.expired.len(),
                            deferred = report.deferred,
                            "tick"
                        );
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }

        self.drain().await;
        info!("scheduler engine stopped");
    }

    /// Scan every task once: expire tasks past their window and dispatch
    /// the due ones.
    pub fn tick(&mut self) -> TickReport {
        self.reap();
        let now = self.clock.now();
        let limit = self.settings.max_concurrent_tasks.max(1);
        let anchor = self.settings.next_run_anchor;
        let mut report = TickReport::default();

        let running = &self.running;
        let mut busy = running.values().filter(|h| !h.is_finished()).count();

        let due: Vec<Task> = self.store.with_tasks(|tasks| {
            let mut due = Vec::new();
            for task in tasks.iter_mut().filter(|t| !t.paused) {
                if task.is_past_end(now) {
                    if task.status == TaskStatus::Idle {
                        task.status = TaskStatus::Expired;
                        info!(task_id = %task.id, name = %task.name, "task expired");
                        report.expired.push(task.id.clone());
                    }
                    continue;
                }
                if !task.is_due(now) || running.get(&task.id).is_some_and(|h| !h.is_finished()) {
                    continue;
                }
                if busy >= limit {
                    report.deferred += 1;
                    continue;
                }

                task.last_run = Some(now);
                task.next_run = match anchor {
                    NextRunAnchor::Tick => next_run(now, task.frequency, task.magnitude),
                    NextRunAnchor::PreviousTrigger => {
                        next_run_after(task.next_run, now, task.frequency, task.magnitude)
                    }
                };
                task.run_count += 1;
                task.status = TaskStatus::Running;
                busy += 1;

                info!(
                    task_id = %task.id,
                    name = %task.name,
                    run = task.run_count,
                    next_run = %task.next_run,
                    "dispatching task"
                );
                due.push(task.clone());
            }
            due
        });

        if report.deferred > 0 {
            warn!(deferred = report.deferred, limit, "concurrency limit reached, due tasks deferred");
        }

        for task in due {
            report.dispatched.push(task.id.clone());
            self.spawn_worker(task);
        }

        if report.changed() {
            if let Err(e) = self.store.persist() {
                error!("persisting after tick failed: {e}");
            }
            self.events.on_tasks_changed();
        }
        report
    }

    /// Wait until every in-flight worker has finished on its own.
    pub async fn join_all(&mut self) {
        while let Some(res) = self.workers.join_next().await {
            log_join(res);
        }
        self.running.clear();
    }

    /// Stop in-flight work: wait out the grace period, then kill every
    /// child and join the workers.
    pub async fn drain(&mut self) {
        self.reap();
        if self.workers.is_empty() {
            return;
        }

        let grace = Duration::from_secs(self.settings.shutdown_grace_secs);
        info!(in_flight = self.in_flight(), grace_secs = grace.as_secs(), "waiting for running tasks");
        if self.join_within(grace).await {
            return;
        }

        warn!(in_flight = self.in_flight(), "grace period over, killing running tasks");
        let _ = self.kill_tx.send(true);
        if self.join_within(KILL_WAIT).await {
            return;
        }

        error!(in_flight = self.in_flight(), "workers did not stop, aborting");
        self.workers.abort_all();
        self.join_all().await;
    }

    /// `true` when every worker finished within `limit`.
    async fn join_within(&mut self, limit: Duration) -> bool {
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                res = self.workers.join_next() => match res {
                    Some(res) => log_join(res),
                    None => {
                        self.running.clear();
                        return true;
                    }
                },
                _ = &mut deadline => return false,
            }
        }
    }

    fn spawn_worker(&mut self, task: Task) {
        let id = task.id.clone();
        let worker = Arc::clone(&self.worker);
        let cancel = self.kill_tx.subscribe();
        let handle = self.workers.spawn(async move {
            worker.execute(task, cancel).await;
        });
        self.running.insert(id, handle);
    }

    /// Collect finished workers.
    fn reap(&mut self) {
        while let Some(res) = self.workers.try_join_next() {
            log_join(res);
        }
        self.running.retain(|_, h| !h.is_finished());
    }
}

fn log_join(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            error!("task worker panicked: {e}");
        } else {
            debug!("task worker cancelled: {e}");
        }
    }
}
