// End-to-end scheduling with real `sh` children.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, TimeZone, Utc};
use hourglass_core::{HourglassConfig, ManualClock};
use hourglass_exec::SelfGuard;
use hourglass_history::HistoryRecorder;
use hourglass_scheduler::{
    EventBus, Frequency, NewTask, Priority, SchedulerEngine, Task, TaskDefaults, TaskFile,
    TaskStatus, TaskStore, TaskWorker,
};
use tempfile::TempDir;
use tokio::sync::watch;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

struct Rig {
    dir: TempDir,
    clock: Arc<ManualClock>,
    store: Arc<TaskStore>,
    history: Arc<HistoryRecorder>,
    events: Arc<EventBus>,
    config: HourglassConfig,
}

impl Rig {
    fn new(tweak: impl FnOnce(&mut HourglassConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HourglassConfig::default();
        config.scheduler.max_task_timeout_secs = 20;
        config.scheduler.shutdown_grace_secs = 5;
        tweak(&mut config);

        let clock = Arc::new(ManualClock::new(t0()));
        let file = TaskFile::new(dir.path().join("tasks.json"), dir.path().join("backups"), clock.clone());
        let store = Arc::new(TaskStore::open(file, TaskDefaults::from_config(&config.scheduler)));
        let history = Arc::new(HistoryRecorder::new(dir.path().join("history"), clock.clone()).unwrap());
        Self {
            dir,
            clock,
            store,
            history,
            events: Arc::new(EventBus::new()),
            config,
        }
    }

    fn worker(&self) -> TaskWorker {
        TaskWorker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.history),
            Arc::clone(&self.events),
            self.clock.clone(),
            &self.config,
        )
    }

    fn engine(&self) -> SchedulerEngine {
        SchedulerEngine::new(self.worker(), &self.config.scheduler)
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        path
    }

    fn add(&self, name: &str, path: &Path, frequency: Frequency) -> Task {
        self.store
            .add(
                NewTask {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                    category: None,
                    priority: Priority::Normal,
                    start_time: t0(),
                    end_time: t0() + Duration::days(30),
                    frequency,
                    magnitude: 1,
                    max_retries: None,
                    retry_delay: None,
                },
                false,
            )
            .unwrap()
    }

    fn task(&self, id: &str) -> Task {
        self.store.get(id).unwrap()
    }
}

fn never_cancelled() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    std::mem::forget(tx);
    rx
}

#[tokio::test]
async fn hourly_task_tick_bookkeeping() {
    let rig = Rig::new(|_| {});
    let task = rig.add("hourly", &rig.script("ok.sh", "echo done"), Frequency::Hourly);
    let mut engine = rig.engine();

    let tick_at = t0() + Duration::hours(1) + Duration::seconds(1);
    rig.clock.set(tick_at);
    let report = engine.tick();
    assert_eq!(report.dispatched, vec![task.id.clone()]);

    let after = rig.task(&task.id);
    assert_eq!(after.last_run, Some(tick_at));
    assert_eq!(after.next_run, t0() + Duration::hours(2) + Duration::seconds(1));
    assert_eq!(after.run_count, 1);

    engine.join_all().await;
    let done = rig.task(&task.id);
    assert_eq!(done.status, TaskStatus::Idle);
    assert_eq!(done.success_count, 1);
    assert!(done.last_error.is_empty());

    let records = rig.history.query(30);
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].exit_code, 0);
    assert_eq!(records[0].output, "done");
}

#[tokio::test]
async fn previous_trigger_anchor_keeps_cadence() {
    let rig = Rig::new(|c| {
        c.scheduler.next_run_anchor = hourglass_core::config::NextRunAnchor::PreviousTrigger;
    });
    let task = rig.add("cadence", &rig.script("ok.sh", "exit 0"), Frequency::Hourly);
    let mut engine = rig.engine();

    rig.clock.set(t0() + Duration::minutes(10));
    engine.tick();
    assert_eq!(rig.task(&task.id).next_run, t0() + Duration::hours(1));
    engine.join_all().await;
}

#[tokio::test]
async fn previous_trigger_anchor_skips_slots_missed_during_downtime() {
    let rig = Rig::new(|c| {
        c.scheduler.next_run_anchor = hourglass_core::config::NextRunAnchor::PreviousTrigger;
    });
    let task = rig.add("cadence", &rig.script("ok.sh", "exit 0"), Frequency::Hourly);
    let mut engine = rig.engine();

    let now = t0() + Duration::hours(10) + Duration::minutes(5);
    rig.clock.set(now);
    let mut dispatched = 0;
    for _ in 0..5 {
        dispatched += engine.tick().dispatched.len();
        engine.join_all().await;
    }

    assert_eq!(dispatched, 1);
    let after = rig.task(&task.id);
    assert_eq!(after.next_run, t0() + Duration::hours(11));
    assert_eq!(after.run_count, 1);
}

#[tokio::test]
async fn running_task_is_not_dispatched_again() {
    let rig = Rig::new(|_| {});
    let task = rig.add("slow", &rig.script("slow.sh", "sleep 2"), Frequency::Minutely);
    let mut engine = rig.engine();

    assert_eq!(engine.tick().dispatched.len(), 1);
    assert_eq!(rig.task(&task.id).status, TaskStatus::Running);

    // due again by the clock, but still in flight
    rig.clock.advance(Duration::minutes(5));
    let second = engine.tick();
    assert!(second.dispatched.is_empty());
    assert_eq!(engine.in_flight(), 1);
    assert!(engine.is_running(&task.id));

    engine.join_all().await;
    assert_eq!(rig.task(&task.id).run_count, 1);
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test]
async fn timeout_is_recorded_and_not_retried() {
    let rig = Rig::new(|c| c.scheduler.max_task_timeout_secs = 1);
    let task = rig.add("hang", &rig.script("hang.sh", "echo waiting\nsleep 30"), Frequency::Daily);
    let mut engine = rig.engine();

    let started = Instant::now();
    engine.tick();
    engine.join_all().await;
    assert!(started.elapsed() < StdDuration::from_secs(15));

    let after = rig.task(&task.id);
    assert_eq!(after.fail_count, 1);
    assert_eq!(after.current_retry, 0);
    assert_eq!(after.last_error, "Timeout (1s)");
    assert_eq!(after.next_run, t0() + Duration::days(1));
    assert_eq!(after.status, TaskStatus::Idle);

    let records = rig.history.query(30);
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].exit_code, -1);
    assert_eq!(records[0].error_message, "Timeout (1s)");
    assert_eq!(records[0].output, "waiting");
}

#[tokio::test]
async fn timeout_retries_when_enabled() {
    let rig = Rig::new(|c| {
        c.scheduler.max_task_timeout_secs = 1;
        c.scheduler.retry_on_timeout = true;
        c.scheduler.retry_delay_secs = 60;
    });
    let task = rig.add("hang", &rig.script("hang.sh", "sleep 30"), Frequency::Daily);
    let mut engine = rig.engine();

    engine.tick();
    engine.join_all().await;

    let after = rig.task(&task.id);
    assert_eq!(after.current_retry, 1);
    assert_eq!(after.next_run, t0() + Duration::seconds(60));
}

#[tokio::test]
async fn retries_exhaust_after_max_attempts() {
    let rig = Rig::new(|c| {
        c.scheduler.retry_max = 2;
        c.scheduler.retry_delay_secs = 30;
    });
    let task = rig.add("flaky", &rig.script("fail.sh", "exit 3"), Frequency::Daily);
    let worker = rig.worker();

    let record = worker.execute(task.clone(), never_cancelled()).await.unwrap();
    assert!(!record.success);
    assert_eq!(record.exit_code, 3);
    let after = rig.task(&task.id);
    assert_eq!(after.current_retry, 1);
    assert_eq!(after.next_run, t0() + Duration::seconds(30));
    assert_eq!(after.last_error, "Exit code: 3");

    worker.execute(task.clone(), never_cancelled()).await.unwrap();
    assert_eq!(rig.task(&task.id).current_retry, 2);

    worker.execute(task.clone(), never_cancelled()).await.unwrap();
    let after = rig.task(&task.id);
    assert_eq!(after.current_retry, 0);
    assert_eq!(after.fail_count, 3);
    assert_eq!(after.status, TaskStatus::Idle);
    assert_eq!(rig.history.task_history(&task.id, 30).len(), 3);
}

#[tokio::test]
async fn success_resets_retry_state() {
    let rig = Rig::new(|_| {});
    let task = rig.add("ok", &rig.script("ok.sh", "exit 0"), Frequency::Daily);
    rig.store
        .modify(&task.id, |t| {
            t.current_retry = 2;
            t.last_error = "Exit code: 1".into();
        })
        .unwrap();

    rig.worker().execute(task.clone(), never_cancelled()).await.unwrap();
    let after = rig.task(&task.id);
    assert_eq!(after.current_retry, 0);
    assert_eq!(after.success_count, 1);
    assert!(after.last_error.is_empty());
}

#[tokio::test]
async fn launch_failure_is_recorded_and_retried() {
    let rig = Rig::new(|c| {
        c.exec
            .interpreters
            .insert("zz".into(), vec!["/nonexistent/interpreter".into()]);
    });
    let task = rig.add("broken", &rig.script("job.zz", "echo never"), Frequency::Daily);

    let record = rig.worker().execute(task.clone(), never_cancelled()).await.unwrap();
    assert!(!record.success);
    assert_eq!(record.exit_code, -1);
    assert!(!record.error_message.is_empty());

    let after = rig.task(&task.id);
    assert_eq!(after.fail_count, 1);
    assert_eq!(after.current_retry, 1);
    assert_eq!(after.status, TaskStatus::Idle);
}

#[tokio::test]
async fn self_invocation_is_refused_without_a_record() {
    let rig = Rig::new(|_| {});
    let exe = rig.script("hourglass.sh", "exit 0");
    let task = rig.add("loop", &exe, Frequency::Daily);
    let worker = rig.worker().with_self_guard(SelfGuard::for_path(&exe));

    assert!(worker.execute(task.clone(), never_cancelled()).await.is_none());
    assert!(rig.history.query(30).is_empty());
    let after = rig.task(&task.id);
    assert_eq!(after.status, TaskStatus::Idle);
    assert_eq!(after.fail_count, 0);
}

#[tokio::test]
async fn expiry_is_edge_triggered() {
    let rig = Rig::new(|_| {});
    let task = rig.add("old", &rig.script("ok.sh", "exit 0"), Frequency::Daily);
    let mut engine = rig.engine();

    rig.clock.set(t0() + Duration::days(31));
    let first = engine.tick();
    assert_eq!(first.expired, vec![task.id.clone()]);
    assert!(first.dispatched.is_empty());
    assert_eq!(rig.task(&task.id).status, TaskStatus::Expired);

    let second = engine.tick();
    assert!(second.expired.is_empty());
    assert!(!second.changed());
}

#[tokio::test]
async fn paused_tasks_are_skipped() {
    let rig = Rig::new(|_| {});
    let task = rig.add("paused", &rig.script("ok.sh", "exit 0"), Frequency::Daily);
    rig.store.set_paused(&task.id, true).unwrap();
    let mut engine = rig.engine();

    assert!(engine.tick().dispatched.is_empty());
    assert_eq!(rig.task(&task.id).run_count, 0);
}

#[tokio::test]
async fn concurrency_limit_defers_extra_tasks() {
    let rig = Rig::new(|c| c.scheduler.max_concurrent_tasks = 1);
    let a = rig.add("a", &rig.script("a.sh", "sleep 1"), Frequency::Daily);
    let b = rig.add("b", &rig.script("b.sh", "sleep 1"), Frequency::Daily);
    let mut engine = rig.engine();

    let report = engine.tick();
    assert_eq!(report.dispatched, vec![a.id.clone()]);
    assert_eq!(report.deferred, 1);
    assert_eq!(rig.task(&b.id).run_count, 0);

    engine.join_all().await;
    let report = engine.tick();
    assert_eq!(report.dispatched, vec![b.id.clone()]);
    engine.join_all().await;
}

#[tokio::test]
async fn drain_kills_tasks_after_grace_period() {
    let rig = Rig::new(|c| c.scheduler.shutdown_grace_secs = 0);
    let task = rig.add("long", &rig.script("long.sh", "sleep 30"), Frequency::Daily);
    let mut engine = rig.engine();

    engine.tick();
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    let started = Instant::now();
    engine.drain().await;
    assert!(started.elapsed() < StdDuration::from_secs(10));
    assert_eq!(engine.in_flight(), 0);

    let after = rig.task(&task.id);
    assert_eq!(after.status, TaskStatus::Idle);
    assert_eq!(after.last_error, "Cancelled by shutdown");
    assert_eq!(after.current_retry, 0);

    let records = rig.history.query(30);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_message, "Cancelled by shutdown");
}

#[tokio::test]
async fn run_loop_dispatches_and_stops_on_signal() {
    let rig = Rig::new(|c| c.scheduler.poll_interval_secs = 1);
    let task = rig.add("loop", &rig.script("ok.sh", "exit 0"), Frequency::Daily);
    let engine = rig.engine();
    let (stop_tx, stop_rx) = watch::channel(false);

    let handle = tokio::spawn(engine.run(stop_rx));
    tokio::time::sleep(StdDuration::from_millis(500)).await;
    stop_tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(10), handle)
        .await
        .expect("engine stopped")
        .unwrap();

    let after = rig.task(&task.id);
    assert_eq!(after.run_count, 1);
    assert_eq!(after.status, TaskStatus::Idle);

    // the tick persisted its bookkeeping
    let reopened = TaskStore::open(
        TaskFile::new(rig.dir.path().join("tasks.json"), rig.dir.path().join("backups"), rig.clock.clone()),
        TaskDefaults::default(),
    );
    assert_eq!(reopened.get(&task.id).unwrap().run_count, 1);
}
