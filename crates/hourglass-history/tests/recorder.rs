use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use hourglass_core::ManualClock;
use hourglass_history::{ExecutionRecord, HistoryRecorder};

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

fn record(task: &str, start: DateTime<Utc>, success: bool, secs: i64) -> ExecutionRecord {
    let mut r = ExecutionRecord::new(task, format!("{task} job"), start, start + Duration::seconds(secs));
    r.success = success;
    r.exit_code = if success { 0 } else { 2 };
    if !success {
        r.error_message = "Exit code: 2".into();
    }
    r
}

fn recorder(dir: &std::path::Path, now: DateTime<Utc>) -> (HistoryRecorder, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    let rec = HistoryRecorder::new(dir, clock.clone()).unwrap();
    (rec, clock)
}

#[test]
fn records_land_in_their_start_month_partition() {
    let dir = tempfile::tempdir().unwrap();
    let (rec, _) = recorder(dir.path(), at(2025, 3, 10));

    rec.add_record(&record("a", at(2025, 2, 27), true, 1));
    rec.add_record(&record("a", at(2025, 3, 2), true, 1));

    assert!(dir.path().join("history_202502.json").exists());
    assert!(dir.path().join("history_202503.json").exists());
}

#[test]
fn query_is_windowed_and_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let (rec, _) = recorder(dir.path(), at(2025, 3, 20));

    rec.add_record(&record("a", at(2025, 3, 1), true, 1));
    rec.add_record(&record("b", at(2025, 3, 18), false, 1));
    rec.add_record(&record("a", at(2025, 3, 15), true, 1));
    // outside a 10-day window
    rec.add_record(&record("c", at(2025, 2, 1), true, 1));

    let recent = rec.query(10);
    let starts: Vec<_> = recent.iter().map(|r| r.start_time).collect();
    assert_eq!(starts, vec![at(2025, 3, 18), at(2025, 3, 15)]);

    let all = rec.query(60);
    assert_eq!(all.len(), 4);
    assert_eq!(all.last().unwrap().task_id, "c");

    let only_a = rec.task_history("a", 60);
    assert_eq!(only_a.len(), 2);
    assert!(only_a.iter().all(|r| r.task_id == "a"));
}

#[test]
fn statistics_and_rankings_cover_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let (rec, _) = recorder(dir.path(), at(2025, 6, 30));

    rec.add_record(&record("fast", at(2025, 6, 29), true, 2));
    rec.add_record(&record("fast", at(2025, 6, 28), true, 4));
    rec.add_record(&record("flaky", at(2025, 6, 27), false, 10));
    rec.add_record(&record("flaky", at(2025, 6, 26), true, 30));

    let stats = rec.statistics(7);
    assert_eq!(stats.total_runs, 4);
    assert_eq!(stats.failed, 1);
    assert!((stats.success_rate - 75.0).abs() < 1e-9);
    assert!((stats.avg_duration - 11.5).abs() < 1e-9);

    let failed = rec.most_failed(7, 10);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].task_id, "flaky");
    assert_eq!(failed[0].name, "flaky job");

    let slow = rec.longest_running(7, 1);
    assert_eq!(slow.len(), 1);
    assert_eq!(slow[0].task_id, "flaky");
}

#[test]
fn unreadable_partition_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (rec, _) = recorder(dir.path(), at(2025, 3, 20));

    rec.add_record(&record("a", at(2025, 3, 19), true, 1));
    std::fs::write(dir.path().join("history_202502.json"), b"{ not json").unwrap();

    let records = rec.query(60);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task_id, "a");
}

#[test]
fn unreadable_current_partition_is_moved_aside_before_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let (rec, clock) = recorder(dir.path(), at(2025, 3, 20));
    let path = rec.partition_path(at(2025, 3, 19));

    std::fs::write(&path, b"{ first broken copy").unwrap();
    rec.try_add_record(&record("a", at(2025, 3, 19), true, 1)).unwrap();

    clock.advance(Duration::seconds(1));
    std::fs::write(&path, b"{ second broken copy").unwrap();
    rec.try_add_record(&record("b", at(2025, 3, 19), true, 1)).unwrap();

    let mut kept: Vec<Vec<u8>> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().contains(".json.corrupt-"))
        .map(|p| std::fs::read(p).unwrap())
        .collect();
    kept.sort();
    assert_eq!(
        kept,
        vec![b"{ first broken copy".to_vec(), b"{ second broken copy".to_vec()]
    );

    let records = rec.query(30);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task_id, "b");
}

#[test]
fn oversized_windows_cover_all_history() {
    let dir = tempfile::tempdir().unwrap();
    let (rec, _) = recorder(dir.path(), at(2025, 3, 20));
    rec.add_record(&record("a", at(1999, 7, 1), false, 3));
    rec.add_record(&record("a", at(2025, 3, 19), true, 1));

    assert_eq!(rec.query(u32::MAX).len(), 2);
    assert_eq!(rec.statistics(u32::MAX).total_runs, 2);
    assert_eq!(rec.cleanup(u32::MAX), 0);
    assert_eq!(rec.cleanup(200_000_000), 0);
    assert!(dir.path().join("history_199907.json").exists());
}

#[test]
fn malformed_records_are_dropped_individually() {
    let dir = tempfile::tempdir().unwrap();
    let (rec, _) = recorder(dir.path(), at(2025, 3, 20));

    rec.add_record(&record("good", at(2025, 3, 19), true, 1));
    let path = rec.partition_path(at(2025, 3, 19));
    let mut values: Vec<serde_json::Value> =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    values.push(serde_json::json!({ "id": "broken" }));
    std::fs::write(&path, serde_json::to_vec(&values).unwrap()).unwrap();

    let records = rec.query(30);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task_id, "good");
}

#[test]
fn cleanup_removes_only_whole_old_months() {
    let dir = tempfile::tempdir().unwrap();
    let (rec, clock) = recorder(dir.path(), at(2024, 11, 1));

    rec.add_record(&record("a", at(2024, 11, 1), true, 1));
    rec.add_record(&record("a", at(2024, 12, 5), true, 1));
    rec.add_record(&record("a", at(2025, 1, 3), true, 1));
    rec.add_record(&record("a", at(2025, 2, 14), true, 1));

    // cutoff 2025-01-15 falls in January: November and December go
    clock.set(at(2025, 2, 14));
    let removed = rec.cleanup(30);

    assert_eq!(removed, 2);
    assert!(!dir.path().join("history_202411.json").exists());
    assert!(!dir.path().join("history_202412.json").exists());
    assert!(dir.path().join("history_202501.json").exists());
    assert!(dir.path().join("history_202502.json").exists());

    // nothing else to do on a second pass
    assert_eq!(rec.cleanup(30), 0);
}

#[test]
fn concurrent_appends_are_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let (rec, _) = recorder(dir.path(), at(2025, 4, 30));
    let rec = Arc::new(rec);

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let rec = Arc::clone(&rec);
            thread::spawn(move || {
                for i in 0..10 {
                    let start = at(2025, 4, 20) + Duration::minutes(n * 10 + i);
                    rec.add_record(&record(&format!("t{n}"), start, true, 1));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(rec.query(30).len(), 80);
}
