use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, Utc};
use hourglass_core::{fsutil::write_atomic, Clock};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    stats::{DurationRanking, FailureRanking, Statistics},
    types::ExecutionRecord,
};

const PARTITION_PREFIX: &str = "history_";
const PARTITION_SUFFIX: &str = ".json";

/// Appends execution records to monthly partitions and reads them back.
///
/// The recorder is the only writer of its directory. Appends are
/// read-modify-write of one partition, serialised by an internal lock and
/// published with an atomic rename.
pub struct HistoryRecorder {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl HistoryRecorder {
    /// Open (and create if needed) the history directory.
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            clock,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the partition holding records that started at `at`.
    pub fn partition_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{PARTITION_PREFIX}{}{PARTITION_SUFFIX}", month_key(at)))
    }

    /// Append `record` to its month's partition.
    ///
    /// Failures are logged, never returned: history must not stall a worker.
    pub fn add_record(&self, record: &ExecutionRecord) {
        if let Err(e) = self.try_add_record(record) {
            warn!(task_id = %record.task_id, record_id = %record.id, "history write failed: {e}");
        }
    }

    /// Like [`add_record`](Self::add_record) but surfaces the error.
    pub fn try_add_record(&self, record: &ExecutionRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.partition_path(record.start_time);

        let mut records = if path.exists() {
            match read_partition(&path) {
                Ok(records) => records,
                Err(e) => {
                    // The partition is only replaced once the bad copy is safely aside.
                    let quarantine = self.quarantine_path(&path);
                    fs::rename(&path, &quarantine)?;
                    warn!(
                        path = %path.display(),
                        moved_to = %quarantine.display(),
                        "unreadable history partition moved aside: {e}"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        records.push(record.clone());

        let bytes = serde_json::to_vec_pretty(&records)?;
        write_atomic(&path, &bytes)?;
        debug!(path = %path.display(), count = records.len(), "history partition written");
        Ok(())
    }

    /// All records that started within the last `days` days, newest first.
    pub fn query(&self, days: u32) -> Vec<ExecutionRecord> {
        let cutoff = self.window_start(days);
        let cutoff_month = month_key(cutoff);

        let mut records: Vec<ExecutionRecord> = self
            .partitions()
            .into_iter()
            .filter(|(month, _)| *month >= cutoff_month)
            .filter_map(|(_, path)| match read_partition(&path) {
                Ok(records) => Some(records),
                Err(e) => {
                    warn!(path = %path.display(), "skipping unreadable history partition: {e}");
                    None
                }
            })
            .flatten()
            .filter(|r| r.start_time >= cutoff)
            .collect();

        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        records
    }

    /// Records of one task within the window, newest first.
    pub fn task_history(&self, task_id: &str, days: u32) -> Vec<ExecutionRecord> {
        self.query(days)
            .into_iter()
            .filter(|r| r.task_id == task_id)
            .collect()
    }

    pub fn statistics(&self, days: u32) -> Statistics {
        Statistics::from_records(days, &self.query(days))
    }

    pub fn most_failed(&self, days: u32, limit: usize) -> Vec<FailureRanking> {
        self.statistics(days).most_failed(limit)
    }

    pub fn longest_running(&self, days: u32, limit: usize) -> Vec<DurationRanking> {
        self.statistics(days).longest_running(limit)
    }

    /// Delete whole partitions whose month is strictly before the month of
    /// `now - keep_days`. Returns the number of partitions removed.
    pub fn cleanup(&self, keep_days: u32) -> usize {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff_month = month_key(self.window_start(keep_days));

        let mut removed = 0;
        for (month, path) in self.partitions() {
            if month >= cutoff_month {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "old history partition deleted");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), "failed to delete history partition: {e}"),
            }
        }
        removed
    }

    /// `now - days`, or the earliest representable instant when the window
    /// reaches past it.
    fn window_start(&self, days: u32) -> DateTime<Utc> {
        self.clock
            .now()
            .checked_sub_signed(Duration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// `history_YYYYMM.json.corrupt-<stamp>`; never clobbers an earlier one.
    fn quarantine_path(&self, path: &Path) -> PathBuf {
        let stamp = self.clock.now().format("%Y%m%d_%H%M%S");
        let base = path.with_extension(format!("json.corrupt-{stamp}"));
        let mut candidate = base.clone();
        let mut n = 1;
        while candidate.exists() {
            candidate = PathBuf::from(format!("{}.{n}", base.display()));
            n += 1;
        }
        candidate
    }

    /// `(YYYYMM, path)` for every partition file, unordered.
    fn partitions(&self) -> Vec<(String, PathBuf)> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), "cannot list history directory: {e}");
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let month = parse_partition_name(&name)?;
                Some((month, entry.path()))
            })
            .collect()
    }
}

fn month_key(at: DateTime<Utc>) -> String {
    format!("{:04}{:02}", at.year(), at.month())
}

/// `history_YYYYMM.json` → `YYYYMM`.
fn parse_partition_name(name: &str) -> Option<String> {
    let month = name
        .strip_prefix(PARTITION_PREFIX)?
        .strip_suffix(PARTITION_SUFFIX)?;
    let valid = month.len() == 6
        && month.bytes().all(|b| b.is_ascii_digit())
        && matches!(month[4..].parse::<u32>(), Ok(1..=12));
    valid.then(|| month.to_string())
}

/// Parse one partition. Individual malformed records are dropped; a file
/// that is not a JSON array at all is an error.
fn read_partition(path: &Path) -> Result<Vec<ExecutionRecord>> {
    let raw = fs::read(path)?;
    let values: Vec<serde_json::Value> = serde_json::from_slice(&raw)?;
    let total = values.len();
    let records: Vec<ExecutionRecord> = values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();
    if records.len() < total {
        warn!(
            path = %path.display(),
            skipped = total - records.len(),
            "malformed history records skipped"
        );
    }
    Ok(records)
}
