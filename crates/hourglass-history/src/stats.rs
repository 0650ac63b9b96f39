//! Rolling aggregates over execution records. Derived on demand, never stored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::ExecutionRecord;

/// Per-task breakdown inside a [`Statistics`] snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Name from the most recent record of this task.
    pub name: String,
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    /// Seconds.
    pub total_duration: f64,
}

impl TaskStats {
    pub fn failure_rate(&self) -> f64 {
        percentage(self.failed, self.total)
    }

    pub fn avg_duration(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.total_duration / self.total as f64
        }
    }
}

/// Aggregate over a rolling window of days.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub days: u32,
    pub total_runs: u64,
    pub success: u64,
    pub failed: u64,
    /// Percentage in `0.0..=100.0`; zero when there were no runs.
    pub success_rate: f64,
    /// Seconds.
    pub total_duration: f64,
    /// Seconds.
    pub avg_duration: f64,
    /// Keyed by task id.
    pub per_task: BTreeMap<String, TaskStats>,
}

impl Statistics {
    /// Aggregate `records`, which are expected newest-first.
    pub fn from_records(days: u32, records: &[ExecutionRecord]) -> Self {
        let mut stats = Statistics {
            days,
            ..Default::default()
        };

        for record in records {
            stats.total_runs += 1;
            stats.total_duration += record.duration;

            let entry = stats
                .per_task
                .entry(record.task_id.clone())
                .or_insert_with(|| TaskStats {
                    name: record.task_name.clone(),
                    ..Default::default()
                });
            entry.total += 1;
            entry.total_duration += record.duration;

            if record.success {
                stats.success += 1;
                entry.success += 1;
            } else {
                stats.failed += 1;
                entry.failed += 1;
            }
        }

        stats.success_rate = percentage(stats.success, stats.total_runs);
        if stats.total_runs > 0 {
            stats.avg_duration = stats.total_duration / stats.total_runs as f64;
        }
        stats
    }

    /// Tasks with at least one failure, highest failure rate first.
    pub fn most_failed(&self, limit: usize) -> Vec<FailureRanking> {
        let mut ranked: Vec<FailureRanking> = self
            .per_task
            .iter()
            .filter(|(_, s)| s.failed > 0)
            .map(|(id, s)| FailureRanking {
                task_id: id.clone(),
                name: s.name.clone(),
                failed: s.failed,
                total: s.total,
                failure_rate: s.failure_rate(),
            })
            .collect();
        ranked.sort_by(|a, b| b.failure_rate.total_cmp(&a.failure_rate));
        ranked.truncate(limit);
        ranked
    }

    /// Tasks ordered by average run time, slowest first.
    pub fn longest_running(&self, limit: usize) -> Vec<DurationRanking> {
        let mut ranked: Vec<DurationRanking> = self
            .per_task
            .iter()
            .map(|(id, s)| DurationRanking {
                task_id: id.clone(),
                name: s.name.clone(),
                avg_duration: s.avg_duration(),
                total_runs: s.total,
            })
            .collect();
        ranked.sort_by(|a, b| b.avg_duration.total_cmp(&a.avg_duration));
        ranked.truncate(limit);
        ranked
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRanking {
    pub task_id: String,
    pub name: String,
    pub failed: u64,
    pub total: u64,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationRanking {
    pub task_id: String,
    pub name: String,
    pub avg_duration: f64,
    pub total_runs: u64,
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
