//! `hourglass-history`: durable audit trail of task executions.
//!
//! # Overview
//!
//! Every finished run produces one immutable [`ExecutionRecord`]. Records are
//! grouped into one JSON file per calendar month (`history_YYYYMM.json`);
//! [`HistoryRecorder`] appends to the right partition, answers windowed
//! queries, aggregates [`Statistics`] and sweeps old partitions.
//!
//! History is best-effort: a write failure is logged and swallowed, a
//! corrupt partition is skipped on read. Scheduling never waits on it.

pub mod error;
pub mod recorder;
pub mod stats;
pub mod types;

pub use error::{HistoryError, Result};
pub use recorder::HistoryRecorder;
pub use stats::{DurationRanking, FailureRanking, Statistics, TaskStats};
pub use types::ExecutionRecord;
