//! `hourglass-scheduler`: polling task scheduler with durable JSON storage.
//!
//! # Overview
//!
//! Tasks live in a single JSON file owned by [`TaskStore`]. The
//! [`SchedulerEngine`] wakes every poll interval, expires tasks past their
//! window and hands each due task to a [`TaskWorker`] running concurrently.
//! The worker launches the target through `hourglass-exec`, books the outcome
//! (counters, [`retry`] policy) and appends an execution record to
//! `hourglass-history`.
//!
//! # Frequencies
//!
//! | Kind           | Gap between runs              |
//! |----------------|-------------------------------|
//! | `minutely`     | `magnitude` minutes           |
//! | `hourly`       | `magnitude` hours             |
//! | `times_per_day`| `24 / magnitude` hours        |
//! | `daily`        | `magnitude` days              |
//! | `weekly`       | `magnitude` weeks             |

pub mod engine;
pub mod error;
pub mod events;
pub mod file;
pub mod retry;
pub mod schedule;
pub mod store;
pub mod types;
pub mod worker;

pub use engine::{SchedulerEngine, TickReport};
pub use error::{Result, SchedulerError};
pub use events::{EventBus, TaskEvents};
pub use file::TaskFile;
pub use store::{ImportReport, SkippedImport, TaskStore};
pub use types::{Frequency, NewTask, Priority, StoredTask, Task, TaskDefaults, TaskStatus};
pub use worker::TaskWorker;
