//! `hourglass-core`: configuration, clock and error types shared by every
//! Hourglass crate.

pub mod clock;
pub mod config;
pub mod error;
pub mod fsutil;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HourglassConfig;
pub use error::{HourglassError, Result};
