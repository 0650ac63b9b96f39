//! hourglass-exec: launches task targets as child processes.
//!
//! One call to [`ProcessRunner::run`] covers the whole life of a child:
//! - launch through an interpreter chosen by file extension (`launch`)
//! - stdout and stderr merged into one line stream, forwarded in real time
//! - bounded capture of the most recent lines (`capture`)
//! - one hard wall-clock deadline for streaming and exit, then SIGKILL
//! - cooperative shutdown: a cancel signal kills the child mid-read
//!
//! [`guard`] keeps the scheduler from launching itself and marks spawned
//! children with a worker-mode environment variable.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use hourglass_exec::{ProcessRunner, RunOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = ProcessRunner::new(RunOptions::default());
//!     let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//!     let outcome = runner
//!         .run(Path::new("/opt/jobs/nightly.sh"), stop_rx, |line| println!("{line}"))
//!         .await
//!         .unwrap();
//!     println!("{:?}", outcome.exit);
//! }
//! ```

pub mod capture;
pub mod error;
pub mod guard;
pub mod launch;
pub mod runner;
pub mod types;

pub use error::{ExecError, Result};
pub use guard::SelfGuard;
pub use runner::ProcessRunner;
pub use types::{ExitKind, ProcessOutcome, RunOptions};
