//! Launch guards.
//!
//! Two failure modes are blocked here:
//!   1. A task whose target *is* the scheduler binary. Launching it would
//!      start a second scheduler over the same task store.
//!   2. A child that inherits module-search-path variables pointing at the
//!      scheduler's own code. Spawned children are marked with
//!      [`WORKER_MODE_VAR`] and those variables are removed.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::warn;

use crate::error::{ExecError, Result};

/// Set to `"true"` in every spawned child's environment.
pub const WORKER_MODE_VAR: &str = "HOURGLASS_WORKER_MODE";

/// Module search path variables removed from a child's environment.
pub const STRIPPED_VARS: &[&str] = &[
    "PYTHONPATH",
    "PYTHONHOME",
    "PYTHONSTARTUP",
    "PERL5LIB",
    "RUBYLIB",
    "NODE_PATH",
];

/// `true` when this process was itself spawned by a scheduler.
pub fn is_worker_process() -> bool {
    std::env::var(WORKER_MODE_VAR).is_ok_and(|v| v == "true")
}

/// Apply the worker-mode marker and strip inherited search paths.
pub fn apply_worker_env(cmd: &mut Command) {
    cmd.env(WORKER_MODE_VAR, "true");
    for var in STRIPPED_VARS {
        cmd.env_remove(var);
    }
}

/// Check that `path` is usable as a task target and return its canonical form.
pub fn validate_target(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(ExecError::InvalidTarget(format!(
            "{} is not an absolute path",
            path.display()
        )));
    }
    let canonical = path
        .canonicalize()
        .map_err(|e| ExecError::InvalidTarget(format!("{}: {e}", path.display())))?;
    if !canonical.is_file() {
        return Err(ExecError::InvalidTarget(format!(
            "{} is not a file",
            canonical.display()
        )));
    }
    Ok(canonical)
}

/// Rejects targets that resolve to the scheduler's own executable.
#[derive(Debug, Clone)]
pub struct SelfGuard {
    own_exe: Option<PathBuf>,
}

impl SelfGuard {
    /// Guard against the currently running executable.
    pub fn current() -> Self {
        let own_exe = std::env::current_exe()
            .and_then(|p| p.canonicalize())
            .map_err(|e| warn!("cannot resolve own executable, self-invocation guard disabled: {e}"))
            .ok();
        Self { own_exe }
    }

    /// Guard against an explicit path (tests, embedding).
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            own_exe: Some(path.canonicalize().unwrap_or_else(|_| path.to_path_buf())),
        }
    }

    pub fn is_self(&self, target: &Path) -> bool {
        let Some(own) = &self.own_exe else {
            return false;
        };
        let resolved = target
            .canonicalize()
            .unwrap_or_else(|_| target.to_path_buf());
        &resolved == own
    }

    /// `Err(SelfInvocation)` when `target` is the scheduler itself.
    pub fn check(&self, target: &Path) -> Result<()> {
        if self.is_self(target) {
            return Err(ExecError::SelfInvocation {
                path: target.to_path_buf(),
            });
        }
        Ok(())
    }
}
