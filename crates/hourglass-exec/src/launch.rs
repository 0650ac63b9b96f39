//! Builds the `Command` for a task target.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::guard::apply_worker_env;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Resolve the argv for `target`: `<interpreter...> <target>` when the
/// extension has a launcher entry, otherwise the target alone.
pub fn argv_for(target: &Path, interpreters: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let target_str = target.to_string_lossy().into_owned();
    let launcher = target
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .and_then(|ext| interpreters.get(&ext))
        .filter(|argv| !argv.is_empty());

    match launcher {
        Some(prefix) => {
            let mut argv = prefix.clone();
            argv.push(target_str);
            argv
        }
        None => vec![target_str],
    }
}

/// Build a ready-to-spawn command for `target`.
///
/// stdout and stderr are piped, stdin is closed, the working directory is the
/// target's parent. On Unix the child leads its own process group so a kill
/// reaches every process it started.
pub fn build_command(target: &Path, interpreters: &BTreeMap<String, Vec<String>>) -> Command {
    let argv = argv_for(target, interpreters);
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(parent) = target.parent().filter(|p| p.is_dir()) {
        cmd.current_dir(parent);
    }

    apply_worker_env(&mut cmd);

    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    cmd
}
