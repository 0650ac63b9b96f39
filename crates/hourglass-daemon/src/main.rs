use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hourglass_core::{Clock, HourglassConfig, HourglassError, SystemClock};
use hourglass_exec::guard::{is_worker_process, WORKER_MODE_VAR};
use hourglass_history::HistoryRecorder;
use hourglass_scheduler::{EventBus, SchedulerEngine, TaskDefaults, TaskFile, TaskStore, TaskWorker};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod sink;

/// Hourglass: runs scripts and programs on a recurring schedule.
#[derive(Parser)]
#[command(name = "hourglass", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted (default).
    Run,

    /// Print execution statistics as JSON.
    Stats {
        /// Rolling window in days.
        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// Delete history partitions older than the retention window.
    Cleanup,

    /// Add tasks from an exported JSON file.
    Import {
        file: PathBuf,
        /// Add tasks even when their name or target already exists.
        #[arg(long)]
        allow_duplicates: bool,
    },

    /// Write all tasks to a JSON file.
    Export { file: PathBuf },
}

/// Long-lived pieces shared by every command.
struct App {
    config: HourglassConfig,
    clock: Arc<dyn Clock>,
    store: Arc<TaskStore>,
    history: Arc<HistoryRecorder>,
}

impl App {
    fn open(config: HourglassConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let tasks_path = config.storage.tasks_path();
        if let Some(parent) = tasks_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating task store directory {}", parent.display()))?;
        }
        let backups = config.storage.backups_dir();
        std::fs::create_dir_all(&backups)
            .with_context(|| format!("creating backup directory {}", backups.display()))?;

        let history_dir = config.history.dir();
        let history = HistoryRecorder::new(&history_dir, Arc::clone(&clock))
            .with_context(|| format!("creating history directory {}", history_dir.display()))?;

        let file = TaskFile::from_config(&config.storage, Arc::clone(&clock));
        let store = TaskStore::open(file, TaskDefaults::from_config(&config.scheduler));
        info!(path = %tasks_path.display(), tasks = store.len(), "task store opened");

        Ok(Self {
            config,
            clock,
            store: Arc::new(store),
            history: Arc::new(history),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "hourglass=info,hourglass_core=info,hourglass_scheduler=info,hourglass_exec=info,hourglass_history=info",
            )
        }))
        .init();

    let cli = Cli::parse();

    if is_worker_process() {
        anyhow::bail!("{WORKER_MODE_VAR} is set: refusing to start a scheduler from inside a task");
    }

    let config = match HourglassConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e @ HourglassError::InvalidSetting { .. }) => return Err(e.into()),
        Err(e) => {
            warn!("Config load failed ({e}), using defaults");
            HourglassConfig::default()
        }
    };

    let app = App::open(config)?;
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(app).await,
        Command::Stats { days } => print_stats(&app, days),
        Command::Cleanup => {
            let removed = app.history.cleanup(app.config.history.keep_days);
            println!("removed {removed} history partition(s)");
            Ok(())
        }
        Command::Import {
            file,
            allow_duplicates,
        } => {
            let report = app.store.import_file(&file, allow_duplicates)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Export { file } => {
            let count = app.store.export_file(&file)?;
            println!("exported {count} task(s) to {}", file.display());
            Ok(())
        }
    }
}

async fn run(app: App) -> anyhow::Result<()> {
    info!("Hourglass v{}", env!("CARGO_PKG_VERSION"));

    let removed = app.history.cleanup(app.config.history.keep_days);
    let pruned = app.store.file().prune_backups();
    info!(history_partitions_removed = removed, snapshots_pruned = pruned, "startup housekeeping done");

    let events = Arc::new(EventBus::new());
    events.register(Arc::new(sink::TracingEvents));

    let worker = TaskWorker::new(
        Arc::clone(&app.store),
        Arc::clone(&app.history),
        events,
        Arc::clone(&app.clock),
        &app.config,
    );
    let engine = SchedulerEngine::new(worker, &app.config.scheduler);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    wait_for_signal().await;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    if let Err(e) = engine_task.await {
        error!("scheduler engine task failed: {e}");
    }

    app.store.persist().context("final task save")?;
    if app.config.storage.backup_on_exit {
        match app.store.backup_now() {
            Ok(Some(path)) => info!(path = %path.display(), "exit snapshot written"),
            Ok(None) => {}
            Err(e) => warn!("exit snapshot failed: {e}"),
        }
    }
    info!("Hourglass stopped");
    Ok(())
}

fn print_stats(app: &App, days: u32) -> anyhow::Result<()> {
    let stats = app.history.statistics(days);
    let report = serde_json::json!({
        "statistics": stats,
        "most_failed": stats.most_failed(5),
        "longest_running": stats.longest_running(5),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("cannot listen for SIGTERM: {e}"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default_command() {
        let cli = Cli::try_parse_from(["hourglass"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["hourglass", "-c", "/etc/hourglass.toml", "stats", "--days", "7"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/etc/hourglass.toml"));
        assert!(matches!(cli.command, Some(Command::Stats { days: 7 })));

        let cli = Cli::try_parse_from(["hourglass", "import", "tasks.json", "--allow-duplicates"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Import { allow_duplicates: true, .. })
        ));
    }
}
