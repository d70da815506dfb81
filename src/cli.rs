//! Rewind command line
//!
//! Thin wrapper over the library: every command prints one structured
//! result (JSON by default) and maps failures to process exit codes.

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use crate::checkpoint::{CheckpointId, DirectorySource, FileSnapshots};
use crate::config::Config;
use crate::errors::{RewindError, SyncError};
use crate::observability::telemetry::init_tracing;
use crate::state::{SessionPointer, SessionStore};
use crate::sync::{
    generate_backup_id, loop_control, BackupMetadata, DiffStatus, FileDiff, FileSynchronizer,
    RestorationResult, RestoreStatus, RollbackResult, SyncDaemon, TickReport,
};
use crate::validation::{RestorationValidator, ValidationReport};

#[derive(Parser)]
#[command(name = "rewind")]
#[command(about = "Restore agent checkpoints into a workspace without losing local edits")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Workspace root (overrides config)
    #[arg(short, long, value_name = "DIR", global = true)]
    workspace: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "json", global = true)]
    output_format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON for scripting (default)
    #[default]
    Json,
    /// Human-readable summary
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore file snapshots into the workspace, backing up conflicting files
    Restore {
        /// JSON object of path to content, or @file containing one
        #[arg(long, value_name = "JSON|@FILE")]
        snapshots: String,

        /// Backup id for this restoration (generated when omitted)
        #[arg(long)]
        backup_id: Option<String>,

        /// Checkpoint the snapshots belong to, for the validation report
        #[arg(long, default_value = "manual")]
        checkpoint_id: String,

        /// Proceed even when validation reports warnings
        #[arg(short, long)]
        yes: bool,

        /// Skip validation entirely
        #[arg(long)]
        force: bool,
    },

    /// Put back the files saved by an earlier restoration
    Rollback {
        #[arg(long)]
        backup_id: String,
    },

    /// Preview what restoring one file would change
    Diff {
        /// Workspace-relative or absolute file path
        #[arg(long)]
        file: String,

        /// Snapshot content, or @file containing it
        #[arg(long, value_name = "CONTENT|@FILE")]
        snapshot: String,
    },

    /// Run the pre-flight checks without touching any file
    Validate {
        /// JSON object of path to content, or @file containing one
        #[arg(long, value_name = "JSON|@FILE")]
        snapshots: String,

        #[arg(long, default_value = "manual")]
        checkpoint_id: String,
    },

    /// List backup sets, newest first
    Backups,

    /// Show the session pointer
    Status,

    /// Follow the checkpoint store until interrupted
    Watch {
        /// Poll interval in seconds (overrides config)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,

        /// Session to follow (overrides the stored pointer and config)
        #[arg(long)]
        session: Option<String>,
    },

    /// Run a single change-detection tick
    SyncOnce {
        /// Session to check (overrides the stored pointer and config)
        #[arg(long)]
        session: Option<String>,
    },
}

pub async fn run() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{}", e);
            return Ok(());
        }
        Err(e) => return Err(RewindError::Usage(e.to_string().trim_end().to_string()).into()),
    };

    init_tracing(cli.verbose);

    if cli.no_color || std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(workspace) = cli.workspace {
        config.workspace = workspace;
    }
    let format = cli.output_format;

    match cli.command {
        Commands::Restore {
            snapshots,
            backup_id,
            checkpoint_id,
            yes,
            force,
        } => {
            let snapshots = parse_snapshots(&snapshots)?;

            if !force {
                let report = RestorationValidator::from_config(&config)
                    .validate(&CheckpointId::new(checkpoint_id), &snapshots);
                if let Err(refusal) = report.ensure_allowed(yes) {
                    emit(format, &report, render_report)?;
                    return Err(RewindError::Validation(refusal).into());
                }
                for warning in &report.warnings {
                    tracing::warn!(warning = %warning, "Restoring despite validation warning");
                }
            }

            let backup_id = backup_id.unwrap_or_else(generate_backup_id);
            let synchronizer = synchronizer(&config);
            let result = tokio::task::spawn_blocking(move || {
                synchronizer.restore(&snapshots, &backup_id)
            })
            .await
            .map_err(|e| RewindError::Sync(SyncError::Aborted(e.to_string())))?
            .map_err(RewindError::Sync)?;

            emit(format, &result, render_restoration)?;
        }

        Commands::Rollback { backup_id } => {
            if backup_id.trim().is_empty() {
                return Err(RewindError::Usage("--backup-id must not be empty".to_string()).into());
            }
            let result = synchronizer(&config).rollback(&backup_id);
            emit(format, &result, render_rollback)?;
            if !result.success {
                anyhow::bail!(
                    "Rollback of {} failed: {}",
                    backup_id,
                    result.error.as_deref().unwrap_or("see failures above")
                );
            }
        }

        Commands::Diff { file, snapshot } => {
            let snapshot = read_arg(&snapshot)?;
            let diff = synchronizer(&config).diff(&file, &snapshot);
            emit(format, &diff, render_diff)?;
        }

        Commands::Validate {
            snapshots,
            checkpoint_id,
        } => {
            let snapshots = parse_snapshots(&snapshots)?;
            let report = RestorationValidator::from_config(&config)
                .validate(&CheckpointId::new(checkpoint_id), &snapshots);
            emit(format, &report, render_report)?;
        }

        Commands::Backups => {
            let backups = synchronizer(&config).list_backups();
            emit(format, &backups, |b| render_backups(b))?;
        }

        Commands::Status => {
            let pointer = SessionStore::new(config.session_file())
                .load()
                .map_err(RewindError::State)?;
            emit(format, &pointer, render_pointer)?;
        }

        Commands::Watch { interval, session } => {
            if let Some(secs) = interval {
                config.sync.poll_interval_secs = secs;
            }
            if session.is_some() {
                config.sync.session = session;
            }
            config.validate()?;

            let source = DirectorySource::new(config.checkpoint_store());
            let mut daemon = SyncDaemon::new(source, &config);
            let (handle, control) = loop_control();

            tokio::spawn(async move {
                shutdown_signal().await;
                eprintln!("\nReceived shutdown signal, stopping after the current tick...");
                handle.stop();
            });

            if format == OutputFormat::Text {
                println!(
                    "{} Watching session {} every {}s",
                    "●".green(),
                    daemon.session_id().bold(),
                    config.sync.poll_interval_secs
                );
            }
            daemon.run(control).await?;
        }

        Commands::SyncOnce { session } => {
            if session.is_some() {
                config.sync.session = session;
            }
            config.validate()?;

            let source = DirectorySource::new(config.checkpoint_store());
            let mut daemon = SyncDaemon::new(source, &config);
            let tick = daemon.tick().await?;
            emit(format, &tick, render_tick)?;
        }
    }

    Ok(())
}

fn synchronizer(config: &Config) -> FileSynchronizer {
    FileSynchronizer::new(&config.workspace, &config.storage.backup_dir)
}

/// Literal value, or the contents of the file named after a leading `@`
fn read_arg(value: &str) -> Result<String> {
    match value.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            RewindError::Usage(format!("Cannot read {}: {}", path, e)).into()
        }),
        None => Ok(value.to_string()),
    }
}

fn parse_snapshots(value: &str) -> Result<FileSnapshots> {
    let json = read_arg(value)?;
    serde_json::from_str(&json).map_err(|e| {
        RewindError::Usage(format!(
            "--snapshots must be a JSON object mapping paths to contents: {}",
            e
        ))
        .into()
    })
}

fn emit<T: Serialize + ?Sized>(
    format: OutputFormat,
    value: &T,
    render: impl Fn(&T) -> String,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => print!("{}", render(value)),
    }
    Ok(())
}

fn render_restoration(result: &RestorationResult) -> String {
    let status = match result.status() {
        RestoreStatus::Complete => "complete".green(),
        RestoreStatus::Partial => "partial".yellow(),
        RestoreStatus::Failed => "failed".red(),
    };
    let mut out = format!(
        "{} Restoration {} ({})\n",
        "↺".cyan(),
        result.backup_id.bold(),
        status
    );
    for file in &result.files_restored {
        let marker = if result.files_backed_up.contains(file) {
            "backed up".yellow()
        } else {
            "written".dimmed()
        };
        out.push_str(&format!("  {} {} [{}]\n", "✓".green(), file, marker));
    }
    for failure in result.failures() {
        if let crate::sync::FileOutcome::Failed { path, error } = failure {
            out.push_str(&format!("  {} {}: {}\n", "✗".red(), path, error));
        }
    }
    if !result.conflicts.is_empty() {
        out.push_str(&format!(
            "{} conflict(s), previous versions in {}\n",
            result.conflicts.len(),
            result.backup_path.display()
        ));
    }
    out
}

fn render_rollback(result: &RollbackResult) -> String {
    let mut out = if result.success {
        format!("{} Rolled back {}\n", "✓".green(), result.backup_id.bold())
    } else {
        format!(
            "{} Rollback of {} failed: {}\n",
            "✗".red(),
            result.backup_id.bold(),
            result.error.as_deref().unwrap_or("partial failure")
        )
    };
    for file in &result.files_restored {
        out.push_str(&format!("  {} {}\n", "↺".cyan(), file));
    }
    for failure in &result.failures {
        out.push_str(&format!("  {} {}\n", "✗".red(), failure.path()));
    }
    out
}

fn render_diff(diff: &FileDiff) -> String {
    match diff.status {
        DiffStatus::Unchanged => format!("{} {} is unchanged\n", "=".green(), diff.file),
        DiffStatus::Deleted => format!("{} {} no longer exists\n", "-".red(), diff.file),
        DiffStatus::Error => format!(
            "{} {}: {}\n",
            "✗".red(),
            diff.file,
            diff.error.as_deref().unwrap_or("unreadable")
        ),
        DiffStatus::Modified => {
            let mut out = format!(
                "{} {} ({}, {})\n",
                "~".yellow(),
                diff.file.bold(),
                format!("+{}", diff.lines_added.unwrap_or(0)).green(),
                format!("-{}", diff.lines_removed.unwrap_or(0)).red()
            );
            for line in diff.diff.as_deref().unwrap_or_default().lines() {
                let styled = if line.starts_with("+++") || line.starts_with("---") {
                    line.bold()
                } else if line.starts_with('+') {
                    line.green()
                } else if line.starts_with('-') {
                    line.red()
                } else if line.starts_with("@@") {
                    line.cyan()
                } else {
                    line.normal()
                };
                out.push_str(&format!("{}\n", styled));
            }
            out
        }
    }
}

fn render_report(report: &ValidationReport) -> String {
    let verdict = if !report.valid {
        "blocked".red()
    } else if report.requires_confirmation {
        "needs confirmation".yellow()
    } else {
        "safe".green()
    };
    let mut out = format!(
        "Validation of checkpoint {}: {}\n",
        report.checkpoint_id.as_str().bold(),
        verdict
    );
    for error in &report.errors {
        out.push_str(&format!("  {} {}\n", "✗".red(), error));
    }
    for warning in &report.warnings {
        out.push_str(&format!("  {} {}\n", "!".yellow(), warning));
    }
    out
}

fn render_backups(backups: &[BackupMetadata]) -> String {
    if backups.is_empty() {
        return "No backups\n".dimmed().to_string();
    }
    backups
        .iter()
        .map(|b| {
            format!(
                "{}  {}  {} file(s), {} conflict(s)\n",
                b.timestamp.format("%Y-%m-%d %H:%M:%S"),
                b.backup_id.bold(),
                b.files_restored.len(),
                b.conflict_count
            )
        })
        .collect()
}

fn render_pointer(pointer: &Option<SessionPointer>) -> String {
    match pointer {
        None => format!("{}\n", "No checkpoint restored yet".dimmed()),
        Some(p) => format!(
            "Session {} at checkpoint {}{} (updated {})\n",
            p.session_id.bold(),
            p.checkpoint_id.as_str().bold(),
            p.step_index
                .map(|s| format!(", step {}", s))
                .unwrap_or_default(),
            p.last_updated.format("%Y-%m-%d %H:%M:%S")
        ),
    }
}

fn render_tick(tick: &TickReport) -> String {
    let mut out = format!(
        "Session {}: {}",
        tick.session_id.bold(),
        tick.transition.label().cyan()
    );
    if let Some(ref id) = tick.checkpoint_id {
        out.push_str(&format!(" → checkpoint {}", id.as_str().bold()));
    }
    out.push('\n');
    if let Some(ref result) = tick.restoration {
        out.push_str(&render_restoration(result));
    }
    if let Some(ref report) = tick.blocked {
        out.push_str(&render_report(report));
    }
    if let Some(ref note) = tick.note {
        out.push_str(&format!("  {}\n", note.dimmed()));
    }
    out
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
