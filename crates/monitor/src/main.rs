// crates/monitor/src/main.rs
//! claude-ledger binary.
//!
//! Resolves configuration and the storage path, opens the database, and
//! dispatches the subcommand. `usage` (the default) runs the live dashboard
//! scheduler; everything else is a one-shot command.

mod cli;
mod input;
mod limits_probe;
mod scheduler;
mod view;
mod watcher;

use anyhow::{bail, Context, Result};
use clap::Parser;
use claude_ledger_core::{
    producer_logs_dir, resolve_default, LimitScope, TimezoneMode, UserConfig,
};
use claude_ledger_db::{ingest_logs, list_backups, restore_backup, Database};
use cli::{Cli, Command, ConfigAction, ConfigKey};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let config = UserConfig::load();

    match cli.command.unwrap_or(Command::Usage) {
        Command::Usage => {
            let db = open_database(&config).await?;
            let logs_dir = producer_logs_dir()?;
            println!(
                "claude-ledger v{} · db {} · q quit, r refresh, tab cycle view",
                env!("CARGO_PKG_VERSION"),
                db.db_path().display(),
            );
            scheduler::run_monitor(db, config, logs_dir).await?;
        }
        Command::Update => {
            let db = open_database(&config).await?;
            let logs_dir = producer_logs_dir()?;
            let report = ingest_logs(&db, &logs_dir, &config.machine_label(), config.timezone)
                .await
                .context("ingestion pass failed")?;
            println!(
                "Saved {} new records ({} duplicates, {} unparseable lines) from {} files",
                report.inserted, report.duplicates, report.failed_lines, report.files
            );

            match limits_probe::capture_limits().await {
                Ok(capture) => {
                    db.record_limits_capture(&capture.to_snapshots()).await?;
                    println!(
                        "Saved limits snapshot (session {}%, week {}%, opus {}%)",
                        capture.session_pct, capture.week_pct, capture.opus_pct
                    );
                }
                Err(e) => println!("Limits capture skipped: {e}"),
            }

            let today = chrono::Local::now().date_naive();
            let filled = db.fill_empty_days(today).await?;
            if filled > 0 {
                println!("Filled {filled} empty days");
            }

            // Limits history only feeds short-range views; keep a quarter.
            let cutoff = chrono::Utc::now() - chrono::Duration::days(90);
            db.prune_limits_snapshots(cutoff).await?;
        }
        Command::Sync { yes } => {
            let db = open_database(&config).await?;
            let logs_dir = producer_logs_dir()?;
            run_sync(&db, &config, logs_dir, yes).await?;
        }
        Command::Limits => match limits_probe::capture_limits().await {
            Ok(capture) => {
                println!("Session:      {:>3}%  resets {}", capture.session_pct,
                    capture.session_reset.as_deref().unwrap_or("-"));
                println!("Week (all):   {:>3}%  resets {}", capture.week_pct,
                    capture.week_reset.as_deref().unwrap_or("-"));
                println!("Week (Opus):  {:>3}%  resets {}", capture.opus_pct,
                    capture.opus_reset.as_deref().unwrap_or("-"));
            }
            Err(e) => bail!("limits capture failed: {e}"),
        },
        Command::Status => {
            let db = open_database(&config).await?;
            db.integrity_check().await?;
            let overview = db.stats_overview().await?;
            println!("Database: {}", db.db_path().display());
            println!("Records:  {} over {} days", overview.total_records, overview.total_days);
            if let (Some(oldest), Some(newest)) = (overview.oldest_date, overview.newest_date) {
                println!("Range:    {oldest} to {newest}");
            }
            println!("Tokens:   {}", overview.total_tokens);
            println!(
                "Prompts:  {} · Responses: {}",
                overview.total_prompts, overview.total_responses
            );
            for scope in LimitScope::ALL {
                if let Some(snapshot) = db.fetch_latest_limits(scope).await? {
                    println!(
                        "Limits [{}]: {}% (captured {})",
                        scope.as_str(),
                        snapshot.percent_used,
                        snapshot.captured_at.format("%Y-%m-%d %H:%M"),
                    );
                }
            }
        }
        Command::Devices => {
            let db = open_database(&config).await?;
            let stats = db.device_stats().await?;
            if stats.is_empty() {
                println!("No records yet.");
            }
            for device in stats {
                println!(
                    "{:<20} {:>8} records · {:>5} sessions · {:>14} tokens · {} to {}",
                    device.machine_label,
                    device.record_count,
                    device.session_count,
                    device.total_tokens,
                    device.first_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
                    device.last_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
                );
            }
        }
        Command::ResetDb {
            force,
            keep_backups,
        } => {
            if !force {
                println!("WARNING: this deletes the usage database.");
                println!("To confirm, run: claude-ledger reset-db --force");
                return Ok(());
            }
            let db = open_database(&config).await?;
            let outcome = db.reset(true, keep_backups).await?;
            println!("Database reset. Backup written to {}", outcome.backup.display());
            if outcome.removed_backups > 0 {
                println!("Removed {} older backup(s)", outcome.removed_backups);
            }
        }
        Command::RestoreBackup { list, file, force } => {
            let db_path = resolve_default(&config)?;
            let backups = list_backups(&db_path);
            if list {
                if backups.is_empty() {
                    println!("No backups found next to {}", db_path.display());
                }
                for backup in backups {
                    println!("{}  ({} bytes)", backup.path.display(), backup.size);
                }
                return Ok(());
            }

            let target = match file.or_else(|| backups.first().map(|b| b.path.clone())) {
                Some(path) => path,
                None => bail!("no backup files found next to {}", db_path.display()),
            };
            if !force {
                println!("Would restore {} over {}", target.display(), db_path.display());
                println!("To confirm, re-run with --force");
                return Ok(());
            }
            let safety = restore_backup(&db_path, &target, true)?;
            println!("Restored {}; previous database kept at {}", target.display(), safety.display());
        }
        Command::Config { action } => run_config(action, config)?,
    }

    Ok(())
}

/// Resolve the storage path and open the database.
async fn open_database(config: &UserConfig) -> Result<Database> {
    let path = resolve_default(config).context("could not resolve a storage location")?;
    Ok(Database::open(&path).await?)
}

async fn run_sync(
    db: &Database,
    config: &UserConfig,
    logs_dir: PathBuf,
    yes: bool,
) -> Result<()> {
    let report = claude_ledger_sync::inspect(db, &logs_dir).await?;
    println!("Sync status: {:?}", report.status);
    println!(
        "  live logs: {} records, newest {}",
        report.signals.live_count,
        report
            .signals
            .live_newest
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".into()),
    );
    println!(
        "  database:  {} records in window, newest {}",
        report.signals.db_count,
        report
            .signals
            .db_newest
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".into()),
    );

    match report.status {
        claude_ledger_sync::SyncStatus::Synced => {
            println!("Nothing to do.");
        }
        claude_ledger_sync::SyncStatus::RemoteAhead => {
            println!("Another machine's writes are already merged in. No action needed.");
        }
        claude_ledger_sync::SyncStatus::IntegrityConcern => {
            println!("The database claims to be current but is missing records for the live");
            println!("window. Inspect manually before changing anything — this is not");
            println!("auto-resolved. `claude-ledger status` runs an integrity check.");
        }
        claude_ledger_sync::SyncStatus::LocalStale => {
            if !yes {
                println!("Local database is stale. Re-run with --yes to re-ingest.");
                return Ok(());
            }
            let (ingested, after) = claude_ledger_sync::resync(
                db,
                &logs_dir,
                &config.machine_label(),
                config.timezone,
                true,
            )
            .await?;
            println!(
                "Re-ingested: {} new records ({} duplicates). Status now: {:?}",
                ingested.inserted, ingested.duplicates, after.status
            );
        }
    }
    Ok(())
}

fn run_config(action: ConfigAction, mut config: UserConfig) -> Result<()> {
    match action {
        ConfigAction::Get => {
            println!(
                "db_path:               {}",
                config
                    .db_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(auto)".into())
            );
            println!("machine_name:          {}", config.machine_label());
            println!(
                "timezone:              {}",
                match config.timezone {
                    TimezoneMode::Local => "local",
                    TimezoneMode::Utc => "utc",
                }
            );
            println!("refresh_interval_secs: {}", config.refresh_interval_secs);
            let resolved = resolve_default(&config)?;
            println!("resolved storage path: {}", resolved.display());
        }
        ConfigAction::Set { key, value } => {
            match key {
                ConfigKey::DbPath => {
                    config.db_path = if value.is_empty() {
                        None
                    } else {
                        Some(PathBuf::from(value))
                    };
                }
                ConfigKey::MachineName => {
                    config.machine_name = if value.is_empty() { None } else { Some(value) };
                }
                ConfigKey::Timezone => {
                    config.timezone = match value.as_str() {
                        "local" => TimezoneMode::Local,
                        "utc" => TimezoneMode::Utc,
                        other => bail!("invalid timezone mode `{other}` (use local or utc)"),
                    };
                }
                ConfigKey::RefreshInterval => {
                    config.refresh_interval_secs = value
                        .parse()
                        .with_context(|| format!("invalid interval `{value}`"))?;
                }
            }
            config.save()?;
            println!("Saved.");
        }
    }
    Ok(())
}
