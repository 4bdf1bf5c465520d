// crates/monitor/src/cli.rs
//! Command-line surface.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "claude-ledger",
    version,
    about = "Durable usage history for Claude Code across machines"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Live dashboard: watch logs, refresh limits, ingest continuously
    Usage,
    /// Run one ingestion pass plus one limits capture, then exit
    Update,
    /// Compare live logs against the database and offer a confirmed resync
    Sync {
        /// Proceed with resync without interactive confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Capture and print the producer's current limits
    Limits,
    /// Database overview: counts, dates, storage path
    Status,
    /// Per-machine usage statistics
    Devices,
    /// Delete the database after writing a backup (requires --force)
    ResetDb {
        /// Confirm the destructive reset
        #[arg(long)]
        force: bool,
        /// Keep existing backup files (only the main database is deleted)
        #[arg(long)]
        keep_backups: bool,
    },
    /// Restore the database from a backup file
    RestoreBackup {
        /// List available backups instead of restoring
        #[arg(long)]
        list: bool,
        /// Backup file to restore (defaults to the newest)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Confirm overwriting the current database
        #[arg(long)]
        force: bool,
    },
    /// Read or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Get,
    /// Set one configuration key
    Set {
        key: ConfigKey,
        /// New value; an empty string clears optional keys
        value: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigKey {
    /// Explicit database file path
    DbPath,
    /// Display name for this machine
    MachineName,
    /// Day bucketing: local or utc
    Timezone,
    /// Seconds between limits refreshes
    RefreshInterval,
}
