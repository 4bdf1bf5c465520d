// crates/db/src/lib.rs
//! SQLite storage engine for the shared usage history database.
//!
//! The database file may live in a cloud-synchronized folder written to by
//! several machines at once, plus the sync client itself. The engine runs in
//! WAL mode with `synchronous=NORMAL` and a 30-second busy timeout so a
//! writer blocked by another process's in-flight transaction retries instead
//! of failing immediately. Deduplication on `(session_id, message_id)` is the
//! sole cross-machine correctness mechanism.

pub mod aggregates;
pub mod devices;
pub mod ingest;
pub mod limits;
pub mod maintenance;
mod migrations;
pub mod records;

pub use aggregates::fill_range;
pub use devices::DeviceStats;
pub use ingest::{ingest_logs, IngestError, IngestReport};
pub use maintenance::{
    list_backups, restore_backup, BackupInfo, ResetOutcome, StatsOverview,
};
pub use records::{InsertOutcome, RecordFilter};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// How long a writer waits on another process's lock before giving up.
/// Generous because the file may be a cloud-sync client's active upload
/// target at the same moment a second machine opens it for write.
pub const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DbError {
    /// Transient lock contention that outlived the busy timeout. Recoverable:
    /// the caller may retry the whole operation.
    #[error("Database busy: another writer held the lock past the busy timeout")]
    Busy(#[source] sqlx::Error),

    /// Integrity check failure. Fatal; never silently repaired.
    #[error("Database corrupt: {detail}. Consider restoring a backup from {backup_dir}")]
    Corrupt { detail: String, backup_dir: PathBuf },

    #[error("SQLite error: {0}")]
    Sqlx(sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No database file at {path}")]
    MissingDatabase { path: PathBuf },

    #[error("Destructive operation refused: pass the explicit confirmation flag")]
    RefusedWithoutConfirm,
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        let message = e.to_string();
        if message.contains("database is locked") || message.contains("database table is locked") {
            DbError::Busy(e)
        } else {
            DbError::Sqlx(e)
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Main database handle wrapping a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations.
    ///
    /// Idempotent: safe to call repeatedly against an existing database.
    pub async fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(DbError::Sqlx)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            db_path: path.to_owned(),
        };
        db.run_migrations().await?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    ///
    /// Uses `shared_cache(true)` so all pool connections share the same
    /// in-memory database; without it each connection gets its own.
    pub async fn open_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(DbError::Sqlx)?
            .shared_cache(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let db = Self {
            pool,
            db_path: PathBuf::new(),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all inline migrations.
    ///
    /// Uses a `_migrations` table to track which versions have already been
    /// applied, so non-idempotent statements (ALTER TABLE ADD COLUMN) only
    /// ever execute once. Migrations are forward-only and additive.
    async fn run_migrations(&self) -> DbResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
            .fetch_one(&self.pool)
            .await?;
        let current_version = row.0 as usize;

        for (i, migration) in migrations::MIGRATIONS.iter().enumerate() {
            let version = i + 1; // 1-based
            if version <= current_version {
                continue;
            }
            match sqlx::query(migration).execute(&self.pool).await {
                Ok(_) => {}
                Err(e) if e.to_string().contains("duplicate column name") => {
                    // Column already exists from a pre-tracking database.
                }
                Err(e) => return Err(e.into()),
            }
            sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
                .bind(version as i64)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Path to the database file. Empty for in-memory databases.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Close the pool, letting in-flight writes finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
