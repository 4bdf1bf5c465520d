// crates/db/src/maintenance.rs
//! Database overview, integrity checking, and destructive maintenance.
//!
//! Reset is the only operation that deletes records, and it refuses to run
//! without the caller's explicit confirmation flag. Before truncating
//! anything it writes a backup qualified by timestamp, process id, and a
//! process-wide sequence number, so two resets — concurrent across processes
//! or back-to-back within one — can never collide on a backup filename.

use crate::records::{parse_date, parse_ts};
use crate::{Database, DbError, DbResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

const BACKUP_SUFFIX: &str = ".db.bak";

static BACKUP_SEQ: AtomicU64 = AtomicU64::new(0);

/// High-level view of what the database currently holds.
#[derive(Debug, Clone, Serialize)]
pub struct StatsOverview {
    pub total_records: i64,
    pub total_days: i64,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
    pub newest_timestamp: Option<DateTime<Utc>>,
    pub total_tokens: i64,
    pub total_prompts: i64,
    pub total_responses: i64,
}

/// Result of a confirmed reset.
#[derive(Debug, Clone)]
pub struct ResetOutcome {
    /// Backup written immediately before truncation.
    pub backup: PathBuf,
    /// Older backup files removed (zero when backups are kept).
    pub removed_backups: usize,
}

/// One backup file next to the primary database.
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: Option<std::time::SystemTime>,
}

fn backup_file_name(db_path: &Path, now: DateTime<Utc>) -> String {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "usage_history".to_string());
    let seq = BACKUP_SEQ.fetch_add(1, Ordering::SeqCst);
    format!(
        "{stem}-{}-{}-{seq}{BACKUP_SUFFIX}",
        now.format("%Y%m%d-%H%M%S"),
        std::process::id(),
    )
}

/// Enumerate backups for the given database, newest first.
pub fn list_backups(db_path: &Path) -> Vec<BackupInfo> {
    let dir = match db_path.parent() {
        Some(d) => d,
        None => return Vec::new(),
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut backups: Vec<BackupInfo> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .ends_with(BACKUP_SUFFIX)
        })
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            Some(BackupInfo {
                path: entry.path(),
                size: metadata.len(),
                modified_at: metadata.modified().ok(),
            })
        })
        .collect();

    backups.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    backups
}

/// Restore a backup over the primary database file.
///
/// The current database (if present) is backed up first, so a restore is
/// itself reversible. Refuses without the confirmation flag. Must not be
/// called while the database is open — callers restore before opening.
pub fn restore_backup(db_path: &Path, backup: &Path, confirmed: bool) -> DbResult<PathBuf> {
    if !confirmed {
        return Err(DbError::RefusedWithoutConfirm);
    }
    if !backup.exists() {
        return Err(DbError::MissingDatabase {
            path: backup.to_owned(),
        });
    }

    let mut safety = None;
    if db_path.exists() {
        let name = backup_file_name(db_path, Utc::now());
        let safety_path = db_path.with_file_name(name);
        std::fs::copy(db_path, &safety_path)?;
        safety = Some(safety_path);
    }

    std::fs::copy(backup, db_path)?;
    remove_sidecars(db_path);

    info!("Restored {} from {}", db_path.display(), backup.display());
    Ok(safety.unwrap_or_else(|| backup.to_owned()))
}

/// Remove WAL/SHM sidecar files left by a previous open.
fn remove_sidecars(db_path: &Path) {
    for suffix in ["-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_owned();
        name.push(suffix);
        let sidecar = PathBuf::from(name);
        if sidecar.exists() {
            if let Err(e) = std::fs::remove_file(&sidecar) {
                warn!("Could not remove {}: {}", sidecar.display(), e);
            }
        }
    }
}

impl Database {
    /// Record/day counts and token totals, for status output and the
    /// reconciler.
    pub async fn stats_overview(&self) -> DbResult<StatsOverview> {
        let records: (i64, i64, Option<String>, Option<String>, Option<String>) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(DISTINCT date), MIN(date), MAX(date), MAX(timestamp) \
             FROM usage_records",
        )
        .fetch_one(self.pool())
        .await?;

        let totals: (i64, i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(total_tokens), 0), COALESCE(SUM(prompt_count), 0), \
             COALESCE(SUM(response_count), 0) FROM daily_aggregates",
        )
        .fetch_one(self.pool())
        .await?;

        Ok(StatsOverview {
            total_records: records.0,
            total_days: records.1,
            oldest_date: records.2.as_deref().and_then(parse_date),
            newest_date: records.3.as_deref().and_then(parse_date),
            newest_timestamp: records.4.as_deref().and_then(parse_ts),
            total_tokens: totals.0,
            total_prompts: totals.1,
            total_responses: totals.2,
        })
    }

    /// Run `PRAGMA integrity_check`. A failing check is fatal and surfaced
    /// with a restore hint; it is never silently repaired.
    pub async fn integrity_check(&self) -> DbResult<()> {
        let row: (String,) = sqlx::query_as("PRAGMA integrity_check")
            .fetch_one(self.pool())
            .await?;
        if row.0 == "ok" {
            Ok(())
        } else {
            let backup_dir = self
                .db_path()
                .parent()
                .map(Path::to_owned)
                .unwrap_or_default();
            Err(DbError::Corrupt {
                detail: row.0,
                backup_dir,
            })
        }
    }

    /// Copy the database file to a uniquely named backup alongside it.
    ///
    /// Checkpoints the WAL first so the copy contains every committed write.
    pub async fn create_backup(&self) -> DbResult<PathBuf> {
        if self.db_path().as_os_str().is_empty() || !self.db_path().exists() {
            return Err(DbError::MissingDatabase {
                path: self.db_path().to_owned(),
            });
        }

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(self.pool())
            .await?;

        let name = backup_file_name(self.db_path(), Utc::now());
        let backup_path = self.db_path().with_file_name(name);
        std::fs::copy(self.db_path(), &backup_path)?;

        info!("Backup written to {}", backup_path.display());
        Ok(backup_path)
    }

    /// Destructive reset: back up, then delete the database file and its
    /// sidecars. Closes the pool; the caller must reopen afterwards.
    ///
    /// `confirmed` must be `true` or the call is refused outright. With
    /// `keep_backups == false`, older backup files are removed as well — the
    /// backup taken by this reset always survives.
    pub async fn reset(&self, confirmed: bool, keep_backups: bool) -> DbResult<ResetOutcome> {
        if !confirmed {
            return Err(DbError::RefusedWithoutConfirm);
        }
        if self.db_path().as_os_str().is_empty() || !self.db_path().exists() {
            return Err(DbError::MissingDatabase {
                path: self.db_path().to_owned(),
            });
        }

        let backup = self.create_backup().await?;

        // Let in-flight writes finish; never interrupt a transaction.
        self.close().await;

        std::fs::remove_file(self.db_path())?;
        remove_sidecars(self.db_path());

        let mut removed_backups = 0;
        if !keep_backups {
            for info in list_backups(self.db_path()) {
                if info.path == backup {
                    continue;
                }
                match std::fs::remove_file(&info.path) {
                    Ok(()) => removed_backups += 1,
                    Err(e) => warn!("Could not remove backup {}: {}", info.path.display(), e),
                }
            }
        }

        info!(
            "Database reset complete; backup at {}",
            backup.display()
        );
        Ok(ResetOutcome {
            backup,
            removed_backups,
        })
    }
}
