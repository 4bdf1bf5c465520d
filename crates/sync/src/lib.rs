// crates/sync/src/lib.rs
//! Sync reconciler.
//!
//! The shared database is the append-only merge point for every machine, so
//! nothing here "fixes" anything silently: the reconciler compares what the
//! producer's live logs say against what the database holds, classifies the
//! relationship, and only mutates storage after explicit confirmation.
//!
//! Three signals feed the classification: the newest event timestamp visible
//! in the live logs, the newest timestamp stored in the database, and the
//! record counts for the overlapping time window on each side.

use chrono::{DateTime, Duration, Utc};
use claude_ledger_core::{
    parse_log_file, scan_log_files, DiscoveryError, TimezoneMode,
};
use claude_ledger_db::{ingest_logs, Database, DbError, IngestError, IngestReport};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Timestamps within this tolerance count as agreeing; cloud-sync clients and
/// sub-second log flushing make exact equality meaningless.
pub fn timestamp_tolerance() -> Duration {
    Duration::seconds(1)
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Resync refused: pass the explicit confirmation flag")]
    RefusedWithoutConfirm,
}

/// Relationship between the live logs and the stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Timestamps agree and counts match; nothing to do.
    Synced,
    /// Live logs are strictly newer and the database holds fewer records:
    /// the local database lags; re-running ingestion resolves it.
    LocalStale,
    /// The database holds more records than the local logs account for:
    /// another machine's writes already merged in. No action.
    RemoteAhead,
    /// The database claims to be current yet holds fewer records than the
    /// live window. Surfaced for manual inspection, never auto-resolved.
    IntegrityConcern,
}

impl SyncStatus {
    /// Whether `resync` is the documented resolution for this state.
    pub fn resync_resolves(&self) -> bool {
        matches!(self, SyncStatus::LocalStale)
    }
}

/// The raw comparison inputs, kept around so callers can show their work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSignals {
    pub live_newest: Option<DateTime<Utc>>,
    pub db_newest: Option<DateTime<Utc>>,
    /// Records visible in the live logs for the overlap window.
    pub live_count: u64,
    /// Records stored in the database for the same window.
    pub db_count: u64,
}

/// Outcome of one reconciliation inspection.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub signals: SyncSignals,
    /// Start of the overlap window the counts were taken over.
    pub window_start: Option<DateTime<Utc>>,
}

/// Classify the three-signal comparison into a sync status.
///
/// Precedence: a count surplus on the database side always reads as another
/// machine's merged writes; only then does timestamp lag mark the local
/// database stale; a count deficit without lag is an integrity concern.
pub fn classify(signals: &SyncSignals) -> SyncStatus {
    if signals.db_count > signals.live_count {
        return SyncStatus::RemoteAhead;
    }

    let live_is_newer = match (signals.live_newest, signals.db_newest) {
        (Some(live), Some(db)) => live - db > timestamp_tolerance(),
        (Some(_), None) => true,
        _ => false,
    };

    if live_is_newer {
        if signals.db_count < signals.live_count {
            SyncStatus::LocalStale
        } else {
            // Counts match yet the newest event is missing: the window
            // contents differ in a way re-ingestion may not explain.
            SyncStatus::IntegrityConcern
        }
    } else if signals.db_count < signals.live_count {
        SyncStatus::IntegrityConcern
    } else {
        SyncStatus::Synced
    }
}

/// Gather signals from the live logs and the database, then classify.
///
/// The overlap window starts at the oldest event still visible in the live
/// logs — everything older exists only in the database and cannot be compared.
pub async fn inspect(db: &Database, logs_dir: &Path) -> Result<SyncReport, SyncError> {
    let mut live_newest: Option<DateTime<Utc>> = None;
    let mut live_oldest: Option<DateTime<Utc>> = None;
    let mut live_count: u64 = 0;

    for file in scan_log_files(logs_dir).await? {
        let parsed = match parse_log_file(&file.path).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Skipping unreadable log file {:?}: {}", file.path, e);
                continue;
            }
        };
        for record in &parsed.records {
            live_count += 1;
            if live_newest.map(|ts| record.timestamp > ts).unwrap_or(true) {
                live_newest = Some(record.timestamp);
            }
            if live_oldest.map(|ts| record.timestamp < ts).unwrap_or(true) {
                live_oldest = Some(record.timestamp);
            }
        }
    }

    let db_newest = db.newest_record_timestamp().await?;
    let db_count = match live_oldest {
        Some(window_start) => db.count_records_since(window_start).await? as u64,
        None => db.count_records().await? as u64,
    };

    let signals = SyncSignals {
        live_newest,
        db_newest,
        live_count,
        db_count,
    };
    let status = classify(&signals);
    info!(?status, ?signals, "Sync inspection complete");

    Ok(SyncReport {
        status,
        signals,
        window_start: live_oldest,
    })
}

/// Re-run ingestion to catch the local database up, then re-inspect.
///
/// Requires explicit confirmation — the reconciler never writes silently.
pub async fn resync(
    db: &Database,
    logs_dir: &Path,
    machine_label: &str,
    tz: TimezoneMode,
    confirmed: bool,
) -> Result<(IngestReport, SyncReport), SyncError> {
    if !confirmed {
        return Err(SyncError::RefusedWithoutConfirm);
    }

    let report = ingest_logs(db, logs_dir, machine_label, tz).await?;
    let after = inspect(db, logs_dir).await?;
    Ok((report, after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 14, hour, min, sec).unwrap()
    }

    fn signals(
        live: Option<DateTime<Utc>>,
        db: Option<DateTime<Utc>>,
        live_count: u64,
        db_count: u64,
    ) -> SyncSignals {
        SyncSignals {
            live_newest: live,
            db_newest: db,
            live_count,
            db_count,
        }
    }

    #[test]
    fn synced_when_timestamps_agree_and_counts_match() {
        let s = signals(Some(ts(10, 0, 0)), Some(ts(10, 0, 0)), 40, 40);
        assert_eq!(classify(&s), SyncStatus::Synced);

        // Sub-second skew from sync clients is still "synced".
        let s = signals(Some(ts(10, 0, 1)), Some(ts(10, 0, 0)), 40, 40);
        assert_eq!(classify(&s), SyncStatus::Synced);
    }

    #[test]
    fn local_stale_when_logs_newer_and_db_count_lower() {
        let s = signals(Some(ts(12, 0, 0)), Some(ts(10, 0, 0)), 50, 40);
        assert_eq!(classify(&s), SyncStatus::LocalStale);
        assert!(SyncStatus::LocalStale.resync_resolves());
    }

    #[test]
    fn remote_ahead_when_db_has_more_than_logs_account_for() {
        let s = signals(Some(ts(10, 0, 0)), Some(ts(10, 0, 0)), 40, 90);
        assert_eq!(classify(&s), SyncStatus::RemoteAhead);
        assert!(!SyncStatus::RemoteAhead.resync_resolves());

        // Even a lagging timestamp cannot demote merged remote writes.
        let s = signals(Some(ts(12, 0, 0)), Some(ts(10, 0, 0)), 40, 90);
        assert_eq!(classify(&s), SyncStatus::RemoteAhead);
    }

    #[test]
    fn integrity_concern_when_db_claims_current_but_misses_records() {
        let s = signals(Some(ts(10, 0, 0)), Some(ts(10, 0, 0)), 50, 40);
        assert_eq!(classify(&s), SyncStatus::IntegrityConcern);
        assert!(!SyncStatus::IntegrityConcern.resync_resolves());
    }

    #[test]
    fn integrity_concern_when_newest_event_missing_but_counts_match() {
        let s = signals(Some(ts(12, 0, 0)), Some(ts(10, 0, 0)), 40, 40);
        assert_eq!(classify(&s), SyncStatus::IntegrityConcern);
    }

    #[test]
    fn empty_logs_and_empty_db_are_synced() {
        assert_eq!(classify(&SyncSignals::default()), SyncStatus::Synced);
    }

    #[test]
    fn empty_logs_with_stored_history_is_remote_ahead() {
        // A fresh machine joining an established shared database.
        let s = signals(None, Some(ts(10, 0, 0)), 0, 5000);
        assert_eq!(classify(&s), SyncStatus::RemoteAhead);
    }

    #[test]
    fn fresh_db_with_live_logs_is_local_stale() {
        let s = signals(Some(ts(10, 0, 0)), None, 40, 0);
        assert_eq!(classify(&s), SyncStatus::LocalStale);
    }

    fn assistant_line(session: &str, message: &str, ts: &str) -> String {
        format!(
            r#"{{"type":"assistant","sessionId":"{session}","uuid":"{message}","timestamp":"{ts}","cwd":"/p","version":"2.0.1","message":{{"usage":{{"input_tokens":10,"output_tokens":1}}}}}}"#
        )
    }

    async fn write_log(dir: &Path, lines: &[String]) {
        let project = dir.join("-home-u-proj");
        tokio::fs::create_dir_all(&project).await.unwrap();
        tokio::fs::write(project.join("s.jsonl"), lines.join("\n"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn inspect_reports_stale_then_resync_restores_synced() {
        let tmp = tempfile::tempdir().unwrap();
        write_log(
            tmp.path(),
            &[
                assistant_line("s1", "m1", "2025-10-14T10:00:00Z"),
                assistant_line("s1", "m2", "2025-10-14T11:00:00Z"),
            ],
        )
        .await;

        let db = Database::open_in_memory().await.unwrap();

        let report = inspect(&db, tmp.path()).await.unwrap();
        assert_eq!(report.status, SyncStatus::LocalStale);
        assert_eq!(report.signals.live_count, 2);
        assert_eq!(report.signals.db_count, 0);

        // Never writes without confirmation.
        let err = resync(&db, tmp.path(), "desktop", TimezoneMode::Utc, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RefusedWithoutConfirm));
        assert_eq!(db.count_records().await.unwrap(), 0);

        let (ingested, after) = resync(&db, tmp.path(), "desktop", TimezoneMode::Utc, true)
            .await
            .unwrap();
        assert_eq!(ingested.inserted, 2);
        assert_eq!(after.status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn inspect_sees_remote_writes_as_ahead() {
        let tmp = tempfile::tempdir().unwrap();
        write_log(
            tmp.path(),
            &[assistant_line("s1", "m1", "2025-10-14T10:00:00Z")],
        )
        .await;

        let db = Database::open_in_memory().await.unwrap();
        // Local logs plus another machine's records, all inside the window.
        claude_ledger_db::ingest_logs(&db, tmp.path(), "here", TimezoneMode::Utc)
            .await
            .unwrap();
        let remote = claude_ledger_core::UsageRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 10, 14, 10, 0, 0).unwrap(),
            session_id: "remote-session".into(),
            message_id: "m1".into(),
            role: claude_ledger_core::Role::Assistant,
            model: None,
            project_path: "/elsewhere".into(),
            branch: None,
            producer_version: "2.0.1".into(),
            machine_label: Some("machine-b".into()),
            tokens: claude_ledger_core::TokenUsage::default(),
        };
        db.insert_records(&[remote], TimezoneMode::Utc).await.unwrap();

        let report = inspect(&db, tmp.path()).await.unwrap();
        assert_eq!(report.status, SyncStatus::RemoteAhead);
    }
}
