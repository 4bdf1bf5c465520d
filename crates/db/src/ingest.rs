// crates/db/src/ingest.rs
//! Ingestion pipeline: scan → parse → store → roll up.
//!
//! One pass reads every producer log file, inserts the parsed records with
//! dedup, and recomputes daily aggregates for exactly the dates the batch
//! touched. Running the same pass twice is a no-op for storage: the second
//! pass is absorbed entirely by the duplicate count.

use crate::{Database, DbError};
use chrono::NaiveDate;
use claude_ledger_core::{
    parse_log_file, scan_log_files, DiscoveryError, TimezoneMode, UsageRecord,
};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Outcome of one ingestion pass.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub files: usize,
    pub parsed_records: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped_lines: usize,
    pub failed_lines: usize,
    /// Dates whose aggregates were recomputed for this batch.
    pub touched_dates: Vec<NaiveDate>,
}

/// Run one ingestion pass over every session log under `logs_dir`.
///
/// Per-file parse errors are logged and skipped — one unreadable file never
/// aborts the pass. Only discovery and storage failures surface.
pub async fn ingest_logs(
    db: &Database,
    logs_dir: &Path,
    machine_label: &str,
    tz: TimezoneMode,
) -> Result<IngestReport, IngestError> {
    let files = scan_log_files(logs_dir).await?;

    let mut report = IngestReport {
        files: files.len(),
        ..IngestReport::default()
    };
    let mut records: Vec<UsageRecord> = Vec::new();

    for file in &files {
        let parsed = match parse_log_file(&file.path).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Skipping unreadable log file {:?}: {}", file.path, e);
                continue;
            }
        };
        report.skipped_lines += parsed.skipped;
        report.failed_lines += parsed.failed;
        records.extend(
            parsed
                .records
                .into_iter()
                .map(|r| r.with_machine_label(machine_label)),
        );
    }
    report.parsed_records = records.len();

    let outcome = db.insert_records(&records, tz).await?;
    report.inserted = outcome.inserted;
    report.duplicates = outcome.duplicates;

    // Every date present in the batch is "touched": duplicates recompute to
    // the same aggregate (idempotent), while fresh inserts pick up the new
    // sums. Dates outside the batch are deliberately left alone.
    let touched: BTreeSet<NaiveDate> = records.iter().map(|r| r.date_key(tz)).collect();
    let touched: Vec<NaiveDate> = touched.into_iter().collect();
    db.update_daily_aggregates(&touched).await?;
    report.touched_dates = touched;

    debug!(
        files = report.files,
        inserted = report.inserted,
        duplicates = report.duplicates,
        failed_lines = report.failed_lines,
        "Ingestion pass complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant_line(session: &str, message: &str, ts: &str, tokens: u64) -> String {
        format!(
            r#"{{"type":"assistant","sessionId":"{session}","uuid":"{message}","timestamp":"{ts}","cwd":"/p","version":"2.0.1","message":{{"model":"claude-sonnet-4-5-20250929","usage":{{"input_tokens":{tokens},"output_tokens":1}}}}}}"#
        )
    }

    async fn setup_logs(lines: &[String]) -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let project = tmp.path().join("-home-u-proj");
        tokio::fs::create_dir_all(&project).await.unwrap();
        tokio::fs::write(project.join("session-1.jsonl"), lines.join("\n"))
            .await
            .unwrap();
        let path = tmp.path().to_path_buf();
        (tmp, path)
    }

    #[tokio::test]
    async fn test_ingest_pass_inserts_and_rolls_up() {
        let (_tmp, logs) = setup_logs(&[
            assistant_line("s1", "m1", "2025-10-14T10:00:00Z", 100),
            assistant_line("s1", "m2", "2025-10-15T09:00:00Z", 200),
            "not json at all".to_string(),
        ])
        .await;

        let db = Database::open_in_memory().await.unwrap();
        let report = ingest_logs(&db, &logs, "desktop", TimezoneMode::Utc)
            .await
            .unwrap();

        assert_eq!(report.files, 1);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.duplicates, 0);
        assert_eq!(report.failed_lines, 1);
        assert_eq!(report.touched_dates.len(), 2);

        let aggregates = db.fetch_daily_aggregates(None, None).await.unwrap();
        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0].input_tokens, 100);
        assert_eq!(aggregates[1].input_tokens, 200);
    }

    #[tokio::test]
    async fn test_second_pass_is_all_duplicates() {
        let (_tmp, logs) = setup_logs(&[assistant_line("s1", "m1", "2025-10-14T10:00:00Z", 100)])
            .await;

        let db = Database::open_in_memory().await.unwrap();
        ingest_logs(&db, &logs, "desktop", TimezoneMode::Utc)
            .await
            .unwrap();
        let second = ingest_logs(&db, &logs, "desktop", TimezoneMode::Utc)
            .await
            .unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(db.count_records().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_machine_label_attached() {
        let (_tmp, logs) = setup_logs(&[assistant_line("s1", "m1", "2025-10-14T10:00:00Z", 100)])
            .await;

        let db = Database::open_in_memory().await.unwrap();
        ingest_logs(&db, &logs, "laptop-01", TimezoneMode::Utc)
            .await
            .unwrap();

        let records = db
            .fetch_records(&crate::RecordFilter::default())
            .await
            .unwrap();
        assert_eq!(records[0].machine_label.as_deref(), Some("laptop-01"));
    }
}
