// crates/db/src/records.rs
//! Usage record writes and reads.
//!
//! Inserts use `INSERT OR IGNORE` on the `(session_id, message_id)` unique
//! key: a duplicate is silently counted, never an error, and never
//! overwrites the stored row (first write wins). Two machines independently
//! re-ingesting overlapping log windows converge to the same final state.

use crate::{Database, DbResult};
use chrono::{DateTime, NaiveDate, Utc};
use claude_ledger_core::{Role, TimezoneMode, TokenUsage, UsageRecord};
use tracing::warn;

/// Result of a batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Read filter for `fetch_records`.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub project: Option<String>,
    pub machine: Option<String>,
}

/// Fixed-width UTC timestamp format. Lexicographic order over stored values
/// matches chronological order, which the ORDER BY clauses rely on.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

type RecordRow = (
    String,         // timestamp
    String,         // session_id
    String,         // message_id
    String,         // role
    Option<String>, // model
    String,         // project_path
    Option<String>, // branch
    String,         // producer_version
    Option<String>, // machine_label
    i64,            // input_tokens
    i64,            // output_tokens
    i64,            // cache_write_tokens
    i64,            // cache_read_tokens
);

fn row_to_record(row: RecordRow) -> Option<UsageRecord> {
    let timestamp = match parse_ts(&row.0) {
        Some(ts) => ts,
        None => {
            warn!("Skipping stored record with unparseable timestamp: {}", row.0);
            return None;
        }
    };
    let role = match Role::parse(&row.3) {
        Some(r) => r,
        None => {
            warn!("Skipping stored record with unknown role: {}", row.3);
            return None;
        }
    };
    Some(UsageRecord {
        timestamp,
        session_id: row.1,
        message_id: row.2,
        role,
        model: row.4,
        project_path: row.5,
        branch: row.6,
        producer_version: row.7,
        machine_label: row.8,
        tokens: TokenUsage {
            input_tokens: row.9.max(0) as u64,
            output_tokens: row.10.max(0) as u64,
            cache_write_tokens: row.11.max(0) as u64,
            cache_read_tokens: row.12.max(0) as u64,
        },
    })
}

impl Database {
    /// Insert a batch of records with dedup on `(session_id, message_id)`.
    ///
    /// Runs in one transaction so a batch is atomic with respect to other
    /// writers; within the batch, submission order is preserved.
    pub async fn insert_records(
        &self,
        records: &[UsageRecord],
        tz: TimezoneMode,
    ) -> DbResult<InsertOutcome> {
        if records.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let mut tx = self.pool().begin().await?;
        let mut outcome = InsertOutcome::default();

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO usage_records (
                    date, timestamp, session_id, message_id, role,
                    model, project_path, branch, producer_version, machine_label,
                    input_tokens, output_tokens, cache_write_tokens, cache_read_tokens,
                    total_tokens
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(fmt_date(record.date_key(tz)))
            .bind(fmt_ts(record.timestamp))
            .bind(&record.session_id)
            .bind(&record.message_id)
            .bind(record.role.as_str())
            .bind(&record.model)
            .bind(&record.project_path)
            .bind(&record.branch)
            .bind(&record.producer_version)
            .bind(&record.machine_label)
            .bind(record.tokens.input_tokens as i64)
            .bind(record.tokens.output_tokens as i64)
            .bind(record.tokens.cache_write_tokens as i64)
            .bind(record.tokens.cache_read_tokens as i64)
            .bind(record.tokens.total() as i64)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Fetch records matching the filter, in timestamp order.
    pub async fn fetch_records(&self, filter: &RecordFilter) -> DbResult<Vec<UsageRecord>> {
        let mut sql = String::from(
            "SELECT timestamp, session_id, message_id, role, model, project_path, branch, \
             producer_version, machine_label, input_tokens, output_tokens, \
             cache_write_tokens, cache_read_tokens \
             FROM usage_records WHERE 1=1",
        );
        if filter.since.is_some() {
            sql.push_str(" AND date >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND date <= ?");
        }
        if filter.project.is_some() {
            sql.push_str(" AND project_path = ?");
        }
        if filter.machine.is_some() {
            sql.push_str(" AND machine_label = ?");
        }
        sql.push_str(" ORDER BY timestamp, id");

        let mut query = sqlx::query_as::<_, RecordRow>(&sql);
        if let Some(since) = filter.since {
            query = query.bind(fmt_date(since));
        }
        if let Some(until) = filter.until {
            query = query.bind(fmt_date(until));
        }
        if let Some(project) = &filter.project {
            query = query.bind(project.clone());
        }
        if let Some(machine) = &filter.machine {
            query = query.bind(machine.clone());
        }

        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.into_iter().filter_map(row_to_record).collect())
    }

    /// Total number of stored records.
    pub async fn count_records(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM usage_records")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    /// Records with a timestamp at or after `since`.
    pub async fn count_records_since(&self, since: DateTime<Utc>) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM usage_records WHERE timestamp >= ?")
            .bind(fmt_ts(since))
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    /// Most recent stored event timestamp, if any.
    pub async fn newest_record_timestamp(&self) -> DbResult<Option<DateTime<Utc>>> {
        let row: (Option<String>,) = sqlx::query_as("SELECT MAX(timestamp) FROM usage_records")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0.as_deref().and_then(parse_ts))
    }

    /// Distinct dates currently holding at least one record, ascending.
    pub async fn dates_with_records(&self) -> DbResult<Vec<NaiveDate>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT date FROM usage_records ORDER BY date")
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().filter_map(|(d,)| parse_date(&d)).collect())
    }
}
