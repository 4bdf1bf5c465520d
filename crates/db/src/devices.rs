// crates/db/src/devices.rs
//! Per-device statistics.
//!
//! Devices are implicit: every record carries the `machine_label` resolved on
//! the machine that ingested it, and this projection is the only device
//! model — there is no separate registry to keep in sync.

use crate::records::parse_date;
use crate::{Database, DbResult};
use chrono::NaiveDate;
use serde::Serialize;

/// Usage rollup for one machine writing into the shared database.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    pub machine_label: String,
    pub record_count: i64,
    pub session_count: i64,
    pub response_count: i64,
    pub total_tokens: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_write_tokens: i64,
    pub cache_read_tokens: i64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

type DeviceRow = (
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    Option<String>,
    Option<String>,
);

impl Database {
    /// Usage statistics grouped by machine label, largest first. Records
    /// ingested before multi-machine support land under "unknown".
    pub async fn device_stats(&self) -> DbResult<Vec<DeviceStats>> {
        let rows: Vec<DeviceRow> = sqlx::query_as(
            r#"
            SELECT
                COALESCE(machine_label, 'unknown') AS machine,
                COUNT(*),
                COUNT(DISTINCT session_id),
                COALESCE(SUM(CASE WHEN role = 'assistant' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(total_tokens), 0),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0),
                COALESCE(SUM(cache_write_tokens), 0),
                COALESCE(SUM(cache_read_tokens), 0),
                MIN(date),
                MAX(date)
            FROM usage_records
            GROUP BY machine
            ORDER BY SUM(total_tokens) DESC
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DeviceStats {
                machine_label: row.0,
                record_count: row.1,
                session_count: row.2,
                response_count: row.3,
                total_tokens: row.4,
                input_tokens: row.5,
                output_tokens: row.6,
                cache_write_tokens: row.7,
                cache_read_tokens: row.8,
                first_date: row.9.as_deref().and_then(parse_date),
                last_date: row.10.as_deref().and_then(parse_date),
            })
            .collect())
    }
}
