// crates/db/src/limits.rs
//! Quota limits snapshots.
//!
//! Append-only, deduplicated on `(scope, captured_at)` with the same
//! insert-or-ignore discipline as usage records. A periodic background
//! refresh appends; readers take the latest row per scope.

use crate::records::{fmt_ts, parse_ts};
use crate::{Database, DbResult};
use chrono::{DateTime, Utc};
use claude_ledger_core::{LimitScope, LimitsSnapshot};
use tracing::warn;

type LimitsRow = (String, String, i64, Option<String>);

fn row_to_snapshot(row: LimitsRow) -> Option<LimitsSnapshot> {
    let scope = match LimitScope::parse(&row.0) {
        Some(s) => s,
        None => {
            warn!("Skipping limits snapshot with unknown scope: {}", row.0);
            return None;
        }
    };
    Some(LimitsSnapshot {
        scope,
        captured_at: parse_ts(&row.1)?,
        percent_used: row.2,
        reset_at: row.3,
    })
}

impl Database {
    /// Insert one snapshot; returns `false` when `(scope, captured_at)` was
    /// already present.
    pub async fn record_limits_snapshot(&self, snapshot: &LimitsSnapshot) -> DbResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO limits_snapshots (scope, captured_at, percent_used, reset_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(snapshot.scope.as_str())
        .bind(fmt_ts(snapshot.captured_at))
        .bind(snapshot.percent_used)
        .bind(&snapshot.reset_at)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert one capture's worth of snapshots (one row per scope).
    pub async fn record_limits_capture(&self, snapshots: &[LimitsSnapshot]) -> DbResult<usize> {
        let mut inserted = 0;
        for snapshot in snapshots {
            if self.record_limits_snapshot(snapshot).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Most recent snapshot for the given scope.
    pub async fn fetch_latest_limits(&self, scope: LimitScope) -> DbResult<Option<LimitsSnapshot>> {
        let row: Option<LimitsRow> = sqlx::query_as(
            "SELECT scope, captured_at, percent_used, reset_at FROM limits_snapshots \
             WHERE scope = ? ORDER BY captured_at DESC LIMIT 1",
        )
        .bind(scope.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.and_then(row_to_snapshot))
    }

    /// Snapshots for a scope captured at or after `since`, ascending.
    pub async fn fetch_limits_history(
        &self,
        scope: LimitScope,
        since: DateTime<Utc>,
    ) -> DbResult<Vec<LimitsSnapshot>> {
        let rows: Vec<LimitsRow> = sqlx::query_as(
            "SELECT scope, captured_at, percent_used, reset_at FROM limits_snapshots \
             WHERE scope = ? AND captured_at >= ? ORDER BY captured_at",
        )
        .bind(scope.as_str())
        .bind(fmt_ts(since))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().filter_map(row_to_snapshot).collect())
    }

    /// Drop snapshots older than `cutoff`. Returns the number pruned.
    pub async fn prune_limits_snapshots(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM limits_snapshots WHERE captured_at < ?")
            .bind(fmt_ts(cutoff))
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
