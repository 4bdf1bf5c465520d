// crates/db/src/aggregates.rs
//! Daily aggregate maintenance.
//!
//! Aggregates are recomputed **only for dates whose underlying records
//! changed** — callers pass exactly the set of dates touched by the most
//! recent insert batch. Never recompute every date from the currently
//! visible log window: the producer expires old logs, and wholesale
//! recomputation would erase the history those logs no longer cover.
//! Recomputing a date with zero stored records leaves any existing
//! aggregate for that date untouched for the same reason.

use crate::records::{fmt_date, fmt_ts, parse_date};
use crate::{Database, DbResult};
use chrono::{NaiveDate, Utc};
use claude_ledger_core::DailyAggregate;

type AggregateRow = (String, i64, i64, i64, i64, i64, i64, i64, i64);

fn row_to_aggregate(row: AggregateRow) -> Option<DailyAggregate> {
    Some(DailyAggregate {
        date: parse_date(&row.0)?,
        input_tokens: row.1,
        output_tokens: row.2,
        cache_write_tokens: row.3,
        cache_read_tokens: row.4,
        total_tokens: row.5,
        prompt_count: row.6,
        response_count: row.7,
        session_count: row.8,
    })
}

/// All dates between `from` and `to`, inclusive. Used for gap filling.
pub fn fill_range(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = from;
    while current <= to {
        dates.push(current);
        current = match current.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    dates
}

impl Database {
    /// Recompute aggregates for exactly the given dates by summing currently
    /// stored records. Idempotent: the same date recomputed twice from the
    /// same records yields the same row. Returns the number of dates
    /// actually rewritten.
    pub async fn update_daily_aggregates(&self, dates: &[NaiveDate]) -> DbResult<usize> {
        let computed_at = fmt_ts(Utc::now());
        let mut updated = 0;

        for date in dates {
            let date_key = fmt_date(*date);

            let row: (i64, i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(cache_write_tokens), 0),
                    COALESCE(SUM(cache_read_tokens), 0),
                    COALESCE(SUM(total_tokens), 0),
                    COALESCE(SUM(CASE WHEN role = 'user' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN role = 'assistant' THEN 1 ELSE 0 END), 0),
                    COUNT(DISTINCT session_id)
                FROM usage_records
                WHERE date = ?
                "#,
            )
            .bind(&date_key)
            .fetch_one(self.pool())
            .await?;

            // No stored records for this date: its logs have aged out, or it
            // was never populated locally. The existing aggregate (possibly
            // written by another machine) is the only surviving history —
            // leave it alone.
            if row.0 == 0 {
                continue;
            }

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO daily_aggregates (
                    date, input_tokens, output_tokens, cache_write_tokens,
                    cache_read_tokens, total_tokens, prompt_count,
                    response_count, session_count, computed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&date_key)
            .bind(row.1)
            .bind(row.2)
            .bind(row.3)
            .bind(row.4)
            .bind(row.5)
            .bind(row.6)
            .bind(row.7)
            .bind(row.8)
            .bind(&computed_at)
            .execute(self.pool())
            .await?;

            updated += 1;
        }

        Ok(updated)
    }

    /// Fetch aggregates in the inclusive date range, ascending.
    pub async fn fetch_daily_aggregates(
        &self,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> DbResult<Vec<DailyAggregate>> {
        let mut sql = String::from(
            "SELECT date, input_tokens, output_tokens, cache_write_tokens, cache_read_tokens, \
             total_tokens, prompt_count, response_count, session_count \
             FROM daily_aggregates WHERE 1=1",
        );
        if since.is_some() {
            sql.push_str(" AND date >= ?");
        }
        if until.is_some() {
            sql.push_str(" AND date <= ?");
        }
        sql.push_str(" ORDER BY date");

        let mut query = sqlx::query_as::<_, AggregateRow>(&sql);
        if let Some(since) = since {
            query = query.bind(fmt_date(since));
        }
        if let Some(until) = until {
            query = query.bind(fmt_date(until));
        }

        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.into_iter().filter_map(row_to_aggregate).collect())
    }

    /// Insert zero-valued aggregates for days with no data between the oldest
    /// aggregate and `today`, so long-range views get complete coverage.
    /// `INSERT OR IGNORE` keeps every real aggregate untouched.
    pub async fn fill_empty_days(&self, today: NaiveDate) -> DbResult<usize> {
        let oldest: (Option<String>,) = sqlx::query_as("SELECT MIN(date) FROM daily_aggregates")
            .fetch_one(self.pool())
            .await?;
        let oldest = match oldest.0.as_deref().and_then(parse_date) {
            Some(d) => d,
            None => return Ok(0),
        };

        let computed_at = fmt_ts(Utc::now());
        let mut filled = 0;
        for date in fill_range(oldest, today) {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO daily_aggregates (
                    date, input_tokens, output_tokens, cache_write_tokens,
                    cache_read_tokens, total_tokens, prompt_count,
                    response_count, session_count, computed_at
                ) VALUES (?, 0, 0, 0, 0, 0, 0, 0, 0, ?)
                "#,
            )
            .bind(fmt_date(date))
            .bind(&computed_at)
            .execute(self.pool())
            .await?;
            filled += result.rows_affected() as usize;
        }

        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordFilter;
    use chrono::TimeZone;
    use claude_ledger_core::{Role, TimezoneMode, TokenUsage, UsageRecord};
    use pretty_assertions::assert_eq;

    fn record(session: &str, message: &str, day: u32, role: Role, tokens: u64) -> UsageRecord {
        UsageRecord {
            timestamp: chrono::Utc.with_ymd_and_hms(2025, 10, day, 10, 0, 0).unwrap(),
            session_id: session.into(),
            message_id: message.into(),
            role,
            model: None,
            project_path: "/p".into(),
            branch: None,
            producer_version: "2.0.1".into(),
            machine_label: None,
            tokens: TokenUsage {
                input_tokens: tokens,
                output_tokens: 0,
                cache_write_tokens: 0,
                cache_read_tokens: 0,
            },
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    #[tokio::test]
    async fn test_aggregate_sums_match_records() {
        let db = Database::open_in_memory().await.unwrap();
        let records = vec![
            record("s1", "u1", 14, Role::User, 0),
            record("s1", "m1", 14, Role::Assistant, 100),
            record("s2", "m2", 14, Role::Assistant, 200),
        ];
        db.insert_records(&records, TimezoneMode::Utc).await.unwrap();
        let updated = db.update_daily_aggregates(&[day(14)]).await.unwrap();
        assert_eq!(updated, 1);

        let aggregates = db.fetch_daily_aggregates(None, None).await.unwrap();
        assert_eq!(aggregates.len(), 1);
        let agg = &aggregates[0];
        assert_eq!(agg.date, day(14));
        assert_eq!(agg.input_tokens, 300);
        assert_eq!(agg.total_tokens, 300);
        assert_eq!(agg.prompt_count, 1);
        assert_eq!(agg.response_count, 2);
        assert_eq!(agg.session_count, 2);
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_records(
            &[record("s1", "m1", 14, Role::Assistant, 100)],
            TimezoneMode::Utc,
        )
        .await
        .unwrap();

        db.update_daily_aggregates(&[day(14)]).await.unwrap();
        let first = db.fetch_daily_aggregates(None, None).await.unwrap();
        db.update_daily_aggregates(&[day(14)]).await.unwrap();
        let second = db.fetch_daily_aggregates(None, None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_zero_record_date_preserves_existing_aggregate() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_records(
            &[record("s1", "m1", 14, Role::Assistant, 100)],
            TimezoneMode::Utc,
        )
        .await
        .unwrap();
        db.update_daily_aggregates(&[day(14)]).await.unwrap();

        // Simulate the source records aging out of the database entirely
        // (e.g. an aggregate imported from another machine's era).
        sqlx::query("DELETE FROM usage_records")
            .execute(db.pool())
            .await
            .unwrap();
        assert!(db
            .fetch_records(&RecordFilter::default())
            .await
            .unwrap()
            .is_empty());

        let updated = db.update_daily_aggregates(&[day(14)]).await.unwrap();
        assert_eq!(updated, 0, "zero-record date must not be rewritten");

        let aggregates = db.fetch_daily_aggregates(None, None).await.unwrap();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].input_tokens, 100, "history must survive");
    }

    #[tokio::test]
    async fn test_only_requested_dates_recomputed() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_records(
            &[
                record("s1", "m1", 13, Role::Assistant, 100),
                record("s1", "m2", 14, Role::Assistant, 200),
            ],
            TimezoneMode::Utc,
        )
        .await
        .unwrap();

        db.update_daily_aggregates(&[day(14)]).await.unwrap();
        let aggregates = db.fetch_daily_aggregates(None, None).await.unwrap();
        assert_eq!(aggregates.len(), 1, "only the requested date is rolled up");
        assert_eq!(aggregates[0].date, day(14));
    }

    #[tokio::test]
    async fn test_fill_empty_days() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_records(
            &[record("s1", "m1", 10, Role::Assistant, 100)],
            TimezoneMode::Utc,
        )
        .await
        .unwrap();
        db.update_daily_aggregates(&[day(10)]).await.unwrap();

        let filled = db.fill_empty_days(day(13)).await.unwrap();
        assert_eq!(filled, 3, "days 11, 12, 13 are gap-filled");

        let aggregates = db.fetch_daily_aggregates(None, None).await.unwrap();
        assert_eq!(aggregates.len(), 4);
        assert_eq!(aggregates[0].input_tokens, 100, "real data untouched");
        assert_eq!(aggregates[1].total_tokens, 0);
    }

    #[test]
    fn test_fill_range_inclusive() {
        let range = fill_range(day(10), day(12));
        assert_eq!(range, vec![day(10), day(11), day(12)]);
        assert_eq!(fill_range(day(12), day(10)), Vec::<NaiveDate>::new());
    }
}
