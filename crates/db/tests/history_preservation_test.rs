// Integration tests for history preservation: aggregates for days whose
// source logs have aged out of the producer's retention window must survive
// every later ingestion pass. Losing them by recomputing all dates from the
// currently visible log window is the failure mode this schema exists to
// prevent.

use claude_ledger_core::TimezoneMode;
use claude_ledger_db::{ingest_logs, Database};

fn assistant_line(session: &str, message: &str, ts: &str, input: u64) -> String {
    format!(
        r#"{{"type":"assistant","sessionId":"{session}","uuid":"{message}","timestamp":"{ts}","cwd":"/home/u/proj","version":"2.0.1","message":{{"model":"claude-sonnet-4-5-20250929","usage":{{"input_tokens":{input},"output_tokens":1}}}}}}"#
    )
}

async fn write_log(dir: &std::path::Path, file: &str, lines: &[String]) {
    let project = dir.join("-home-u-proj");
    tokio::fs::create_dir_all(&project).await.unwrap();
    tokio::fs::write(project.join(file), lines.join("\n"))
        .await
        .unwrap();
}

#[tokio::test]
async fn aggregates_survive_log_window_aging() {
    let tmp = tempfile::tempdir().unwrap();
    let old_log = tmp
        .path()
        .join("-home-u-proj")
        .join("old-session.jsonl");

    // Day D (Oct 1) is still inside the producer's log window.
    write_log(
        tmp.path(),
        "old-session.jsonl",
        &[assistant_line("s-old", "m1", "2025-10-01T10:00:00Z", 500)],
    )
    .await;

    let db = Database::open_in_memory().await.unwrap();
    ingest_logs(&db, tmp.path(), "desktop", TimezoneMode::Utc)
        .await
        .unwrap();

    let before = db.fetch_daily_aggregates(None, None).await.unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].input_tokens, 500);

    // The producer expires the old session log; a new day appears.
    tokio::fs::remove_file(&old_log).await.unwrap();
    write_log(
        tmp.path(),
        "new-session.jsonl",
        &[assistant_line("s-new", "m1", "2025-10-14T09:00:00Z", 42)],
    )
    .await;

    let report = ingest_logs(&db, tmp.path(), "desktop", TimezoneMode::Utc)
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(
        report.touched_dates,
        vec![chrono::NaiveDate::from_ymd_opt(2025, 10, 14).unwrap()],
        "only the new batch's date is touched"
    );

    let after = db.fetch_daily_aggregates(None, None).await.unwrap();
    assert_eq!(after.len(), 2);
    assert_eq!(
        after[0].input_tokens, 500,
        "day D's aggregate is unchanged after its logs aged out"
    );
    assert_eq!(after[1].input_tokens, 42);
}

#[tokio::test]
async fn aggregates_survive_even_when_records_are_gone() {
    // Harsher variant: the aggregate exists but the database holds no
    // records for that date at all (e.g. written by a machine running in
    // aggregate-only mode). An explicit recompute of that date must not
    // zero it out.
    let tmp = tempfile::tempdir().unwrap();
    write_log(
        tmp.path(),
        "session.jsonl",
        &[assistant_line("s1", "m1", "2025-10-01T10:00:00Z", 500)],
    )
    .await;

    let db = Database::open_in_memory().await.unwrap();
    ingest_logs(&db, tmp.path(), "desktop", TimezoneMode::Utc)
        .await
        .unwrap();

    sqlx::query("DELETE FROM usage_records")
        .execute(db.pool())
        .await
        .unwrap();

    let day = chrono::NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
    let rewritten = db.update_daily_aggregates(&[day]).await.unwrap();
    assert_eq!(rewritten, 0);

    let aggregates = db.fetch_daily_aggregates(None, None).await.unwrap();
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].input_tokens, 500);
}
