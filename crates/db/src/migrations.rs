/// Inline SQL migrations for the usage history schema.
///
/// Simple inline migrations rather than sqlx migration files: the schema is
/// small and self-contained, and a single array keeps the whole history
/// readable. Migrations are strictly additive — columns are added, never
/// dropped or rewritten, so an old binary can still read a newer database.
pub const MIGRATIONS: &[&str] = &[
    // Migration 1: usage_records table.
    // (session_id, message_id) is the cross-machine dedup key.
    r#"
CREATE TABLE IF NOT EXISTS usage_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    session_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    role TEXT NOT NULL,
    model TEXT,
    project_path TEXT NOT NULL,
    branch TEXT,
    producer_version TEXT NOT NULL,
    input_tokens INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    cache_write_tokens INTEGER NOT NULL,
    cache_read_tokens INTEGER NOT NULL,
    total_tokens INTEGER NOT NULL,
    UNIQUE(session_id, message_id)
);
"#,
    // Migration 2: usage_records indexes
    r#"CREATE INDEX IF NOT EXISTS idx_usage_records_date ON usage_records(date);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_usage_records_timestamp ON usage_records(timestamp);"#,
    // Migration 3: daily_aggregates table
    r#"
CREATE TABLE IF NOT EXISTS daily_aggregates (
    date TEXT PRIMARY KEY,
    input_tokens INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    cache_write_tokens INTEGER NOT NULL,
    cache_read_tokens INTEGER NOT NULL,
    total_tokens INTEGER NOT NULL,
    prompt_count INTEGER NOT NULL,
    response_count INTEGER NOT NULL,
    session_count INTEGER NOT NULL,
    computed_at TEXT NOT NULL
);
"#,
    // Migration 4: limits_snapshots table
    r#"
CREATE TABLE IF NOT EXISTS limits_snapshots (
    scope TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    percent_used INTEGER NOT NULL,
    reset_at TEXT,
    UNIQUE(scope, captured_at)
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_limits_snapshots_captured ON limits_snapshots(captured_at);"#,
    // Migration 5: multi-machine support — label each record with the device
    // that ingested it. Added as ALTER so pre-existing databases upgrade in
    // place.
    r#"ALTER TABLE usage_records ADD COLUMN machine_label TEXT;"#,
    r#"CREATE INDEX IF NOT EXISTS idx_usage_records_machine ON usage_records(machine_label);"#,
];
