// crates/core/src/types.rs
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Which clock calendar days are bucketed against.
///
/// `Local` matches what the user sees in their terminal; `Utc` keeps all
/// machines sharing one database on the same day boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimezoneMode {
    #[default]
    Local,
    Utc,
}

/// Message role in a logged event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Token usage for a single API call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_write_tokens + self.cache_read_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

/// One logged interaction event, parsed from a producer log line.
///
/// `(session_id, message_id)` is the sole deduplication key across every
/// machine writing into a shared database. Records are immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub message_id: String,
    pub role: Role,
    pub model: Option<String>,
    pub project_path: String,
    pub branch: Option<String>,
    pub producer_version: String,
    /// Resolved at ingestion time, not present in the log line itself.
    pub machine_label: Option<String>,
    pub tokens: TokenUsage,
}

impl UsageRecord {
    /// Calendar day this record belongs to under the given timezone mode.
    pub fn date_key(&self, tz: TimezoneMode) -> NaiveDate {
        match tz {
            TimezoneMode::Local => self.timestamp.with_timezone(&Local).date_naive(),
            TimezoneMode::Utc => self.timestamp.date_naive(),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }

    pub fn is_user_prompt(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant_response(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn with_machine_label(mut self, label: impl Into<String>) -> Self {
        self.machine_label = Some(label.into());
        self
    }
}

/// Scope of a producer quota window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    /// Rolling 5-hour session window
    Session,
    /// Current week, all models
    Week,
    /// Current week, secondary model (Opus on Max plans)
    WeekOpus,
}

impl LimitScope {
    pub const ALL: [LimitScope; 3] = [LimitScope::Session, LimitScope::Week, LimitScope::WeekOpus];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::Session => "session",
            LimitScope::Week => "week",
            LimitScope::WeekOpus => "week_opus",
        }
    }

    pub fn parse(s: &str) -> Option<LimitScope> {
        match s {
            "session" => Some(LimitScope::Session),
            "week" => Some(LimitScope::Week),
            "week_opus" => Some(LimitScope::WeekOpus),
            _ => None,
        }
    }
}

/// Point-in-time capture of the producer's self-reported quota usage.
///
/// `(scope, captured_at)` is unique; snapshots are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsSnapshot {
    pub scope: LimitScope,
    pub captured_at: DateTime<Utc>,
    pub percent_used: i64,
    /// Producer-formatted reset description (e.g. "Oct 18, 3pm (Europe/Brussels)").
    pub reset_at: Option<String>,
}

/// Per-day rollup used for long-range views.
///
/// For any date with stored records, the aggregate equals the sum over those
/// records. Dates whose records have aged out of the producer's log window
/// keep their historical aggregate untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_write_tokens: i64,
    pub cache_read_tokens: i64,
    pub total_tokens: i64,
    pub prompt_count: i64,
    pub response_count: i64,
    pub session_count: i64,
}
