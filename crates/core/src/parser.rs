// crates/core/src/parser.rs
//! Log line parser for the producer's newline-delimited JSON session format.
//!
//! `parse_line` is a pure function from one raw line to a tagged outcome:
//! a canonical `UsageRecord`, a typed skip, or a typed failure. A malformed
//! line never aborts processing of the rest of the file — the file-level
//! driver counts it and continues. Unknown fields are ignored so vendor
//! schema drift (new optional fields) does not break ingestion.

use crate::error::ParseError;
use crate::types::{Role, TokenUsage, UsageRecord};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Outcome of parsing a single log line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// A valid usage event.
    Record(Box<UsageRecord>),
    /// A line that is legitimately not a usage event. Not an error.
    Skip(ParseSkip),
    /// A line that should have been a usage event but could not be parsed.
    Failure(ParseFailure),
}

/// Expected non-record lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseSkip {
    /// Empty or whitespace-only line.
    EmptyLine,
    /// An event type this core does not track (summary, progress, ...).
    NonUsageEvent { event_type: String },
    /// A system event (tool use, hooks) carrying no token usage.
    SystemEventWithoutUsage,
    /// Internal test artifact, filtered like the producer's own tooling does.
    SyntheticModel,
}

/// A line that failed to parse into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub reason: FailureReason,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    MalformedJson,
    /// One of the four hard-required fields is absent or mistyped.
    MissingField(&'static str),
    BadTimestamp,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            FailureReason::MalformedJson => write!(f, "malformed JSON: {}", self.detail),
            FailureReason::MissingField(field) => write!(f, "missing required field `{field}`"),
            FailureReason::BadTimestamp => write!(f, "unparseable timestamp: {}", self.detail),
        }
    }
}

/// Aggregated result of parsing one log file.
#[derive(Debug, Default)]
pub struct FileParse {
    pub records: Vec<UsageRecord>,
    pub skipped: usize,
    pub failed: usize,
}

fn failure(reason: FailureReason, detail: impl Into<String>) -> ParseOutcome {
    ParseOutcome::Failure(ParseFailure {
        reason,
        detail: detail.into(),
    })
}

/// Parse a single raw log line into a `ParseOutcome`.
///
/// Hard requirements for a record: session identifier, message identifier,
/// timestamp, and a role derivable from the `type` field. Token counts
/// default to zero when absent (user prompts carry no usage block).
pub fn parse_line(line: &str) -> ParseOutcome {
    let line = line.trim();
    if line.is_empty() {
        return ParseOutcome::Skip(ParseSkip::EmptyLine);
    }

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return failure(FailureReason::MalformedJson, e.to_string()),
    };

    let event_type = match value.get("type").and_then(|t| t.as_str()) {
        Some(t) => t,
        None => return failure(FailureReason::MissingField("type"), ""),
    };

    let role = match Role::parse(event_type) {
        Some(r) => r,
        None => {
            return ParseOutcome::Skip(ParseSkip::NonUsageEvent {
                event_type: event_type.to_string(),
            })
        }
    };

    let message = value.get("message");
    let usage = message.and_then(|m| m.get("usage"));

    // System lines (tool use, hook output) only become records when the
    // producer attached usage data to them; the common case is a skip.
    if role == Role::System && usage.is_none() {
        return ParseOutcome::Skip(ParseSkip::SystemEventWithoutUsage);
    }

    let session_id = match value.get("sessionId").and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => return failure(FailureReason::MissingField("sessionId"), ""),
    };
    let message_id = match value.get("uuid").and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => return failure(FailureReason::MissingField("uuid"), ""),
    };
    let timestamp_str = match value.get("timestamp").and_then(|v| v.as_str()) {
        Some(s) => s,
        None => return failure(FailureReason::MissingField("timestamp"), ""),
    };
    let timestamp = match parse_timestamp(timestamp_str) {
        Some(ts) => ts,
        None => return failure(FailureReason::BadTimestamp, timestamp_str),
    };

    let model = message
        .and_then(|m| m.get("model"))
        .and_then(|v| v.as_str())
        .map(String::from);
    if model.as_deref() == Some("<synthetic>") {
        return ParseOutcome::Skip(ParseSkip::SyntheticModel);
    }

    let project_path = value
        .get("cwd")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let branch = value
        .get("gitBranch")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);
    let producer_version = value
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let tokens = usage.map(extract_token_usage).unwrap_or_default();

    ParseOutcome::Record(Box::new(UsageRecord {
        timestamp,
        session_id,
        message_id,
        role,
        model,
        project_path,
        branch,
        producer_version,
        machine_label: None,
        tokens,
    }))
}

/// Parse an RFC 3339 timestamp, normalizing to UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Sum the vendor's cache-creation sub-fields alongside the legacy flat field.
///
/// Newer producer versions split cache writes into ephemeral tiers under a
/// `cache_creation` object while older ones report a single flat count.
fn extract_token_usage(usage: &serde_json::Value) -> TokenUsage {
    let get = |v: &serde_json::Value, key: &str| v.get(key).and_then(|t| t.as_u64()).unwrap_or(0);

    let mut cache_write = get(usage, "cache_creation_input_tokens");
    if let Some(cache_creation) = usage.get("cache_creation") {
        cache_write = get(cache_creation, "cache_creation_input_tokens")
            + get(cache_creation, "ephemeral_5m_input_tokens")
            + get(cache_creation, "ephemeral_1h_input_tokens");
    }

    TokenUsage {
        input_tokens: get(usage, "input_tokens"),
        output_tokens: get(usage, "output_tokens"),
        cache_write_tokens: cache_write,
        cache_read_tokens: get(usage, "cache_read_input_tokens"),
    }
}

/// Parse a full producer log file, streaming line by line.
///
/// Skips and failures are counted, never fatal; only file-level I/O problems
/// surface as `ParseError`.
pub async fn parse_log_file(path: &Path) -> Result<FileParse, ParseError> {
    let file = File::open(path)
        .await
        .map_err(|e| ParseError::io(path, e))?;

    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let mut result = FileParse::default();
    let mut line_number: usize = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| ParseError::io(path, e))?
    {
        line_number += 1;
        match parse_line(&line) {
            ParseOutcome::Record(record) => result.records.push(*record),
            ParseOutcome::Skip(_) => result.skipped += 1,
            ParseOutcome::Failure(f) => {
                debug!("Skipping line {} in {:?}: {}", line_number, path, f);
                result.failed += 1;
            }
        }
    }

    Ok(result)
}
