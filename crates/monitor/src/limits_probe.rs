// crates/monitor/src/limits_probe.rs
//! Limits capture: ask the producer's own CLI what the quota windows look
//! like right now.
//!
//! Spawns `claude /usage`, waits a bounded time for the usage screen to
//! render, strips ANSI escapes, and pulls out the session / week / opus
//! percentages and reset descriptions. A probe miss (binary absent, trust
//! prompt, unparseable output) is a soft failure — the refresher logs it and
//! tries again next interval.

use chrono::{DateTime, Utc};
use claude_ledger_core::{LimitScope, LimitsSnapshot};
use regex_lite::Regex;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// How long the producer CLI gets to render the usage screen.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Could not spawn producer CLI: {0}")]
    Spawn(std::io::Error),

    #[error("Producer CLI asked for folder trust; run `claude` in a trusted folder first")]
    TrustPrompt,

    #[error("Producer CLI output did not contain usage percentages")]
    Unparseable,
}

/// One successful capture, all scopes at a single instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitsCapture {
    pub captured_at: DateTime<Utc>,
    pub session_pct: i64,
    pub week_pct: i64,
    pub opus_pct: i64,
    pub session_reset: Option<String>,
    pub week_reset: Option<String>,
    pub opus_reset: Option<String>,
}

impl LimitsCapture {
    /// One snapshot row per scope, sharing `captured_at` so readers see a
    /// capture atomically.
    pub fn to_snapshots(&self) -> Vec<LimitsSnapshot> {
        vec![
            LimitsSnapshot {
                scope: LimitScope::Session,
                captured_at: self.captured_at,
                percent_used: self.session_pct,
                reset_at: self.session_reset.clone(),
            },
            LimitsSnapshot {
                scope: LimitScope::Week,
                captured_at: self.captured_at,
                percent_used: self.week_pct,
                reset_at: self.week_reset.clone(),
            },
            LimitsSnapshot {
                scope: LimitScope::WeekOpus,
                captured_at: self.captured_at,
                percent_used: self.opus_pct,
                // The producer omits the opus reset when usage is 0%; the
                // week reset applies then.
                reset_at: self.opus_reset.clone().or_else(|| self.week_reset.clone()),
            },
        ]
    }
}

/// Spawn `claude /usage` and parse the rendered screen.
pub async fn capture_limits() -> Result<LimitsCapture, ProbeError> {
    let mut cmd = Command::new("claude");
    cmd.arg("/usage")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    // Strip producer env vars so a nested session is not detected.
    for (key, _) in std::env::vars() {
        if key.starts_with("CLAUDE") {
            cmd.env_remove(&key);
        }
    }

    let mut child = cmd.spawn().map_err(ProbeError::Spawn)?;
    let mut stdout = match child.stdout.take() {
        Some(s) => s,
        None => return Err(ProbeError::Unparseable),
    };

    // Read whatever renders within the timeout, then stop the child. The
    // usage screen is interactive and never exits on its own.
    let mut output = Vec::new();
    let _ = tokio::time::timeout(PROBE_TIMEOUT, async {
        let mut buf = [0u8; 4096];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    output.extend_from_slice(&buf[..n]);
                    if screen_complete(&output) {
                        break;
                    }
                }
            }
        }
    })
    .await;
    let _ = child.kill().await;

    parse_usage_screen(&String::from_utf8_lossy(&output), Utc::now())
}

fn screen_complete(output: &[u8]) -> bool {
    let text = String::from_utf8_lossy(output);
    text.contains("Do you trust the files in this folder?")
        || (text.contains("Current week (Opus)") && text.contains("Esc to exit"))
}

fn strip_ansi(text: &str) -> String {
    // CSI sequences plus single-char escapes; covers the producer's output.
    let ansi = Regex::new(r"\x1B(?:\[[0-9;?]*[ -/]*[@-~]|[@-Z\\-_])").unwrap();
    ansi.replace_all(text, "").into_owned()
}

/// Parse the rendered `/usage` screen into a capture.
pub fn parse_usage_screen(
    raw: &str,
    captured_at: DateTime<Utc>,
) -> Result<LimitsCapture, ProbeError> {
    let clean = strip_ansi(raw);

    if clean.contains("Do you trust the files in this folder?") {
        return Err(ProbeError::TrustPrompt);
    }

    let section =
        |header: &str| -> Option<(i64, Option<String>)> { parse_section(&clean, header) };

    let (session_pct, session_reset) =
        section("Current session").ok_or(ProbeError::Unparseable)?;
    let (week_pct, week_reset) =
        section("Current week (all models)").ok_or(ProbeError::Unparseable)?;
    let (opus_pct, opus_reset) =
        section("Current week (Opus)").ok_or(ProbeError::Unparseable)?;

    Ok(LimitsCapture {
        captured_at,
        session_pct,
        week_pct,
        opus_pct,
        session_reset,
        week_reset,
        opus_reset,
    })
}

/// Extract "<pct>% used ... Resets <when>" following a section header.
fn parse_section(text: &str, header: &str) -> Option<(i64, Option<String>)> {
    let start = text.find(header)? + header.len();
    let rest = &text[start..];
    // Sections are a few lines each; bound the scan so one section's reset
    // line is never attributed to the previous header.
    let window: String = rest.chars().take(400).collect();
    let window = match window.find("Current ") {
        Some(next) => &window[..next],
        None => &window[..],
    };

    let pct_re = Regex::new(r"(\d+)%\s*used").ok()?;
    let pct: i64 = pct_re.captures(window)?.get(1)?.as_str().parse().ok()?;

    let reset_re = Regex::new(r"Resets\s+([^\r\n]+)").ok()?;
    let reset = reset_re
        .captures(window)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());

    Some((pct, reset))
}
