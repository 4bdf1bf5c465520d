// crates/monitor/src/watcher.rs
//! File system watcher for the producer's log directory.
//!
//! Forwards a unit tick whenever a session log changes; the scheduler's
//! ingest loop debounces bursts before running a pass. Events are
//! pre-filtered to session-depth `.jsonl` paths so sub-agent and tool-output
//! churn inside session subdirectories never triggers ingestion.

use claude_ledger_core::is_session_log;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Start a watcher on `logs_dir`, sending a tick per relevant change.
///
/// The returned handle must be kept alive for the duration of monitoring —
/// dropping it stops the watch. A full channel simply drops the tick: a tick
/// is already pending, and one ingestion pass covers any number of changes.
pub fn start_log_watcher(
    logs_dir: &Path,
    tx: mpsc::Sender<()>,
) -> notify::Result<RecommendedWatcher> {
    let base = logs_dir.to_owned();
    let filter_base = base.clone();

    let mut watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) && event
                    .paths
                    .iter()
                    .any(|p| is_session_log(&filter_base, p));
                if relevant {
                    let _ = tx.try_send(());
                }
            }
            Err(e) => {
                error!("File watcher error: {}", e);
            }
        })?;

    if base.exists() {
        watcher.watch(&base, RecursiveMode::Recursive)?;
        info!("Watching {} for session log changes", base.display());
    } else {
        warn!(
            "Producer log directory does not exist: {}; watcher idle",
            base.display()
        );
    }

    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watcher_ticks_on_session_log_change() {
        let tmp = tempfile::tempdir().unwrap();
        let project = tmp.path().join("-home-u-proj");
        std::fs::create_dir_all(&project).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let _watcher = start_log_watcher(tmp.path(), tx).unwrap();

        // Give the backend a moment to arm, then touch a session log.
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(project.join("session.jsonl"), "{}\n").unwrap();

        let tick = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(tick.is_ok(), "expected a tick for a session log write");
    }

    #[tokio::test]
    async fn test_watcher_ignores_non_session_files() {
        let tmp = tempfile::tempdir().unwrap();
        let project = tmp.path().join("-home-u-proj");
        let subagents = project.join("session").join("subagents");
        std::fs::create_dir_all(&subagents).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let _watcher = start_log_watcher(tmp.path(), tx).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(subagents.join("agent-1.jsonl"), "{}\n").unwrap();
        std::fs::write(project.join("notes.txt"), "x").unwrap();

        let tick = tokio::time::timeout(Duration::from_millis(800), rx.recv()).await;
        assert!(tick.is_err(), "no tick expected for filtered paths");
    }

    #[tokio::test]
    async fn test_missing_dir_yields_idle_watcher() {
        let (tx, _rx) = mpsc::channel(16);
        let watcher = start_log_watcher(Path::new("/nonexistent-logs-dir"), tx);
        assert!(watcher.is_ok(), "missing directory must not be fatal");
    }
}
