// crates/monitor/src/scheduler.rs
//! Background scheduler for the live dashboard.
//!
//! Three independently-scheduled activities feed one watch channel:
//!
//! - the **ingest loop**, woken by file-change ticks, debounced so a burst of
//!   writes becomes one ingestion pass;
//! - the **limits refresher**, on a fixed interval re-read from the config
//!   file each cycle so changes take effect without restart;
//! - the **input listener**, on its own blocking thread.
//!
//! None of them hold locks across a storage call: the database's WAL mode
//! plus busy timeout is the sole write-serialization mechanism, and the view
//! channel is a last-write-wins cell. Shutdown cancels the token and then
//! *joins* every task — in-flight writes always complete, nothing is aborted
//! mid-transaction.

use crate::input::{spawn_input_listener, KeyAction};
use crate::limits_probe::capture_limits;
use crate::view::{IngestSummary, ViewMode, ViewSnapshot};
use crate::watcher::start_log_watcher;
use anyhow::Result;
use claude_ledger_core::{TimezoneMode, UserConfig};
use claude_ledger_db::{ingest_logs, Database};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Quiet window after the last file-change tick before ingesting.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Floor for the configurable limits refresh interval.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct SchedulerCtx {
    db: Database,
    logs_dir: PathBuf,
    machine_label: String,
    tz: TimezoneMode,
    view_tx: watch::Sender<ViewSnapshot>,
    cancel: CancellationToken,
}

impl SchedulerCtx {
    /// One ingestion pass followed by a snapshot publish.
    async fn ingest_and_publish(&self, mode: ViewMode) {
        let summary = match ingest_logs(&self.db, &self.logs_dir, &self.machine_label, self.tz)
            .await
        {
            Ok(report) => {
                if report.inserted > 0 {
                    info!(
                        inserted = report.inserted,
                        duplicates = report.duplicates,
                        "Ingested new usage records"
                    );
                }
                Some(IngestSummary::from(&report))
            }
            Err(e) => {
                warn!("Ingestion pass failed (will retry on next change): {}", e);
                None
            }
        };
        self.publish(mode, summary).await;
    }

    async fn publish(&self, mode: ViewMode, last_ingest: Option<IngestSummary>) {
        let last_ingest =
            last_ingest.or_else(|| self.view_tx.borrow().last_ingest);
        match ViewSnapshot::load(&self.db, mode, last_ingest).await {
            Ok(snapshot) => {
                let _ = self.view_tx.send(snapshot);
            }
            Err(e) => warn!("Could not refresh view snapshot: {}", e),
        }
    }
}

/// Run the dashboard until the user quits or the process receives Ctrl-C.
pub async fn run_monitor(db: Database, config: UserConfig, logs_dir: PathBuf) -> Result<()> {
    let cancel = CancellationToken::new();
    let machine_label = config.machine_label();
    let tz = config.timezone;

    let initial = ViewSnapshot::load(&db, ViewMode::Daily, None).await?;
    let (view_tx, view_rx) = watch::channel(initial);

    let ctx = SchedulerCtx {
        db,
        logs_dir,
        machine_label,
        tz,
        view_tx,
        cancel: cancel.clone(),
    };

    // Initial catch-up pass before any watcher event arrives.
    ctx.ingest_and_publish(ViewMode::Daily).await;

    // File watcher → debounced ingest loop.
    let (file_tx, file_rx) = mpsc::channel::<()>(16);
    let _watcher = start_log_watcher(&ctx.logs_dir, file_tx)?;
    let ingest_task = tokio::spawn(ingest_loop(ctx.clone(), file_rx));

    // Periodic limits refresher.
    let limits_task = tokio::spawn(limits_loop(ctx.clone()));

    // Keyboard listener thread + key handling loop.
    let (key_tx, key_rx) = mpsc::channel::<KeyAction>(16);
    let input_thread = spawn_input_listener(key_tx, cancel.clone());
    let key_task = tokio::spawn(key_loop(ctx.clone(), key_rx));

    // Render consumer: the out-of-scope rendering layer reduced to a line
    // printer reading the latest snapshot.
    let render_task = tokio::spawn(render_loop(view_rx, cancel.clone()));

    // Wait for quit (key loop cancels) or Ctrl-C.
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            cancel.cancel();
        }
    }

    // Join, never abort: in-flight storage writes run to completion.
    let _ = ingest_task.await;
    let _ = limits_task.await;
    let _ = key_task.await;
    let _ = render_task.await;
    let _ = tokio::task::spawn_blocking(move || input_thread.join()).await;

    Ok(())
}

/// Debounce file ticks, then run one ingestion pass per burst.
async fn ingest_loop(ctx: SchedulerCtx, mut file_rx: mpsc::Receiver<()>) {
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            tick = file_rx.recv() => {
                if tick.is_none() {
                    break;
                }
                // Coalesce the burst: keep draining until the channel stays
                // quiet for the debounce window.
                loop {
                    match tokio::time::timeout(DEBOUNCE_WINDOW, file_rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) | Err(_) => break,
                    }
                }
                if ctx.cancel.is_cancelled() {
                    break;
                }
                debug!("File change burst settled; running ingestion pass");
                let mode = ctx.view_tx.borrow().mode;
                ctx.ingest_and_publish(mode).await;
            }
        }
    }
}

/// Capture limits on a fixed interval.
async fn limits_loop(ctx: SchedulerCtx) {
    loop {
        // Re-read the interval each cycle so `config set refresh-interval`
        // takes effect without a restart.
        let interval = Duration::from_secs(UserConfig::load().refresh_interval_secs)
            .max(MIN_REFRESH_INTERVAL);
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if ctx.cancel.is_cancelled() {
            break;
        }

        match capture_limits().await {
            Ok(capture) => {
                match ctx.db.record_limits_capture(&capture.to_snapshots()).await {
                    Ok(_) => {
                        let mode = ctx.view_tx.borrow().mode;
                        ctx.publish(mode, None).await;
                    }
                    Err(e) => warn!("Could not store limits snapshot: {}", e),
                }
            }
            Err(e) => debug!("Limits probe missed this cycle: {}", e),
        }
    }
}

/// React to key actions from the input listener.
async fn key_loop(ctx: SchedulerCtx, mut key_rx: mpsc::Receiver<KeyAction>) {
    while let Some(action) = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        action = key_rx.recv() => action,
    } {
        match action {
            KeyAction::Quit => {
                ctx.cancel.cancel();
                break;
            }
            KeyAction::Refresh => {
                let mode = ctx.view_tx.borrow().mode;
                ctx.ingest_and_publish(mode).await;
            }
            KeyAction::CycleView => {
                let mode = ctx.view_tx.borrow().mode.cycle();
                ctx.publish(mode, None).await;
            }
        }
    }
}

/// Print the latest snapshot whenever one is published.
async fn render_loop(mut view_rx: watch::Receiver<ViewSnapshot>, cancel: CancellationToken) {
    println!("{}", view_rx.borrow().summary_line());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = view_rx.borrow_and_update().summary_line();
                println!("{line}");
            }
        }
    }
}
