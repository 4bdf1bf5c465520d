// crates/monitor/src/input.rs
//! Keyboard listener for the live dashboard.
//!
//! Runs on its own blocking thread so key reads never stall the watcher or
//! the limits refresher. Polls with a short tick instead of blocking
//! indefinitely so cancellation is observed within one polling interval.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Poll granularity; also the upper bound on shutdown latency.
pub const POLL_TICK: Duration = Duration::from_millis(200);

/// Actions the dashboard reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Leave the dashboard.
    Quit,
    /// Trigger an immediate ingestion pass.
    Refresh,
    /// Cycle to the next view mode.
    CycleView,
}

pub fn map_key(key: KeyEvent) -> Option<KeyAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyAction::Quit)
        }
        KeyCode::Char('r') => Some(KeyAction::Refresh),
        KeyCode::Char('v') | KeyCode::Tab => Some(KeyAction::CycleView),
        _ => None,
    }
}

/// Spawn the listener thread. It exits when `cancel` fires or the receiver
/// side of `tx` is dropped.
pub fn spawn_input_listener(
    tx: mpsc::Sender<KeyAction>,
    cancel: CancellationToken,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match event::poll(POLL_TICK) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) => {
                        if let Some(action) = map_key(key) {
                            if tx.blocking_send(action).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Input read error, stopping listener: {}", e);
                        break;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    // No terminal attached (piped output, CI): nothing to
                    // listen to, the other activities keep running.
                    debug!("Input poll unavailable, stopping listener: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(map_key(key(KeyCode::Char('q'))), Some(KeyAction::Quit));
        assert_eq!(map_key(key(KeyCode::Esc)), Some(KeyAction::Quit));
        assert_eq!(map_key(key(KeyCode::Char('r'))), Some(KeyAction::Refresh));
        assert_eq!(map_key(key(KeyCode::Tab)), Some(KeyAction::CycleView));
        assert_eq!(map_key(key(KeyCode::Char('x'))), None);
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(KeyAction::Quit)
        );
    }

    #[test]
    fn test_listener_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = spawn_input_listener(tx, cancel.clone());

        cancel.cancel();
        // Must exit within a small multiple of the polling interval.
        let start = std::time::Instant::now();
        handle.join().unwrap();
        assert!(start.elapsed() < POLL_TICK * 10);
    }
}
