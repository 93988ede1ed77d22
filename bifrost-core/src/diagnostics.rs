//! In-process diagnostics: a bounded history plus a broadcast channel of
//! hook-engine and plugin lifecycle events, so the status API (§6 ADDED)
//! and any future subscriber can observe what the engine is doing without
//! polling the arena directly. Modeled on the reference daemon's event
//! broadcast pattern (a `tokio::sync::broadcast` sender paired with a
//! capped ring buffer for late subscribers).
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::broadcast;

const HISTORY_CAPACITY: usize = 512;
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    HookInstalled { id: u32, priority: i32 },
    HookRemoved { id: u32 },
    HookFailed { id: u32, reason: String },
    PluginLoaded { identifier: String, path: String },
    PluginUnloaded { identifier: String },
    PluginMessage { identifier: String, message: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct Record {
    pub at_unix_ms: u128,
    pub event: DiagnosticEvent,
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Shared sink for diagnostic events: bounded history for polling
/// consumers (the `/status` endpoint) plus a broadcast channel for
/// streaming consumers (`/logs/stream`-style SSE).
pub struct Diagnostics {
    history: Mutex<VecDeque<Record>>,
    sender: broadcast::Sender<Record>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            sender,
        }
    }

    /// Record `event`, append it to the bounded history (evicting the
    /// oldest entry once full), and broadcast it to any live subscribers.
    /// Broadcast failures (no subscribers) are not an error.
    pub fn record(&self, event: DiagnosticEvent) {
        let record = Record {
            at_unix_ms: now_unix_ms(),
            event,
        };
        {
            let mut history = self.history.lock().unwrap();
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(record.clone());
        }
        let _ = self.sender.send(record);
    }

    pub fn history(&self) -> Vec<Record> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Record> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_retains_recorded_events_in_order() {
        let diagnostics = Diagnostics::new();
        diagnostics.record(DiagnosticEvent::HookInstalled { id: 1, priority: 0 });
        diagnostics.record(DiagnosticEvent::HookRemoved { id: 1 });
        let history = diagnostics.history();
        assert_eq!(history.len(), 2);
        assert!(matches!(history[0].event, DiagnosticEvent::HookInstalled { id: 1, .. }));
        assert!(matches!(history[1].event, DiagnosticEvent::HookRemoved { id: 1 }));
    }

    #[test]
    fn history_is_bounded() {
        let diagnostics = Diagnostics::new();
        for i in 0..(HISTORY_CAPACITY + 10) {
            diagnostics.record(DiagnosticEvent::HookRemoved { id: i as u32 });
        }
        assert_eq!(diagnostics.history().len(), HISTORY_CAPACITY);
    }

    #[tokio::test]
    async fn subscribers_receive_recorded_events() {
        let diagnostics = Diagnostics::new();
        let mut rx = diagnostics.subscribe();
        diagnostics.record(DiagnosticEvent::PluginLoaded {
            identifier: "demo".to_string(),
            path: "demo.dll".to_string(),
        });
        let received = rx.recv().await.unwrap();
        assert!(matches!(received.event, DiagnosticEvent::PluginLoaded { .. }));
    }
}
