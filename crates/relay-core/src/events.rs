//! Process-wide event bus for log and progress events.
//!
//! Any context may publish (non-blocking, drop-on-full); one dedicated
//! consumer task drains the bounded channel into a capped history ring and a
//! broadcast fan-out for live subscribers (the SSE plumbing and tests attach
//! here). Publishing also mirrors log events into `tracing` so the bus is
//! never the only place diagnostics land.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use chrono::Local;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::engine::EngineStatus;

const HISTORY_CAP: usize = 500;
const BROADCAST_CAP: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    /// Wall-clock `HH:MM:SS`, matching what the log viewer displays.
    pub timestamp: String,
    pub message: String,
    pub level: LogLevel,
}

/// Progress snapshot broadcast on every bookkeeping update.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Progress {
    pub status: EngineStatus,
    pub current: u64,
    pub total: u64,
    pub remaining_time: u64,
    pub total_posts_ever: u64,
    pub total_failures_ever: u64,
}

#[derive(Clone, Debug)]
pub enum Event {
    Log(LogEntry),
    Progress(Progress),
}

struct Shared {
    history: Mutex<VecDeque<LogEntry>>,
    fanout: broadcast::Sender<Event>,
}

/// Cloneable handle to the bus. All methods are synchronous and safe to call
/// from any task; a full queue drops the event rather than blocking.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
    shared: Arc<Shared>,
}

impl EventBus {
    /// Create the bus and spawn its consumer task. Must be called from within
    /// a tokio runtime.
    pub fn new(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Event>(capacity);
        let (fanout, _) = broadcast::channel(BROADCAST_CAP);
        let shared = Arc::new(Shared {
            history: Mutex::new(VecDeque::new()),
            fanout,
        });

        let consumer_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Event::Log(entry) = &event {
                    let mut history = consumer_shared
                        .history
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    history.push_back(entry.clone());
                    while history.len() > HISTORY_CAP {
                        history.pop_front();
                    }
                }
                // No subscribers is fine.
                let _ = consumer_shared.fanout.send(event);
            }
        });

        Self { tx, shared }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Error => tracing::error!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            _ => tracing::info!("{message}"),
        }

        let entry = LogEntry {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            message,
            level,
        };
        let _ = self.tx.try_send(Event::Log(entry));
    }

    pub fn progress(&self, progress: Progress) {
        let _ = self.tx.try_send(Event::Progress(progress));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.fanout.subscribe()
    }

    pub fn history(&self) -> Vec<LogEntry> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_logs() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.log(LogLevel::Info, "hello");

        let event = rx.recv().await.unwrap();
        match event {
            Event::Log(entry) => {
                assert_eq!(entry.message, "hello");
                assert_eq!(entry.level, LogLevel::Info);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn history_is_capped() {
        let bus = EventBus::new(2048);
        for i in 0..(HISTORY_CAP + 50) {
            bus.log(LogLevel::Info, format!("line {i}"));
        }

        // Give the consumer task a chance to drain.
        tokio::task::yield_now().await;
        let mut tries = 0;
        while bus.history().len() < HISTORY_CAP && tries < 100 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            tries += 1;
        }

        let history = bus.history();
        assert_eq!(history.len(), HISTORY_CAP);
        assert_eq!(
            history.last().unwrap().message,
            format!("line {}", HISTORY_CAP + 49)
        );
    }

    #[tokio::test]
    async fn progress_events_fan_out() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.progress(Progress {
            status: EngineStatus::Running,
            current: 1,
            total: 2,
            remaining_time: 5,
            total_posts_ever: 3,
            total_failures_ever: 0,
        });

        match rx.recv().await.unwrap() {
            Event::Progress(p) => {
                assert_eq!(p.current, 1);
                assert_eq!(p.total, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
