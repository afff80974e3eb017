//! The broadcast hub: a single-writer multiplexer that fans status, log,
//! error and config-change events out to subscribed WebSocket clients.
//!
//! A dedicated task owns the subscriber registry so no broadcast ever holds
//! a lock across a network write; callers only ever touch bounded, mostly
//! unbounded-command channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::{Configuration, ConnectionStatus, LogLevel};

/// Per-subscriber outbound queue capacity. Filling this queue causes the
/// hub to drop further messages for that subscriber rather than block.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    Status {
        server_id: String,
        status: ConnectionStatus,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Log {
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        code: String,
        message: String,
        server_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ConfigChanged {
        config: Configuration,
        timestamp: DateTime<Utc>,
    },
}

impl HubEvent {
    /// Log events are opt-in via subscription; everything else is
    /// unconditionally broadcast per the hub's subscribe semantics.
    fn is_filtered(&self) -> bool {
        matches!(self, Self::Log { .. })
    }
}

struct Subscriber {
    tx: mpsc::Sender<Arc<HubEvent>>,
    wants_logs: bool,
}

enum Command {
    Register {
        id: u64,
        tx: mpsc::Sender<Arc<HubEvent>>,
    },
    Unregister {
        id: u64,
    },
    SetLogSubscription {
        id: u64,
        enabled: bool,
    },
    Broadcast(HubEvent),
}

/// Handle to the running hub task. Cloneable; dropping every clone stops
/// the loop once the command channel is closed.
#[derive(Clone)]
pub struct Hub {
    cmd_tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub").finish_non_exhaustive()
    }
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();

        tokio::spawn(async move {
            let mut subscribers: HashMap<u64, Subscriber> = HashMap::new();

            while let Some(command) = cmd_rx.recv().await {
                match command {
                    Command::Register { id, tx } => {
                        subscribers.insert(
                            id,
                            Subscriber {
                                tx,
                                wants_logs: false,
                            },
                        );
                    }
                    Command::Unregister { id } => {
                        subscribers.remove(&id);
                    }
                    Command::SetLogSubscription { id, enabled } => {
                        if let Some(sub) = subscribers.get_mut(&id) {
                            sub.wants_logs = enabled;
                        }
                    }
                    Command::Broadcast(event) => {
                        let filtered = event.is_filtered();
                        let event = Arc::new(event);
                        for sub in subscribers.values() {
                            if filtered && !sub.wants_logs {
                                continue;
                            }
                            // Best-effort: a full queue means this subscriber is
                            // slow, so we drop the message rather than block
                            // the hub loop or evict the subscriber.
                            let _ = sub.tx.try_send(Arc::clone(&event));
                        }
                    }
                }
            }
        });

        Self {
            cmd_tx,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers a new subscriber and returns its id plus the receiving end
    /// of its bounded outbound queue.
    #[must_use]
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<Arc<HubEvent>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let _ = self.cmd_tx.send(Command::Register { id, tx });
        (id, rx)
    }

    /// Removes a subscriber; guarantees no further sends are attempted for it
    /// once this call's command has been processed by the hub loop.
    pub fn unsubscribe(&self, id: u64) {
        let _ = self.cmd_tx.send(Command::Unregister { id });
    }

    /// Toggles whether `id` receives `Log` events. Status/error/config-change
    /// events are always delivered regardless of this setting.
    pub fn set_log_subscription(&self, id: u64, enabled: bool) {
        let _ = self.cmd_tx.send(Command::SetLogSubscription { id, enabled });
    }

    pub fn broadcast_status(&self, server_id: impl Into<String>, status: ConnectionStatus, message: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Broadcast(HubEvent::Status {
            server_id: server_id.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }));
    }

    pub fn broadcast_log(&self, level: LogLevel, message: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Broadcast(HubEvent::Log {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }));
    }

    pub fn broadcast_error(&self, code: impl Into<String>, message: impl Into<String>, server_id: Option<String>) {
        let _ = self.cmd_tx.send(Command::Broadcast(HubEvent::Error {
            code: code.into(),
            message: message.into(),
            server_id,
            timestamp: Utc::now(),
        }));
    }

    pub fn broadcast_config_changed(&self, config: Configuration) {
        let _ = self.cmd_tx.send(Command::Broadcast(HubEvent::ConfigChanged {
            config,
            timestamp: Utc::now(),
        }));
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn status_broadcast_reaches_every_subscriber() {
        let hub = Hub::new();
        let (_, mut rx1) = hub.subscribe();
        let (_, mut rx2) = hub.subscribe();

        hub.broadcast_status("s1", ConnectionStatus::Connected, "ready");

        let got1 = tokio::time::timeout(Duration::from_secs(1), rx1.recv()).await.unwrap();
        let got2 = tokio::time::timeout(Duration::from_secs(1), rx2.recv()).await.unwrap();
        assert!(matches!(got1.unwrap().as_ref(), HubEvent::Status { .. }));
        assert!(matches!(got2.unwrap().as_ref(), HubEvent::Status { .. }));
    }

    #[tokio::test]
    async fn log_events_require_subscription() {
        let hub = Hub::new();
        let (id, mut rx) = hub.subscribe();

        hub.broadcast_log(LogLevel::Info, "not delivered");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        hub.set_log_subscription(id, true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.broadcast_log(LogLevel::Info, "delivered");
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(matches!(got.unwrap().as_ref(), HubEvent::Log { .. }));
    }

    #[tokio::test]
    async fn a_full_subscriber_queue_does_not_block_other_subscribers() {
        let hub = Hub::new();
        let (_slow_id, mut slow_rx) = hub.subscribe();
        let (_, mut fast_rx) = hub.subscribe();

        for i in 0..SUBSCRIBER_QUEUE_CAPACITY + 10 {
            hub.broadcast_status("s1", ConnectionStatus::Connected, format!("tick {i}"));
        }

        // Give the hub loop a moment to drain the command channel.
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The fast subscriber's queue has plenty of delivered messages.
        let got = tokio::time::timeout(Duration::from_secs(1), fast_rx.recv()).await;
        assert!(got.is_ok());

        // The slow subscriber never drained; it should have exactly the
        // queue capacity worth of messages, with the rest dropped.
        let mut slow_count = 0;
        while slow_rx.try_recv().is_ok() {
            slow_count += 1;
        }
        assert!(slow_count <= SUBSCRIBER_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn unsubscribe_stops_further_delivery() {
        let hub = Hub::new();
        let (id, mut rx) = hub.subscribe();
        hub.unsubscribe(id);
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.broadcast_status("s1", ConnectionStatus::Connected, "after unsubscribe");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
