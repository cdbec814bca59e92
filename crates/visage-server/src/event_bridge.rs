use std::sync::Arc;

use tokio::sync::broadcast;
use visage_core::events::TaskEvent;

use crate::client::ClientRegistry;

/// Subscribes to the orchestrator's event broadcast and forwards events
/// to connected WebSocket observers.
///
/// Delivery is fire-and-forget to every connected client; observers that
/// join late use the status queries instead of relying on replay.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Start the bridge. Spawns a task that reads from the broadcast
    /// channel and fans serialized events out to all clients.
    pub fn start(&self, mut rx: broadcast::Receiver<TaskEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(json) = serialize_event(&event) {
                            registry.broadcast_all(&json);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create an event bridge wired to a broadcast channel.
pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<TaskEvent>,
) -> tokio::task::JoinHandle<()> {
    let bridge = EventBridge::new(registry);
    bridge.start(rx)
}

/// Serialize an event to its wire form.
pub fn serialize_event(event: &TaskEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}
