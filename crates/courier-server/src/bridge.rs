use std::sync::Arc;

use tokio::sync::broadcast;

use courier_core::events::SessionEvent;

use crate::ws::SubscriberRegistry;

/// Drains the gateway's session event feed and fans each event out to the
/// WebSocket subscribers of its topic.
pub struct EventBridge {
    registry: Arc<SubscriberRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    /// Start the bridge task. Runs until the feed closes.
    pub fn start(&self, mut rx: broadcast::Receiver<SessionEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let topic = event.topic();
                        if let Ok(json) = serde_json::to_string(&event) {
                            registry.broadcast_to_topic(&topic, &json);
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
    registry: Arc<SubscriberRegistry>,
    rx: broadcast::Receiver<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    let bridge = EventBridge::new(registry);
    bridge.start(rx)
}
