use super::transport::{EmailMessage, NotificationTransport, TransportResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Message delivered to a websocket group
#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub group: String,
    pub payload: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

/// Per-group broadcast channels backing websocket notifications.
///
/// A websocket server subscribes each connection to the `Job-{pk}` groups it
/// follows; the hub only carries websocket traffic and ignores print and
/// email deliveries.
#[derive(Debug, Clone)]
pub struct WebSocketHub {
    groups: Arc<DashMap<String, broadcast::Sender<GroupMessage>>>,
    capacity: usize,
}

impl WebSocketHub {
    /// Create a hub whose group channels hold `capacity` messages each
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a group, creating its channel on first use
    pub fn subscribe(&self, group: &str) -> broadcast::Receiver<GroupMessage> {
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish to a group. Groups nobody listens to are skipped, and a group
    /// whose last subscriber has gone is dropped.
    pub fn publish(&self, group: &str, payload: Value) -> usize {
        let delivered = {
            let Some(sender) = self.groups.get(group) else {
                return 0;
            };
            if sender.receiver_count() == 0 {
                None
            } else {
                let message = GroupMessage {
                    group: group.to_string(),
                    payload,
                    published_at: chrono::Utc::now(),
                };
                // a listener may disconnect between the count and the send
                Some(sender.send(message).unwrap_or(0))
            }
        };

        match delivered {
            Some(count) => count,
            None => {
                self.groups
                    .remove_if(group, |_, sender| sender.receiver_count() == 0);
                0
            }
        }
    }

    /// Number of groups with a live channel
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn subscriber_count(&self, group: &str) -> usize {
        self.groups
            .get(group)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for WebSocketHub {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_WEBSOCKET_CAPACITY)
    }
}

#[async_trait]
impl NotificationTransport for WebSocketHub {
    async fn send_print(&self, _text: &str) -> TransportResult<()> {
        Ok(())
    }

    async fn send_email(&self, _email: &EmailMessage) -> TransportResult<()> {
        Ok(())
    }

    async fn broadcast_websocket(&self, group: &str, payload: &Value) -> TransportResult<()> {
        let delivered = self.publish(group, payload.clone());
        tracing::trace!(group = %group, delivered, "websocket broadcast");
        Ok(())
    }
}
