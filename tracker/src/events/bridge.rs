//! Legacy pub/sub bridge.
//!
//! Older hosts do not register a callback; they listen on a generic
//! broadcast bridge for `analytics.<event>` notifications instead. The bridge
//! is a Tokio broadcast channel, so any number of subscribers may attach.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::types::Payload;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Topic prefix for analytics notifications.
pub const TOPIC_PREFIX: &str = "analytics.";

/// Shared reference to an EventBridge
pub type SharedEventBridge = Arc<EventBridge>;

/// A notification published on the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeNotification {
    /// `analytics.<event name>`
    pub topic: String,
    pub payload: Payload,
}

impl BridgeNotification {
    pub fn new(event_name: &str, payload: Payload) -> Self {
        Self {
            topic: topic_for(event_name),
            payload,
        }
    }

    /// Event name with the topic prefix stripped.
    pub fn event_name(&self) -> &str {
        self.topic
            .strip_prefix(TOPIC_PREFIX)
            .unwrap_or(self.topic.as_str())
    }
}

/// Bridge topic for an event name.
pub fn topic_for(event_name: &str) -> String {
    format!("{TOPIC_PREFIX}{event_name}")
}

/// Broadcast bridge for `analytics.*` notifications.
pub struct EventBridge {
    sender: broadcast::Sender<BridgeNotification>,
}

impl EventBridge {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this bridge
    pub fn shared(self) -> SharedEventBridge {
        Arc::new(self)
    }

    /// Publish `analytics.<event_name>`; returns how many subscribers saw it.
    pub fn publish(&self, event_name: &str, payload: Payload) -> usize {
        let notification = BridgeNotification::new(event_name, payload);
        match self.sender.send(notification) {
            Ok(count) => {
                debug!(event = event_name, receivers = count, "Bridge notification published");
                count
            }
            Err(_) => {
                debug!(event = event_name, "Bridge notification published (no receivers)");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeNotification> {
        self.sender.subscribe()
    }

    /// Subscribe to a single event name.
    pub fn subscribe_event(&self, event_name: &str) -> FilteredReceiver {
        FilteredReceiver {
            receiver: self.subscribe(),
            topic: topic_for(event_name),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that only yields notifications for one topic.
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<BridgeNotification>,
    topic: String,
}

impl FilteredReceiver {
    /// Receive the next matching notification
    pub async fn recv(&mut self) -> Result<BridgeNotification, broadcast::error::RecvError> {
        loop {
            let notification = self.receiver.recv().await?;
            if notification.topic == self.topic {
                return Ok(notification);
            }
        }
    }
}
