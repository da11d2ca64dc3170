//! Real-time fan-out of chat events and WebSocket presence.

use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};

use crate::models::HubEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcasts chat events to connected sockets and tracks who is online.
pub struct MessagingHub {
    sender: broadcast::Sender<HubEvent>,
    presence: Mutex<HashMap<i64, usize>>,
}

impl Default for MessagingHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagingHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            presence: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an event; returns the number of sockets that received it.
    pub fn publish(&self, event: HubEvent) -> usize {
        // No subscribers is not an error
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Record one more open socket for a user.
    pub async fn connect(&self, user_id: i64) {
        let mut presence = self.presence.lock().await;
        *presence.entry(user_id).or_insert(0) += 1;
        tracing::debug!(user_id, "WebSocket connected");
    }

    /// Record a closed socket; the user goes offline with the last one.
    pub async fn disconnect(&self, user_id: i64) {
        let mut presence = self.presence.lock().await;
        if let Some(count) = presence.get_mut(&user_id) {
            *count -= 1;
            if *count == 0 {
                presence.remove(&user_id);
            }
        }
        tracing::debug!(user_id, "WebSocket disconnected");
    }

    /// Users with at least one open socket, ascending.
    pub async fn online_ids(&self) -> Vec<i64> {
        let presence = self.presence.lock().await;
        let mut ids: Vec<i64> = presence.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
