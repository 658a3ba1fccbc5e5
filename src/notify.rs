use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for change notifications, one channel per scope id
/// (owner user or organization). Subscribers use it to drop cached listings.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a scope. Creates the channel if needed.
    pub fn subscribe(&self, scope_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(scope_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, scope_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&scope_id) {
            let _ = sender.send(event.clone());
        }
    }
}
