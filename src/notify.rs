use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-person change notifications. Dashboards subscribe to
/// a person and receive every applied event touching them, so capacity views
/// can refresh without polling.
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

    /// Subscribe to notifications for a person. Creates the channel if needed.
    pub fn subscribe(&self, person_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(person_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, person_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&person_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a person's channel.
    pub fn remove(&self, person_id: &Ulid) {
        self.channels.remove(person_id);
    }
}
