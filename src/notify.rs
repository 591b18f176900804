use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// A message for one user about one entity. Delivery is not our concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub user_id: Ulid,
    pub title: String,
    pub body: String,
    pub related_entity_type: String,
    pub related_entity_id: Ulid,
}

impl Notification {
    pub fn reservation(user_id: Ulid, reservation_id: Ulid, title: &str, body: String) -> Self {
        Self {
            user_id,
            title: title.to_string(),
            body,
            related_entity_type: "reservation".to_string(),
            related_entity_id: reservation_id,
        }
    }
}

/// Per-user broadcast hub. Emission is fire-and-forget.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
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

    /// Subscribe to notifications for a user. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Emit a notification. No-op if nobody is listening.
    pub fn send(&self, notification: Notification) {
        tracing::debug!(
            user = %notification.user_id,
            entity = %notification.related_entity_id,
            "notify: {}",
            notification.title
        );
        if let Some(sender) = self.channels.get(&notification.user_id) {
            let _ = sender.send(notification);
        }
    }

    /// Drop a user's channel once its last subscriber is gone.
    pub fn prune(&self, user_id: &Ulid) {
        self.channels
            .remove_if(user_id, |_, sender| sender.receiver_count() == 0);
    }
}
