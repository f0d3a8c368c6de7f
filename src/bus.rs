use crate::message::{ConversationKey, Message};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Event {
    /// A new direct message was stored
    MessageSent(Message),

    /// A recipient read their side of a conversation
    #[serde(rename_all = "camelCase")]
    ConversationRead {
        viewer_id: String,
        key: ConversationKey,
        updated: u64,
    },
}

impl Event {
    /// Whether `user_id` takes part in the conversation this event is about.
    pub fn concerns(&self, user_id: &str) -> bool {
        match self {
            Event::MessageSent(msg) => msg.sender_id == user_id || msg.recipient_id == user_id,
            Event::ConversationRead { key, .. } => key.includes(user_id),
        }
    }
}

/// In-process fan-out of messaging events to external observers
/// (SSE subscribers, notifiers).
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
