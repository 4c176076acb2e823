//! Deduplicated record of every broadcast value this node has accepted

use std::collections::HashSet;
use tokio::sync::RwLock;

use crate::message::Message;

/// Grow-only set of accepted messages
///
/// The only writer is [`MessageStore::add_if_absent`]; its `true` result
/// is the single signal allowed to trigger a fan-out.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: RwLock<HashSet<Message>>,
}

impl MessageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if we've accepted this message before
    pub async fn contains(&self, message: Message) -> bool {
        self.messages.read().await.contains(&message)
    }

    /// Insert `message`, returning true iff this call added it
    pub async fn add_if_absent(&self, message: Message) -> bool {
        self.messages.write().await.insert(message)
    }

    /// Copy of every accepted message, in no particular order
    pub async fn snapshot(&self) -> Vec<Message> {
        self.messages.read().await.iter().copied().collect()
    }

    /// Number of accepted messages
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    /// True when nothing has been accepted yet
    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}
