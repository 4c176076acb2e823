//! Per-message record of neighbors that still owe an acknowledgment
//!
//! An entry is created once, when a message is first accepted, holding the
//! neighbor snapshot taken at that moment. Acknowledgments shrink it; the
//! entry is dropped as soon as it is empty so memory stays bounded by the
//! number of undelivered pairs rather than by the number of messages seen.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::message::{Message, NodeId};

/// Undelivered (message, neighbor) pairs
#[derive(Debug, Default)]
pub struct PendingDeliveryTracker {
    pending: RwLock<HashMap<Message, HashSet<NodeId>>>,
}

impl PendingDeliveryTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `message` against the given neighbor snapshot
    ///
    /// Callers gate this on [`MessageStore::add_if_absent`](crate::store::MessageStore::add_if_absent),
    /// so an existing entry is never overwritten. An empty neighbor set
    /// creates no entry: there is nothing to deliver.
    pub async fn init(&self, message: Message, neighbors: HashSet<NodeId>) {
        if neighbors.is_empty() {
            return;
        }

        let mut pending = self.pending.write().await;
        if pending.contains_key(&message) {
            warn!(value = message, "Pending entry already exists, keeping the original");
            return;
        }
        pending.insert(message, neighbors);
    }

    /// Record that `neighbor` acknowledged `message`
    ///
    /// Returns true if a pending pair was removed. Unknown messages and
    /// repeated acknowledgments are no-ops.
    pub async fn ack(&self, message: Message, neighbor: &str) -> bool {
        let mut pending = self.pending.write().await;
        let Some(neighbors) = pending.get_mut(&message) else {
            return false;
        };

        let removed = neighbors.remove(neighbor);
        if neighbors.is_empty() {
            pending.remove(&message);
            debug!(value = message, "Message fully acknowledged");
        }
        removed
    }

    /// Neighbors still owing an ack for `message`, if any
    pub async fn pending(&self, message: Message) -> Option<HashSet<NodeId>> {
        self.pending.read().await.get(&message).cloned()
    }

    /// Consistent copy of every pending pair, taken under one lock
    pub async fn snapshot(&self) -> HashMap<Message, HashSet<NodeId>> {
        self.pending.read().await.clone()
    }

    /// Number of messages with at least one pending neighbor
    pub async fn message_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Total number of pending (message, neighbor) pairs
    pub async fn pair_count(&self) -> usize {
        self.pending.read().await.values().map(HashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<NodeId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_ack_convergence() {
        let tracker = PendingDeliveryTracker::new();
        tracker.init(10, set(&["n2", "n3"])).await;
        assert_eq!(tracker.pending(10).await, Some(set(&["n2", "n3"])));

        assert!(tracker.ack(10, "n2").await);
        assert_eq!(tracker.pending(10).await, Some(set(&["n3"])));

        assert!(tracker.ack(10, "n3").await);
        assert_eq!(tracker.pending(10).await, None);
        assert_eq!(tracker.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_acks_are_noops() {
        let tracker = PendingDeliveryTracker::new();
        tracker.init(1, set(&["n2", "n3"])).await;

        assert!(tracker.ack(1, "n2").await);
        assert!(!tracker.ack(1, "n2").await);
        assert!(!tracker.ack(1, "n9").await);
        assert!(!tracker.ack(404, "n2").await);

        assert_eq!(tracker.pair_count().await, 1);
    }

    #[tokio::test]
    async fn test_init_does_not_overwrite() {
        let tracker = PendingDeliveryTracker::new();
        tracker.init(5, set(&["a"])).await;
        tracker.init(5, set(&["b", "c"])).await;

        assert_eq!(tracker.pending(5).await, Some(set(&["a"])));
    }

    #[tokio::test]
    async fn test_init_with_no_neighbors() {
        let tracker = PendingDeliveryTracker::new();
        tracker.init(5, HashSet::new()).await;

        assert!(tracker.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_independent() {
        let tracker = PendingDeliveryTracker::new();
        tracker.init(1, set(&["a", "b"])).await;
        tracker.init(2, set(&["a"])).await;

        let snapshot = tracker.snapshot().await;
        tracker.ack(1, "a").await;
        tracker.ack(2, "a").await;

        assert_eq!(snapshot[&1], set(&["a", "b"]));
        assert_eq!(snapshot[&2], set(&["a"]));
        assert_eq!(tracker.pair_count().await, 1);
    }
}
