//! Gossip broadcast engine
//!
//! Ties the message store, neighbor topology and pending-delivery tracker
//! together in response to `broadcast`, `read` and `topology` requests and
//! to the `broadcast_ok` acknowledgments coming back from neighbors.
//!
//! Delivery is at-least-once: every accepted message is sent to each
//! neighbor in the topology snapshot taken at acceptance, and re-sent by
//! [`RetryScheduler`](crate::retry::RetryScheduler) until that neighbor
//! acknowledges it.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AxonError;
use crate::message::{Envelope, Message, NodeId, Payload};
use crate::pending::PendingDeliveryTracker;
use crate::rpc::{Delivery, Outbox, Resolution};
use crate::store::MessageStore;
use crate::topology::{neighbors_of, NeighborTopology};

/// Broadcast engine statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_seen: usize,
    pub neighbors: usize,
    pub pending_messages: usize,
    pub pending_pairs: usize,
    pub rpcs_in_flight: usize,
}

/// Broadcast protocol handlers for one node
pub struct BroadcastEngine {
    store: MessageStore,
    topology: NeighborTopology,
    pending: PendingDeliveryTracker,
    outbox: Arc<Outbox>,
}

impl BroadcastEngine {
    /// Create an engine sending through `outbox`
    pub fn new(outbox: Arc<Outbox>) -> Self {
        Self {
            store: MessageStore::new(),
            topology: NeighborTopology::new(),
            pending: PendingDeliveryTracker::new(),
            outbox,
        }
    }

    /// Handle a `broadcast` request and acknowledge it
    ///
    /// Duplicates are acknowledged too, otherwise a peer that already
    /// delivered the message to us would keep retrying it forever.
    pub async fn on_broadcast(&self, request: &Envelope, message: Message) -> Result<(), AxonError> {
        if !self.accept(message).await {
            debug!(value = message, from = %request.src, "Duplicate broadcast");
        }
        self.outbox.reply(request, Payload::BroadcastOk)
    }

    /// Record `message` and fan it out if it is new; returns true if new
    pub async fn accept(&self, message: Message) -> bool {
        if !self.store.add_if_absent(message).await {
            return false;
        }

        let neighbors = self.topology.snapshot().await;
        debug!(value = message, fanout = neighbors.len(), "Accepted new message");

        self.pending.init(message, neighbors.clone()).await;
        for neighbor in &neighbors {
            self.send(message, neighbor).await;
        }
        true
    }

    /// Handle a `read` request
    pub async fn on_read(&self, request: &Envelope) -> Result<(), AxonError> {
        let messages = self.read().await;
        self.outbox.reply(request, Payload::ReadOk { messages })
    }

    /// Every accepted message, sorted
    pub async fn read(&self) -> Vec<Message> {
        let mut messages = self.store.snapshot().await;
        messages.sort_unstable();
        messages
    }

    /// Handle a `topology` request
    ///
    /// Pending entries created under the old topology are left alone; they
    /// keep retrying their original neighbors until acknowledged.
    pub async fn on_topology(
        &self,
        request: &Envelope,
        topology: &HashMap<NodeId, Vec<NodeId>>,
    ) -> Result<(), AxonError> {
        let node_id = self.outbox.node_id()?;
        self.topology.replace(neighbors_of(node_id, topology)).await;
        self.outbox.reply(request, Payload::TopologyOk)
    }

    /// Handle a response to one of our sends; returns true if it acked a pair
    ///
    /// A response from a node other than the one the send went to leaves
    /// the correlation entry in place, so the real neighbor's answer still
    /// counts.
    pub async fn on_response(&self, response: &Envelope) -> bool {
        let Some(in_reply_to) = response.body.in_reply_to else {
            return false;
        };

        let delivery = match self.outbox.rpcs().resolve_from(in_reply_to, &response.src).await {
            Resolution::Resolved(delivery) => delivery,
            Resolution::WrongSender { expected } => {
                warn!(
                    in_reply_to,
                    from = %response.src,
                    %expected,
                    "Response from unexpected node"
                );
                return false;
            }
            Resolution::Unknown => {
                debug!(in_reply_to, from = %response.src, "Response to unknown or expired send");
                return false;
            }
        };

        match &response.body.payload {
            Payload::BroadcastOk => self.pending.ack(delivery.message, &delivery.neighbor).await,
            Payload::Error { code, text } => {
                debug!(
                    value = delivery.message,
                    neighbor = %delivery.neighbor,
                    ?code,
                    text = text.as_deref().unwrap_or_default(),
                    "Neighbor rejected broadcast, will retry"
                );
                false
            }
            other => {
                warn!(in_reply_to, kind = ?other, "Unexpected response to broadcast");
                false
            }
        }
    }

    /// Re-send every pending pair; returns how many sends were issued
    pub async fn resend_pending(&self) -> usize {
        let snapshot = self.pending.snapshot().await;
        let mut sent = 0;
        for (message, neighbors) in snapshot {
            for neighbor in &neighbors {
                self.send(message, neighbor).await;
                sent += 1;
            }
        }
        sent
    }

    async fn send(&self, message: Message, neighbor: &str) {
        let result = self
            .outbox
            .rpc(
                neighbor,
                Payload::Broadcast { message },
                Delivery::new(message, neighbor),
            )
            .await;

        // The pair stays pending, so the next retry pass covers this
        if let Err(e) = result {
            warn!(value = message, neighbor, error = %e, "Failed to queue broadcast");
        }
    }

    /// Deduplicated set of accepted messages
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Current fan-out set
    pub fn topology(&self) -> &NeighborTopology {
        &self.topology
    }

    /// Undelivered (message, neighbor) pairs
    pub fn pending(&self) -> &PendingDeliveryTracker {
        &self.pending
    }

    /// Outbox used for replies and neighbor sends
    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Get engine statistics
    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_seen: self.store.len().await,
            neighbors: self.topology.len().await,
            pending_messages: self.pending.message_count().await,
            pending_pairs: self.pending.pair_count().await,
            rpcs_in_flight: self.outbox.rpcs().len().await,
        }
    }
}
