//! Outbound messaging and request/response correlation
//!
//! [`Outbox`] is the node's only way to put envelopes on the wire. Replies
//! are addressed from an inbound request; peer sends go through
//! [`Outbox::rpc`], which records the `msg_id` in an [`RpcTable`] so the
//! matching `broadcast_ok` can be traced back to one (message, neighbor)
//! pair without any state captured in closures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::debug;

use crate::error::AxonError;
use crate::message::{Body, Envelope, Message, NodeId, Payload};

/// The (message, neighbor) pair an outstanding send is delivering
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Delivery {
    pub message: Message,
    pub neighbor: NodeId,
}

impl Delivery {
    /// Pair `message` with the neighbor it is being delivered to
    pub fn new(message: Message, neighbor: impl Into<NodeId>) -> Self {
        Self {
            message,
            neighbor: neighbor.into(),
        }
    }
}

/// Outcome of matching a response against the [`RpcTable`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The responder was the node the send went to; the entry is consumed
    Resolved(Delivery),
    /// The entry exists but was sent to `expected`; it is left in place
    WrongSender { expected: NodeId },
    /// No entry, either never sent or already resolved or expired
    Unknown,
}

#[derive(Debug)]
struct InFlight {
    delivery: Delivery,
    sent_at: Instant,
}

/// Outstanding sends keyed by their `msg_id`
#[derive(Debug, Default)]
pub struct RpcTable {
    in_flight: Mutex<HashMap<u64, InFlight>>,
}

impl RpcTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember what the send with `msg_id` is delivering
    pub async fn register(&self, msg_id: u64, delivery: Delivery) {
        self.in_flight.lock().await.insert(
            msg_id,
            InFlight {
                delivery,
                sent_at: Instant::now(),
            },
        );
    }

    /// Take the entry answered by `in_reply_to`; resolves at most once
    pub async fn resolve(&self, in_reply_to: u64) -> Option<Delivery> {
        self.in_flight
            .lock()
            .await
            .remove(&in_reply_to)
            .map(|entry| entry.delivery)
    }

    /// Take the entry answered by `in_reply_to` only if `responder` is the
    /// node it was sent to
    pub async fn resolve_from(&self, in_reply_to: u64, responder: &str) -> Resolution {
        let mut in_flight = self.in_flight.lock().await;
        match in_flight.get(&in_reply_to) {
            None => Resolution::Unknown,
            Some(entry) if entry.delivery.neighbor != responder => Resolution::WrongSender {
                expected: entry.delivery.neighbor.clone(),
            },
            Some(_) => in_flight
                .remove(&in_reply_to)
                .map(|entry| Resolution::Resolved(entry.delivery))
                .unwrap_or(Resolution::Unknown),
        }
    }

    /// Forget sends older than `timeout`, returning how many were dropped
    ///
    /// An expired send needs no follow-up: its pair is still pending and the
    /// next retry pass registers a fresh send for it.
    pub async fn expire(&self, timeout: Duration) -> usize {
        let mut in_flight = self.in_flight.lock().await;
        let before = in_flight.len();
        in_flight.retain(|_, entry| entry.sent_at.elapsed() < timeout);
        before - in_flight.len()
    }

    /// Number of sends still awaiting a response
    pub async fn len(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// True when no send is awaiting a response
    pub async fn is_empty(&self) -> bool {
        self.in_flight.lock().await.is_empty()
    }
}

/// Addressed send, reply and node identity for the handlers
#[derive(Debug)]
pub struct Outbox {
    node_id: OnceLock<NodeId>,
    next_msg_id: AtomicU64,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    rpcs: RpcTable,
}

impl Outbox {
    /// Create an outbox feeding the given writer channel
    pub fn new(outbound_tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            node_id: OnceLock::new(),
            next_msg_id: AtomicU64::new(1),
            outbound_tx,
            rpcs: RpcTable::new(),
        }
    }

    /// Create an outbox that already knows its node id
    pub fn with_node_id(
        node_id: impl Into<NodeId>,
        outbound_tx: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        let outbox = Self::new(outbound_tx);
        outbox.initialize(node_id);
        outbox
    }

    /// Set the node id; returns false if it was already set
    pub fn initialize(&self, node_id: impl Into<NodeId>) -> bool {
        self.node_id.set(node_id.into()).is_ok()
    }

    /// This node's identifier
    pub fn node_id(&self) -> Result<&str, AxonError> {
        self.node_id
            .get()
            .map(String::as_str)
            .ok_or(AxonError::NotInitialized)
    }

    /// True once `init` has assigned this node an id
    pub fn is_initialized(&self) -> bool {
        self.node_id.get().is_some()
    }

    fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, envelope: Envelope) -> Result<(), AxonError> {
        self.outbound_tx
            .send(envelope)
            .map_err(|_| AxonError::ChannelClosed)
    }

    /// Answer `request` with `payload`
    ///
    /// The reply is sent from the request's `dest`, so error replies work
    /// even before `init` has assigned an id.
    pub fn reply(&self, request: &Envelope, payload: Payload) -> Result<(), AxonError> {
        self.reply_to(&request.dest, &request.src, request.body.msg_id, payload)
    }

    /// Answer a request identified only by its addressing and `msg_id`
    pub fn reply_to(
        &self,
        from: &str,
        to: &str,
        in_reply_to: Option<u64>,
        payload: Payload,
    ) -> Result<(), AxonError> {
        self.send(Envelope {
            src: from.to_owned(),
            dest: to.to_owned(),
            body: Body {
                msg_id: Some(self.next_msg_id()),
                in_reply_to,
                payload,
            },
        })
    }

    /// Send `payload` to `dest` and track the response against `delivery`
    pub async fn rpc(
        &self,
        dest: &str,
        payload: Payload,
        delivery: Delivery,
    ) -> Result<u64, AxonError> {
        let src = self.node_id()?.to_owned();
        let msg_id = self.next_msg_id();

        // Registered first so a fast response always finds its entry
        self.rpcs.register(msg_id, delivery).await;

        debug!(msg_id, dest, "Sending rpc");
        let sent = self.send(Envelope {
            src,
            dest: dest.to_owned(),
            body: Body {
                msg_id: Some(msg_id),
                in_reply_to: None,
                payload,
            },
        });

        if let Err(e) = sent {
            self.rpcs.resolve(msg_id).await;
            return Err(e);
        }
        Ok(msg_id)
    }

    /// Correlation table of outstanding sends
    pub fn rpcs(&self) -> &RpcTable {
        &self.rpcs
    }
}
