//! # axoncast - Fault-Tolerant Gossip Broadcast Node
//!
//! axoncast is a single cluster node that spreads integer messages to every
//! other node over unreliable, partition-prone links. It speaks a
//! newline-delimited JSON protocol on stdin/stdout and guarantees eventual,
//! at-least-once delivery: messages may arrive out of order or more than
//! once, but every accepted message reaches every neighbor once the network
//! lets it through.
//!
//! ## Core Features
//!
//! - **Deduplication**: each value is accepted and fanned out exactly once
//! - **Neighbor topology**: the fan-out set is supplied by `topology` requests
//! - **Acknowledgment tracking**: every (message, neighbor) pair stays pending
//!   until that neighbor answers `broadcast_ok`
//! - **Unbounded retry**: a fixed-interval scheduler re-sends pending pairs
//!   until they are acknowledged, riding out dropped packets and partitions
//! - **Unique ids**: a snowflake-style generator serves the `generate` workload
//!
//! ## Protocol
//!
//! | Request     | Fields                      | Reply          |
//! |-------------|-----------------------------|----------------|
//! | `init`      | `node_id`, `node_ids`       | `init_ok`      |
//! | `echo`      | `echo`                      | `echo_ok`      |
//! | `generate`  |                             | `generate_ok`  |
//! | `broadcast` | `message`                   | `broadcast_ok` |
//! | `read`      |                             | `read_ok`      |
//! | `topology`  | `topology`                  | `topology_ok`  |
//!
//! ## Examples
//!
//! ### Running a node over stdio
//!
//! ```rust,no_run
//! use axoncast::{init_logging, AxonNodeBuilder, NodeConfig};
//! use std::sync::Arc;
//! use tokio::io::BufReader;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     init_logging(&config.log)?;
//!
//!     let node = Arc::new(AxonNodeBuilder::new().with_config(config).build());
//!     node.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Driving the engine directly
//!
//! ```rust
//! use axoncast::{BroadcastEngine, Outbox};
//! use std::collections::HashSet;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
//! let engine = BroadcastEngine::new(Arc::new(Outbox::with_node_id("n1", outbound_tx)));
//!
//! engine.topology().replace(HashSet::from(["n2".to_string()])).await;
//! assert!(engine.accept(42).await);
//! assert!(!engine.accept(42).await);
//!
//! let send = outbound_rx.recv().await.unwrap();
//! assert_eq!(send.dest, "n2");
//! assert_eq!(engine.read().await, vec![42]);
//! # }
//! ```

pub mod broadcast;
pub mod error;
pub mod idgen;
pub mod logging;
pub mod message;
pub mod node;
pub mod pending;
pub mod retry;
pub mod rpc;
pub mod store;
pub mod topology;

// Re-export main types for convenience
pub use broadcast::{BroadcastEngine, BroadcastStats};
pub use error::AxonError;
pub use idgen::IdGenerator;
pub use logging::{development_config, init_logging, production_config, CorrelationId, LogConfig};
pub use message::{Body, Envelope, ErrorCode, Message, NodeId, Payload, RawEnvelope};
pub use node::{AxonNode, AxonNodeBuilder, NodeConfig};
pub use pending::PendingDeliveryTracker;
pub use retry::{RetryConfig, RetryScheduler};
pub use rpc::{Delivery, Outbox, Resolution, RpcTable};
pub use store::MessageStore;
pub use topology::NeighborTopology;

/// Result type alias for axoncast operations
pub type Result<T> = std::result::Result<T, AxonError>;
