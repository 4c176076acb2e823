//! Neighbor set used for fan-out
//!
//! The set is replaced wholesale by every `topology` request. Readers always
//! work from a copy, so a replacement never shows up halfway through a
//! fan-out or retry pass.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::info;

use crate::message::NodeId;

/// Outbound fan-out set for this node
#[derive(Debug, Default)]
pub struct NeighborTopology {
    neighbors: RwLock<HashSet<NodeId>>,
}

impl NeighborTopology {
    /// Create a topology with no neighbors
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new neighbor set, dropping every previous neighbor
    pub async fn replace(&self, neighbors: HashSet<NodeId>) {
        let mut guard = self.neighbors.write().await;
        info!(
            previous = guard.len(),
            current = neighbors.len(),
            "Replacing neighbor topology"
        );
        *guard = neighbors;
    }

    /// Point-in-time copy of the neighbor set
    pub async fn snapshot(&self) -> HashSet<NodeId> {
        self.neighbors.read().await.clone()
    }

    /// Number of neighbors
    pub async fn len(&self) -> usize {
        self.neighbors.read().await.len()
    }
}

/// Pick this node's neighbors out of a cluster-wide topology map
///
/// A node missing from the map has no neighbors. Self-loops are dropped.
pub fn neighbors_of(node_id: &str, topology: &HashMap<NodeId, Vec<NodeId>>) -> HashSet<NodeId> {
    topology
        .get(node_id)
        .map(|neighbors| {
            neighbors
                .iter()
                .filter(|n| n.as_str() != node_id)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}
