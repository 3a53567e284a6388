// src/core/allocation/ordering.rs

//! Round-robin rotation of candidate nodes, seeded from a persistent
//! "last allocated to" record per index. Prevents hot-spotting on the first
//! desired node when many shards of one index are allocated in a burst.

use crate::core::metadata::NodeId;
use dashmap::DashMap;

/// Shared between the reconciler (master thread) and the desired-balance
/// computer (background worker), hence the concurrent map.
#[derive(Debug, Default)]
pub struct NodeAllocationOrdering {
    last_allocated: DashMap<String, NodeId>,
}

impl NodeAllocationOrdering {
    /// Rotates `candidates` so iteration starts just after the node this
    /// index last allocated to. Unknown index or departed node: no rotation.
    pub fn rotate(&self, index_name: &str, candidates: &[NodeId]) -> Vec<NodeId> {
        let last = self
            .last_allocated
            .get(index_name)
            .map(|entry| entry.value().clone());
        match last.and_then(|l| candidates.iter().position(|c| *c == l)) {
            Some(pos) => candidates[pos + 1..]
                .iter()
                .chain(candidates[..=pos].iter())
                .cloned()
                .collect(),
            None => candidates.to_vec(),
        }
    }

    pub fn record(&self, index_name: &str, node: &NodeId) {
        self.last_allocated
            .insert(index_name.to_string(), node.clone());
    }

    /// Drops records pointing at a node that left the cluster.
    pub fn on_node_removed(&self, node: &NodeId) {
        self.last_allocated.retain(|_, v| v != node);
    }
}
