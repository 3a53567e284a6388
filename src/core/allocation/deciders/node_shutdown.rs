// src/core/allocation/deciders/node_shutdown.rs

use crate::core::allocation::deciders::{AllocationDecider, Decision};
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::metadata::NodeShutdownKind;
use crate::core::routing::{RoutingNode, ShardRouting};

/// Keeps shards away from nodes that are shutting down. A restarting node
/// keeps its shards but takes no new ones; removing and replacing nodes must
/// be drained.
pub struct NodeShutdownDecider;

impl AllocationDecider for NodeShutdownDecider {
    fn name(&self) -> &'static str {
        "node_shutdown"
    }

    fn can_allocate(
        &self,
        _shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        match allocation.metadata().shutdown_for(&node.node_id) {
            None => Decision::Yes,
            Some(NodeShutdownKind::Restart) => Decision::No(format!(
                "node [{}] is preparing to restart",
                node.node_id
            )),
            Some(NodeShutdownKind::Remove) => Decision::No(format!(
                "node [{}] is being removed from the cluster",
                node.node_id
            )),
            Some(NodeShutdownKind::Replace { target_node_name }) => Decision::No(format!(
                "node [{}] is being replaced by [{target_node_name}]",
                node.node_id
            )),
        }
    }

    fn can_remain(
        &self,
        _shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        match allocation.metadata().shutdown_for(&node.node_id) {
            None | Some(NodeShutdownKind::Restart) => Decision::Yes,
            Some(NodeShutdownKind::Remove) => Decision::No(format!(
                "node [{}] is being removed from the cluster",
                node.node_id
            )),
            Some(NodeShutdownKind::Replace { target_node_name }) => Decision::No(format!(
                "node [{}] is being replaced by [{target_node_name}]",
                node.node_id
            )),
        }
    }

    /// During a replace shutdown the only legal forced destination is the
    /// named replacement node.
    fn can_force_allocate_during_replace(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let source_shutdown = shard
            .assigned_node_id()
            .and_then(|id| allocation.metadata().shutdown_for(id));
        let Some(NodeShutdownKind::Replace { target_node_name }) = source_shutdown else {
            return Decision::No(
                "shard's current node is not part of a replace shutdown".to_string(),
            );
        };
        let candidate_name = allocation
            .nodes()
            .get(&node.node_id)
            .map(|n| n.name.as_str())
            .unwrap_or(node.node_id.as_str());
        if candidate_name == target_node_name.as_str() {
            Decision::Yes
        } else {
            Decision::No(format!(
                "node [{candidate_name}] is not the replacement target [{target_node_name}]"
            ))
        }
    }
}
