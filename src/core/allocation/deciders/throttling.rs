// src/core/allocation/deciders/throttling.rs

use crate::core::allocation::deciders::{AllocationDecider, Decision};
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::routing::{RoutingNode, ShardRouting};

/// Throttles recoveries so a node never performs more than the configured
/// number of concurrent incoming or outgoing recoveries.
pub struct ThrottlingDecider;

impl AllocationDecider for ThrottlingDecider {
    fn name(&self) -> &'static str {
        "throttling"
    }

    fn can_allocate(
        &self,
        _shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let limit = allocation.config().node_concurrent_incoming_recoveries;
        let incoming = node.num_incoming_recoveries();
        if incoming >= limit {
            Decision::Throttle(format!(
                "node [{}] already has [{incoming}] incoming recoveries (limit [{limit}])",
                node.node_id
            ))
        } else {
            Decision::Yes
        }
    }

    fn can_rebalance_shard(
        &self,
        shard: &ShardRouting,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let limit = allocation.config().node_concurrent_outgoing_recoveries;
        let outgoing = shard
            .assigned_node_id()
            .and_then(|id| allocation.routing_nodes().node(id))
            .map(|n| n.num_outgoing_recoveries())
            .unwrap_or(0);
        if outgoing >= limit {
            Decision::Throttle(format!(
                "source node already has [{outgoing}] outgoing recoveries (limit [{limit}])"
            ))
        } else {
            Decision::Yes
        }
    }
}
