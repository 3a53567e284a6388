// src/core/allocation/deciders/same_shard.rs

use crate::core::allocation::deciders::{AllocationDecider, Decision};
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::routing::{RoutingNode, ShardRouting};

/// Forbids placing two copies of the same shard on one node.
pub struct SameShardDecider;

impl AllocationDecider for SameShardDecider {
    fn name(&self) -> &'static str {
        "same_shard"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        _allocation: &RoutingAllocation,
    ) -> Decision {
        if node.shard(&shard.shard_id).is_some() {
            Decision::No(format!(
                "a copy of {} is already allocated to node [{}]",
                shard.shard_id, node.node_id
            ))
        } else {
            Decision::Yes
        }
    }
}
