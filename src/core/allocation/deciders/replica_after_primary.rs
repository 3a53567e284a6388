// src/core/allocation/deciders/replica_after_primary.rs

use crate::core::allocation::deciders::{AllocationDecider, Decision};
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::routing::{RoutingNode, ShardRouting};

/// A replica may only be allocated once its primary is active somewhere.
pub struct ReplicaAfterPrimaryDecider;

impl AllocationDecider for ReplicaAfterPrimaryDecider {
    fn name(&self) -> &'static str {
        "replica_after_primary"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        _node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        if shard.primary {
            return Decision::Yes;
        }
        if allocation.active_primary(&shard.shard_id).is_some() {
            Decision::Yes
        } else {
            Decision::No(format!(
                "primary of {} is not active yet",
                shard.shard_id
            ))
        }
    }
}
