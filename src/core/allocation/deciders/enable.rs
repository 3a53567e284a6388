// src/core/allocation/deciders/enable.rs

use crate::core::allocation::deciders::{AllocationDecider, Decision};
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::metadata::{EnableAllocation, EnableRebalance};
use crate::core::routing::{RoutingNode, ShardRouting, UnassignedReason};

/// Honors the cluster-wide allocation/rebalance enable toggles, with a
/// per-index override for allocation.
pub struct EnableDecider;

impl EnableDecider {
    fn effective_allocation_enable(
        shard: &ShardRouting,
        allocation: &RoutingAllocation,
    ) -> EnableAllocation {
        allocation
            .metadata()
            .index_for_shard(&shard.shard_id)
            .and_then(|m| m.settings.allocation_enable)
            .unwrap_or(allocation.config().allocation_enable)
    }

    fn is_new_primary(shard: &ShardRouting) -> bool {
        shard.primary
            && shard
                .unassigned_info
                .as_ref()
                .is_some_and(|i| i.reason == UnassignedReason::IndexCreated)
    }
}

impl AllocationDecider for EnableDecider {
    fn name(&self) -> &'static str {
        "enable"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        _node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        match Self::effective_allocation_enable(shard, allocation) {
            EnableAllocation::All => Decision::Yes,
            EnableAllocation::None => {
                Decision::No("allocation is disabled".to_string())
            }
            EnableAllocation::Primaries if shard.primary => Decision::Yes,
            EnableAllocation::Primaries => {
                Decision::No("allocation is enabled for primaries only".to_string())
            }
            EnableAllocation::NewPrimaries if Self::is_new_primary(shard) => Decision::Yes,
            EnableAllocation::NewPrimaries => {
                Decision::No("allocation is enabled for new primaries only".to_string())
            }
        }
    }

    fn can_rebalance_cluster(&self, allocation: &RoutingAllocation) -> Decision {
        match allocation.config().rebalance_enable {
            EnableRebalance::None => Decision::No("rebalancing is disabled".to_string()),
            _ => Decision::Yes,
        }
    }

    fn can_rebalance_shard(
        &self,
        shard: &ShardRouting,
        allocation: &RoutingAllocation,
    ) -> Decision {
        match allocation.config().rebalance_enable {
            EnableRebalance::All => Decision::Yes,
            EnableRebalance::None => Decision::No("rebalancing is disabled".to_string()),
            EnableRebalance::Primaries if shard.primary => Decision::Yes,
            EnableRebalance::Primaries => {
                Decision::No("rebalancing is enabled for primaries only".to_string())
            }
            EnableRebalance::Replicas if !shard.primary => Decision::Yes,
            EnableRebalance::Replicas => {
                Decision::No("rebalancing is enabled for replicas only".to_string())
            }
        }
    }
}
