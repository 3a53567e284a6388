// src/core/allocation/deciders/filter.rs

use crate::core::allocation::deciders::{AllocationDecider, Decision};
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::metadata::NodeId;
use crate::core::routing::{RoutingNode, ShardRouting, UnassignedReason};
use std::collections::BTreeSet;

/// Enforces cluster-wide and per-index node exclusion lists, and the
/// per-index initial-recovery restriction (e.g. after a shrink).
pub struct FilterDecider;

impl FilterDecider {
    fn exclusion_reason(
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Option<String> {
        let node_name = allocation
            .nodes()
            .get(&node.node_id)
            .map(|n| n.name.as_str())
            .unwrap_or(node.node_id.as_str());
        if allocation
            .config()
            .excluded_node_names
            .contains(node_name)
        {
            return Some(format!(
                "node [{node_name}] matches the cluster-wide exclusion list"
            ));
        }
        if let Some(index) = allocation.metadata().index_for_shard(&shard.shard_id) {
            if index.settings.excluded_node_names.contains(node_name) {
                return Some(format!(
                    "node [{node_name}] is excluded by index {} settings",
                    index.id
                ));
            }
        }
        None
    }
}

impl AllocationDecider for FilterDecider {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        match Self::exclusion_reason(shard, node, allocation) {
            Some(reason) => Decision::No(reason),
            None => Decision::Yes,
        }
    }

    fn can_remain(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        match Self::exclusion_reason(shard, node, allocation) {
            Some(reason) => Decision::No(reason),
            None => Decision::Yes,
        }
    }

    fn forced_initial_allocation(
        &self,
        shard: &ShardRouting,
        allocation: &RoutingAllocation,
    ) -> Option<BTreeSet<NodeId>> {
        let is_initial = shard
            .unassigned_info
            .as_ref()
            .is_some_and(|i| i.reason == UnassignedReason::IndexCreated);
        if !is_initial {
            return None;
        }
        allocation
            .metadata()
            .index_for_shard(&shard.shard_id)
            .and_then(|m| m.settings.initial_recovery_node.clone())
            .map(|node| BTreeSet::from([node]))
    }
}
