// src/core/allocation/deciders/mod.rs

//! The allocation-decider chain. Decisions are data, never errors: each
//! decider answers `Yes`, `No(reason)`, or `Throttle(reason)`, and the chain
//! combines them with first-`No`-wins, any-`Throttle`-downgrades semantics.

pub mod disk_threshold;
pub mod enable;
pub mod filter;
pub mod node_shutdown;
pub mod replica_after_primary;
pub mod same_shard;
pub mod throttling;

use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::metadata::NodeId;
use crate::core::routing::{RoutingNode, ShardRouting};
use std::collections::BTreeSet;
use tracing::trace;

pub use disk_threshold::DiskThresholdDecider;
pub use enable::EnableDecider;
pub use filter::FilterDecider;
pub use node_shutdown::NodeShutdownDecider;
pub use replica_after_primary::ReplicaAfterPrimaryDecider;
pub use same_shard::SameShardDecider;
pub use throttling::ThrottlingDecider;

/// One decider's answer for a proposed placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Yes,
    Throttle(String),
    No(String),
}

impl Decision {
    pub fn is_yes(&self) -> bool {
        matches!(self, Decision::Yes)
    }

    pub fn is_no(&self) -> bool {
        matches!(self, Decision::No(_))
    }

    pub fn is_throttle(&self) -> bool {
        matches!(self, Decision::Throttle(_))
    }
}

/// A single decision function in the chain. Every method defaults to `Yes`;
/// deciders override only the questions they care about. All methods must be
/// pure with respect to the `allocation` input.
pub trait AllocationDecider: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_allocate(
        &self,
        _shard: &ShardRouting,
        _node: &RoutingNode,
        _allocation: &RoutingAllocation,
    ) -> Decision {
        Decision::Yes
    }

    fn can_remain(
        &self,
        _shard: &ShardRouting,
        _node: &RoutingNode,
        _allocation: &RoutingAllocation,
    ) -> Decision {
        Decision::Yes
    }

    /// "Can this shard go anywhere at all?" `No` means there is no point
    /// searching for a node.
    fn can_allocate_anywhere(
        &self,
        _shard: &ShardRouting,
        _allocation: &RoutingAllocation,
    ) -> Decision {
        Decision::Yes
    }

    fn can_rebalance_cluster(&self, _allocation: &RoutingAllocation) -> Decision {
        Decision::Yes
    }

    fn can_rebalance_shard(
        &self,
        _shard: &ShardRouting,
        _allocation: &RoutingAllocation,
    ) -> Decision {
        Decision::Yes
    }

    /// Narrower predicate used when a primary must be brought up even though
    /// regular allocation refused. Defaults to the regular answer.
    fn can_force_allocate_primary(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        self.can_allocate(shard, node, allocation)
    }

    /// Used only when the shard's current node is being replaced.
    fn can_force_allocate_during_replace(
        &self,
        _shard: &ShardRouting,
        _node: &RoutingNode,
        _allocation: &RoutingAllocation,
    ) -> Decision {
        Decision::Yes
    }

    /// Optional fixed candidate set for the *initial* allocation of a shard.
    fn forced_initial_allocation(
        &self,
        _shard: &ShardRouting,
        _allocation: &RoutingAllocation,
    ) -> Option<BTreeSet<NodeId>> {
        None
    }
}

/// The ordered chain consulted by both the desired-balance computer and the
/// reconciler.
pub struct AllocationDeciders {
    deciders: Vec<Box<dyn AllocationDecider>>,
}

impl AllocationDeciders {
    pub fn new(deciders: Vec<Box<dyn AllocationDecider>>) -> Self {
        Self { deciders }
    }

    /// The default production chain, in consultation order.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(SameShardDecider),
            Box::new(ReplicaAfterPrimaryDecider),
            Box::new(EnableDecider),
            Box::new(NodeShutdownDecider),
            Box::new(FilterDecider),
            Box::new(DiskThresholdDecider),
            Box::new(ThrottlingDecider),
        ])
    }

    fn combine<F>(&self, what: &str, mut ask: F) -> Decision
    where
        F: FnMut(&dyn AllocationDecider) -> Decision,
    {
        let mut throttled: Option<Decision> = None;
        for decider in &self.deciders {
            match ask(decider.as_ref()) {
                Decision::Yes => {}
                d @ Decision::Throttle(_) => {
                    if throttled.is_none() {
                        throttled = Some(d);
                    }
                }
                Decision::No(reason) => {
                    trace!("{what}: [{}] says NO: {reason}", decider.name());
                    return Decision::No(reason);
                }
            }
        }
        throttled.unwrap_or(Decision::Yes)
    }

    pub fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        self.combine("can_allocate", |d| d.can_allocate(shard, node, allocation))
    }

    pub fn can_remain(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        self.combine("can_remain", |d| d.can_remain(shard, node, allocation))
    }

    pub fn can_allocate_anywhere(
        &self,
        shard: &ShardRouting,
        allocation: &RoutingAllocation,
    ) -> Decision {
        self.combine("can_allocate_anywhere", |d| {
            d.can_allocate_anywhere(shard, allocation)
        })
    }

    pub fn can_rebalance_cluster(&self, allocation: &RoutingAllocation) -> Decision {
        self.combine("can_rebalance_cluster", |d| d.can_rebalance_cluster(allocation))
    }

    pub fn can_rebalance_shard(
        &self,
        shard: &ShardRouting,
        allocation: &RoutingAllocation,
    ) -> Decision {
        self.combine("can_rebalance_shard", |d| {
            d.can_rebalance_shard(shard, allocation)
        })
    }

    pub fn can_force_allocate_primary(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        self.combine("can_force_allocate_primary", |d| {
            d.can_force_allocate_primary(shard, node, allocation)
        })
    }

    pub fn can_force_allocate_during_replace(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        self.combine("can_force_allocate_during_replace", |d| {
            d.can_force_allocate_during_replace(shard, node, allocation)
        })
    }

    /// Intersection of all fixed candidate sets, or `None` when no decider
    /// restricts the initial allocation.
    pub fn forced_initial_allocation(
        &self,
        shard: &ShardRouting,
        allocation: &RoutingAllocation,
    ) -> Option<BTreeSet<NodeId>> {
        let mut result: Option<BTreeSet<NodeId>> = None;
        for decider in &self.deciders {
            if let Some(set) = decider.forced_initial_allocation(shard, allocation) {
                result = Some(match result {
                    Some(acc) => acc.intersection(&set).cloned().collect(),
                    None => set,
                });
            }
        }
        result
    }
}
