// src/core/allocation/balancer/mod.rs

//! The weight-based balancer the desired-balance computer delegates to. One
//! pass assigns unassigned shards to their minimum-weight acceptable node,
//! moves shards that may not remain, and relocates shards whose move strictly
//! improves the weight spread.

use crate::config::BalancerConfig;
use crate::core::allocation::commands::AllocationCommand;
use crate::core::allocation::deciders::Decision;
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::cluster::info::ClusterInfo;
use crate::core::metadata::{Metadata, NodeId, NodeShutdownKind, ShardId};
use crate::core::routing::shard_routing::AllocationStatus;
use crate::core::routing::{RoutingNode, ShardRouting};
use tracing::debug;

/// Guards against oscillating relocations between equally weighted nodes.
const REBALANCE_EPSILON: f64 = 1e-9;

/// `weight(node) = α·shard_count + β·index_shard_count + γ·disk_used_ratio`.
#[derive(Debug, Clone, Copy)]
pub struct WeightFunction {
    shard_balance: f64,
    index_balance: f64,
    disk_usage_balance: f64,
}

impl WeightFunction {
    pub fn new(config: &BalancerConfig) -> Self {
        Self {
            shard_balance: config.shard_balance_factor,
            index_balance: config.index_balance_factor,
            disk_usage_balance: config.disk_usage_balance_factor,
        }
    }

    pub fn weight(&self, node: &RoutingNode, shard_id: &ShardId, info: &ClusterInfo) -> f64 {
        let disk = info
            .least_available(&node.node_id)
            .map(|u| u.used_ratio())
            .unwrap_or(0.0);
        self.shard_balance * node.num_shards() as f64
            + self.index_balance * node.num_shards_of_index(shard_id) as f64
            + self.disk_usage_balance * disk
    }

    /// The weight a shard contributes to whichever node hosts it.
    fn shard_weight(&self) -> f64 {
        self.shard_balance + self.index_balance
    }
}

/// Sorts unassigned shards into allocation order: primaries first, then
/// (index name, shard id), then index priority (highest first).
pub fn sort_unassigned(shards: &mut [ShardRouting], metadata: &Metadata) {
    shards.sort_by(|a, b| {
        b.primary
            .cmp(&a.primary)
            .then_with(|| a.shard_id.cmp(&b.shard_id))
            .then_with(|| {
                let pa = metadata
                    .index_for_shard(&a.shard_id)
                    .map(|m| m.priority)
                    .unwrap_or(0);
                let pb = metadata
                    .index_for_shard(&b.shard_id)
                    .map(|m| m.priority)
                    .unwrap_or(0);
                pb.cmp(&pa)
            })
    });
}

/// Round-robin interleaving of each node's started shards, so no single node
/// dominates the front of a move/rebalance pass.
pub fn interleaved_started_shards(allocation: &RoutingAllocation) -> Vec<ShardRouting> {
    let per_node: Vec<Vec<ShardRouting>> = allocation
        .routing_nodes()
        .nodes()
        .map(|n| n.started_shards().cloned().collect())
        .collect();
    let longest = per_node.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::new();
    for i in 0..longest {
        for shards in &per_node {
            if let Some(shard) = shards.get(i) {
                out.push(shard.clone());
            }
        }
    }
    out
}

pub struct Balancer {
    weight: WeightFunction,
}

impl Balancer {
    pub fn new(weight: WeightFunction) -> Self {
        Self { weight }
    }

    /// Minimum-weight node among `candidates` that the decider chain accepts.
    /// Returns the chosen node plus whether any candidate throttled.
    fn min_weight_node(
        &self,
        allocation: &RoutingAllocation,
        shard: &ShardRouting,
        candidates: &[NodeId],
    ) -> (Option<NodeId>, bool) {
        let deciders = allocation.deciders();
        let mut best: Option<(f64, NodeId)> = None;
        let mut throttled = false;
        for node_id in candidates {
            let Some(node) = allocation.routing_nodes().node(node_id) else {
                continue;
            };
            match deciders.can_allocate(shard, node, allocation) {
                Decision::Yes => {
                    let w = self
                        .weight
                        .weight(node, &shard.shard_id, allocation.cluster_info());
                    if best.as_ref().is_none_or(|(bw, _)| w < *bw) {
                        best = Some((w, node_id.clone()));
                    }
                }
                Decision::Throttle(_) => throttled = true,
                Decision::No(_) => {}
            }
        }
        (best.map(|(_, id)| id), throttled)
    }

    /// Applies admin command hints before the regular passes.
    pub fn apply_command_hints(
        &self,
        allocation: &mut RoutingAllocation,
        hints: &[AllocationCommand],
    ) {
        for hint in hints {
            match hint {
                AllocationCommand::Move { shard, from, to } => {
                    let Some(copy) = allocation
                        .routing_nodes()
                        .node(from)
                        .and_then(|n| n.shard(shard))
                        .filter(|c| c.is_started())
                        .cloned()
                    else {
                        continue;
                    };
                    let allowed = {
                        let deciders = allocation.deciders();
                        allocation
                            .routing_nodes()
                            .node(to)
                            .map(|node| deciders.can_allocate(&copy, node, allocation))
                    };
                    if allowed.is_some_and(|d| d.is_yes()) {
                        allocation.relocate_shard(&copy, to);
                    } else {
                        debug!("move command for {shard} to [{to}] refused by deciders");
                    }
                }
                AllocationCommand::Allocate { shard, node } => {
                    let Some(pos) = allocation
                        .routing_nodes()
                        .unassigned()
                        .iter()
                        .position(|c| &c.shard_id == shard)
                    else {
                        continue;
                    };
                    let mut unassigned = allocation.drain_unassigned();
                    let copy = unassigned.remove(pos);
                    for rest in unassigned {
                        allocation.push_unassigned(rest);
                    }
                    let allowed = {
                        let deciders = allocation.deciders();
                        allocation
                            .routing_nodes()
                            .node(node)
                            .map(|n| deciders.can_allocate(&copy, n, allocation))
                    };
                    if allowed.is_some_and(|d| d.is_yes()) {
                        allocation.assign_shard(&copy, node);
                    } else {
                        debug!("allocate command for {shard} on [{node}] refused by deciders");
                        allocation.push_unassigned(copy);
                    }
                }
                AllocationCommand::Cancel { shard, node } => {
                    allocation.cancel_recovery(shard, node);
                }
            }
        }
    }

    /// Assigns every unassigned shard to its minimum-weight acceptable node.
    /// Throttled shards stay unassigned for the next pass; refused shards are
    /// parked in the ignored list.
    pub fn allocate_unassigned(&self, allocation: &mut RoutingAllocation) -> bool {
        let mut unassigned = allocation.drain_unassigned();
        let metadata = allocation.metadata().clone();
        sort_unassigned(&mut unassigned, &metadata);
        let mut changed = false;
        let mut retry = Vec::new();
        for shard in unassigned {
            // A replica only becomes placeable once its primary is active;
            // retry after the simulated starts of this pass.
            if !shard.primary && allocation.active_primary(&shard.shard_id).is_none() {
                retry.push(shard);
                continue;
            }
            let candidates: Vec<NodeId> = match allocation
                .deciders()
                .forced_initial_allocation(&shard, allocation)
            {
                Some(set) => set.into_iter().collect(),
                None => allocation.routing_nodes().node_ids().cloned().collect(),
            };
            let (best, throttled) = self.min_weight_node(allocation, &shard, &candidates);
            match best {
                Some(node_id) => {
                    allocation.assign_shard(&shard, &node_id);
                    changed = true;
                }
                None if throttled => retry.push(shard),
                None => allocation.ignore_shard(shard, AllocationStatus::DecidersNo),
            }
        }
        for shard in retry {
            allocation.push_unassigned(shard);
        }
        changed
    }

    /// Relocates started shards that may not remain where they are.
    pub fn move_shards(&self, allocation: &mut RoutingAllocation) -> bool {
        let mut changed = false;
        for shard in interleaved_started_shards(allocation) {
            let Some(node_id) = shard.assigned_node_id().cloned() else {
                continue;
            };
            let Some(current) = allocation
                .routing_nodes()
                .node(&node_id)
                .and_then(|n| n.shard(&shard.shard_id))
                .filter(|c| c.is_started())
                .cloned()
            else {
                continue;
            };
            let deciders = allocation.deciders();
            let must_move = {
                let node = allocation
                    .routing_nodes()
                    .node(&node_id)
                    .expect("shard's node must exist");
                deciders.can_remain(&current, node, allocation).is_no()
            };
            if !must_move {
                continue;
            }
            if !deciders.can_allocate_anywhere(&current, allocation).is_yes() {
                continue;
            }
            let candidates: Vec<NodeId> = allocation
                .routing_nodes()
                .node_ids()
                .filter(|id| **id != node_id)
                .cloned()
                .collect();
            let (best, _) = self.min_weight_node(allocation, &current, &candidates);
            if let Some(target) = best {
                allocation.relocate_shard(&current, &target);
                changed = true;
            } else if matches!(
                allocation.metadata().shutdown_for(&node_id),
                Some(NodeShutdownKind::Replace { .. })
            ) {
                for target in &candidates {
                    let allowed = {
                        let Some(node) = allocation.routing_nodes().node(target) else {
                            continue;
                        };
                        deciders.can_force_allocate_during_replace(&current, node, allocation)
                    };
                    if allowed.is_yes() {
                        allocation.relocate_shard(&current, target);
                        changed = true;
                        break;
                    }
                }
            }
        }
        changed
    }

    /// Relocates shards whose move strictly improves the weight spread.
    pub fn rebalance(&self, allocation: &mut RoutingAllocation) -> bool {
        if !allocation
            .deciders()
            .can_rebalance_cluster(allocation)
            .is_yes()
        {
            return false;
        }
        let mut changed = false;
        for shard in interleaved_started_shards(allocation) {
            let Some(node_id) = shard.assigned_node_id().cloned() else {
                continue;
            };
            let Some(current) = allocation
                .routing_nodes()
                .node(&node_id)
                .and_then(|n| n.shard(&shard.shard_id))
                .filter(|c| c.is_started())
                .cloned()
            else {
                continue;
            };
            let deciders = allocation.deciders();
            if !deciders.can_rebalance_shard(&current, allocation).is_yes() {
                continue;
            }
            let current_weight = {
                let node = allocation
                    .routing_nodes()
                    .node(&node_id)
                    .expect("shard's node must exist");
                self.weight
                    .weight(node, &current.shard_id, allocation.cluster_info())
            };
            let candidates: Vec<NodeId> = allocation
                .routing_nodes()
                .node_ids()
                .filter(|id| **id != node_id)
                .cloned()
                .collect();
            let (best, _) = self.min_weight_node(allocation, &current, &candidates);
            let Some(target) = best else {
                continue;
            };
            let target_weight_after = {
                let node = allocation
                    .routing_nodes()
                    .node(&target)
                    .expect("candidate node must exist");
                self.weight
                    .weight(node, &current.shard_id, allocation.cluster_info())
                    + self.weight.shard_weight()
            };
            if target_weight_after < current_weight - REBALANCE_EPSILON {
                allocation.relocate_shard(&current, &target);
                changed = true;
            }
        }
        changed
    }

    /// Simulates recovery completion: every initializing copy starts, which
    /// also completes in-flight relocations.
    pub fn start_initializing(&self, allocation: &mut RoutingAllocation) {
        let initializing: Vec<ShardRouting> = allocation
            .routing_nodes()
            .nodes()
            .flat_map(|n| n.iter())
            .filter(|s| s.is_initializing())
            .cloned()
            .collect();
        for shard in initializing {
            allocation.start_shard(&shard);
        }
    }
}
