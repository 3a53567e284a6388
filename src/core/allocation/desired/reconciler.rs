// src/core/allocation/desired/reconciler.rs

//! The desired-balance reconciler: a stateless three-phase transform that
//! walks unassigned, movable, and rebalanceable shards and records the next
//! legal set of movements toward the desired balance. Runs on the master
//! thread inside a task executor; decider outcomes are data, never errors.

use crate::core::allocation::balancer::{interleaved_started_shards, sort_unassigned};
use crate::core::allocation::deciders::Decision;
use crate::core::allocation::desired::balance::DesiredBalance;
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::metadata::{NodeId, NodeShutdownKind, ShardId};
use crate::core::routing::ShardRouting;
use crate::core::routing::shard_routing::AllocationStatus;
use std::collections::HashSet;
use tracing::debug;

pub fn reconcile(balance: &DesiredBalance, allocation: &mut RoutingAllocation) {
    if balance.is_sentinel() {
        debug!("desired balance is the initial sentinel; nothing to reconcile");
        return;
    }
    allocate_unassigned(balance, allocation);
    #[cfg(debug_assertions)]
    {
        assert!(
            !allocation.routing_nodes().has_unassigned(),
            "unassigned list must be empty after the allocation phase"
        );
        let metadata = allocation.metadata().clone();
        allocation.routing_nodes().assert_consistency(&metadata);
    }
    move_shards(balance, allocation);
    rebalance(balance, allocation);
}

/// Phase A: every unassigned shard is either initialized on exactly one node
/// or parked in the ignored list with an allocation status.
fn allocate_unassigned(balance: &DesiredBalance, allocation: &mut RoutingAllocation) {
    let mut unassigned = allocation.drain_unassigned();
    if unassigned.is_empty() {
        return;
    }

    // Without data nodes there is nothing to try; untried primaries are
    // marked refused so cluster health reports them red.
    if allocation.routing_nodes().nodes().next().is_none() {
        for shard in unassigned {
            let status = if shard.primary {
                AllocationStatus::DecidersNo
            } else {
                AllocationStatus::NoAttempt
            };
            allocation.ignore_shard(shard, status);
        }
        return;
    }

    let metadata = allocation.metadata().clone();
    sort_unassigned(&mut unassigned, &metadata);

    // Once one replica of a shard has been decided, its identical siblings
    // are deferred to a second pass so throttle budgets are spread fairly.
    let mut replica_seen: HashSet<ShardId> = HashSet::new();
    let mut deferred = Vec::new();
    for shard in unassigned {
        if !shard.primary && !replica_seen.insert(shard.shard_id.clone()) {
            deferred.push(shard);
            continue;
        }
        allocate_one(balance, allocation, shard);
    }
    for shard in deferred {
        allocate_one(balance, allocation, shard);
    }
}

fn allocate_one(balance: &DesiredBalance, allocation: &mut RoutingAllocation, shard: ShardRouting) {
    // A replica is not attempted until its primary is active somewhere.
    if !shard.primary && allocation.active_primary(&shard.shard_id).is_none() {
        allocation.ignore_shard(shard, AllocationStatus::NoAttempt);
        return;
    }

    let Some(assignment) = balance
        .assignment(&shard.shard_id)
        .filter(|a| !a.nodes.is_empty())
    else {
        allocation.ignore_shard(shard, AllocationStatus::NoAttempt);
        return;
    };

    let deciders = allocation.deciders();
    let desired: Vec<NodeId> = assignment.nodes.iter().cloned().collect();
    let rotated = allocation
        .ordering()
        .rotate(shard.shard_id.index_name(), &desired);

    let mut saw_throttle = false;
    let mut chosen: Option<NodeId> = None;
    for node_id in &rotated {
        // A desired node that has since left the cluster is skipped silently.
        let Some(node) = allocation.routing_nodes().node(node_id) else {
            continue;
        };
        match deciders.can_allocate(&shard, node, allocation) {
            Decision::Yes => {
                chosen = Some(node_id.clone());
                break;
            }
            Decision::Throttle(_) => saw_throttle = true,
            Decision::No(_) => {}
        }
    }

    // Primary fallback: when no desired node accepts and none throttled, a
    // primary may still be brought up on any current node. A throttle means
    // the desired placement will likely succeed soon, so no fallback then.
    if chosen.is_none() && shard.primary && !saw_throttle {
        let all_nodes: Vec<NodeId> = allocation.routing_nodes().node_ids().cloned().collect();
        let rotated = allocation
            .ordering()
            .rotate(shard.shard_id.index_name(), &all_nodes);
        for node_id in &rotated {
            let Some(node) = allocation.routing_nodes().node(node_id) else {
                continue;
            };
            match deciders.can_force_allocate_primary(&shard, node, allocation) {
                Decision::Yes => {
                    chosen = Some(node_id.clone());
                    break;
                }
                Decision::Throttle(_) => saw_throttle = true,
                Decision::No(_) => {}
            }
        }
    }

    match chosen {
        Some(node_id) => {
            allocation.assign_shard(&shard, &node_id);
        }
        None => {
            let status = if saw_throttle {
                AllocationStatus::DecidersThrottled
            } else {
                AllocationStatus::DecidersNo
            };
            allocation.ignore_shard(shard, status);
        }
    }
}

/// Phase B: started shards that may not remain are moved to an acceptable
/// desired node, or forced onto the replacement node during a replace
/// shutdown.
fn move_shards(balance: &DesiredBalance, allocation: &mut RoutingAllocation) {
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
        if !deciders
            .can_allocate_anywhere(&current, allocation)
            .is_yes()
        {
            continue;
        }

        let desired: Vec<NodeId> = balance
            .assignment(&current.shard_id)
            .map(|a| a.nodes.iter().filter(|n| **n != node_id).cloned().collect())
            .unwrap_or_default();
        let rotated = allocation
            .ordering()
            .rotate(current.shard_id.index_name(), &desired);
        let mut target: Option<NodeId> = None;
        for candidate in &rotated {
            let Some(node) = allocation.routing_nodes().node(candidate) else {
                continue;
            };
            if deciders.can_allocate(&current, node, allocation).is_yes() {
                target = Some(candidate.clone());
                break;
            }
        }

        if target.is_none()
            && matches!(
                allocation.metadata().shutdown_for(&node_id),
                Some(NodeShutdownKind::Replace { .. })
            )
        {
            for candidate in allocation
                .routing_nodes()
                .node_ids()
                .filter(|id| **id != node_id)
                .cloned()
                .collect::<Vec<_>>()
            {
                let allowed = {
                    let Some(node) = allocation.routing_nodes().node(&candidate) else {
                        continue;
                    };
                    deciders.can_force_allocate_during_replace(&current, node, allocation)
                };
                if allowed.is_yes() {
                    target = Some(candidate);
                    break;
                }
            }
        }

        if let Some(target) = target {
            allocation.relocate_shard(&current, &target);
        }
    }
}

/// Phase C: voluntary rebalancing of started shards that sit on a node the
/// desired balance does not want them on.
fn rebalance(balance: &DesiredBalance, allocation: &mut RoutingAllocation) {
    if !allocation
        .deciders()
        .can_rebalance_cluster(allocation)
        .is_yes()
    {
        return;
    }
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
        let Some(assignment) = balance.assignment(&current.shard_id) else {
            continue;
        };
        if assignment.nodes.contains(&node_id) {
            continue;
        }
        let deciders = allocation.deciders();
        if !deciders.can_rebalance_shard(&current, allocation).is_yes() {
            continue;
        }
        let desired: Vec<NodeId> = assignment.nodes.iter().cloned().collect();
        let rotated = allocation
            .ordering()
            .rotate(current.shard_id.index_name(), &desired);
        for candidate in &rotated {
            let Some(node) = allocation.routing_nodes().node(candidate) else {
                continue;
            };
            if deciders.can_allocate(&current, node, allocation).is_yes() {
                allocation.relocate_shard(&current, candidate);
                break;
            }
        }
    }
}
