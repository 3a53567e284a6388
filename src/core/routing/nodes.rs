// src/core/routing/nodes.rs

//! The mutable working form of the routing table used during one allocation
//! round. Owned by the reconciliation in flight; mutations are recorded in a
//! [`super::RoutingChanges`] accumulator and folded back into an immutable
//! [`super::RoutingTable`] when the master task commits.

use crate::core::metadata::{DiscoveryNodes, Metadata, NodeId, ShardId};
use crate::core::routing::shard_routing::{
    AllocationStatus, ShardRouting, ShardRoutingState, UnassignedReason,
};
use crate::core::routing::table::{IndexRoutingTable, RoutingTable, ShardTable};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::debug;

/// One data node and the shard copies it currently hosts.
///
/// Invariant: every hosted routing has `current_node_id == Some(self.node_id)`.
#[derive(Debug, Clone)]
pub struct RoutingNode {
    pub node_id: NodeId,
    shards: IndexMap<ShardId, ShardRouting>,
}

impl RoutingNode {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            shards: IndexMap::new(),
        }
    }

    pub fn shard(&self, shard_id: &ShardId) -> Option<&ShardRouting> {
        self.shards.get(shard_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.values()
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn num_shards_of_index(&self, shard_id: &ShardId) -> usize {
        self.shards
            .keys()
            .filter(|s| s.index == shard_id.index)
            .count()
    }

    /// Recoveries landing on this node: fresh initializations plus incoming
    /// relocation targets.
    pub fn num_incoming_recoveries(&self) -> usize {
        self.shards.values().filter(|s| s.is_initializing()).count()
    }

    /// Relocations leaving this node.
    pub fn num_outgoing_recoveries(&self) -> usize {
        self.shards.values().filter(|s| s.is_relocating()).count()
    }

    pub fn started_shards(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.values().filter(|s| s.is_started())
    }

    fn insert(&mut self, routing: ShardRouting) {
        debug_assert_eq!(
            routing.current_node_id.as_ref(),
            Some(&self.node_id),
            "routing node {} cannot host {routing}",
            self.node_id
        );
        self.shards.insert(routing.shard_id.clone(), routing);
    }

    fn remove(&mut self, shard_id: &ShardId) -> Option<ShardRouting> {
        self.shards.shift_remove(shard_id)
    }
}

/// All routing nodes plus the unassigned and ignored shard lists.
#[derive(Debug, Clone)]
pub struct RoutingNodes {
    nodes: IndexMap<NodeId, RoutingNode>,
    unassigned: Vec<ShardRouting>,
    ignored: Vec<ShardRouting>,
}

impl RoutingNodes {
    /// Builds the working set from a committed table and the current
    /// membership. Copies assigned to departed nodes become unassigned with
    /// reason `NodeLeft`; if that loses an active primary, an active replica
    /// is promoted in its place.
    pub fn new(table: &RoutingTable, nodes: &DiscoveryNodes) -> Self {
        let mut routing_nodes: IndexMap<NodeId, RoutingNode> = nodes
            .data_nodes()
            .map(|n| (n.id.clone(), RoutingNode::new(n.id.clone())))
            .collect();
        let mut unassigned = Vec::new();

        for index_table in table.indices.values() {
            for shard_table in &index_table.shards {
                let mut copies: Vec<ShardRouting> = Vec::new();
                for copy in &shard_table.copies {
                    match copy.state {
                        ShardRoutingState::Unassigned => copies.push(copy.clone()),
                        ShardRoutingState::Relocating => {
                            let source_alive = copy
                                .assigned_node_id()
                                .is_some_and(|id| routing_nodes.contains_key(id));
                            let target_alive = copy
                                .relocating_node_id
                                .as_ref()
                                .is_some_and(|id| routing_nodes.contains_key(id));
                            match (source_alive, target_alive) {
                                (true, true) => copies.push(copy.clone()),
                                // Target gone: the source simply stays put.
                                (true, false) => {
                                    let mut reverted = copy.clone();
                                    reverted.state = ShardRoutingState::Started;
                                    reverted.relocating_node_id = None;
                                    reverted.expected_shard_size = None;
                                    copies.push(reverted);
                                }
                                (false, _) => {
                                    copies.push(copy.moved_to_unassigned(UnassignedReason::NodeLeft));
                                }
                            }
                        }
                        _ => {
                            if copy
                                .assigned_node_id()
                                .is_some_and(|id| routing_nodes.contains_key(id))
                            {
                                copies.push(copy.clone());
                            } else {
                                copies.push(copy.moved_to_unassigned(UnassignedReason::NodeLeft));
                            }
                        }
                    }
                }

                // Promote an active replica if the shard lost its live primary.
                let has_live_primary = copies
                    .iter()
                    .any(|c| c.primary && !c.is_unassigned());
                if !has_live_primary {
                    if let Some(promoted) = copies
                        .iter()
                        .position(|c| !c.primary && c.is_active())
                    {
                        debug!(
                            "promoting active replica of {} on node [{}] to primary",
                            shard_table.shard_id,
                            copies[promoted].current_node_id.as_deref().unwrap_or("-")
                        );
                        copies[promoted].primary = true;
                        if let Some(old) = copies.iter_mut().find(|c| c.primary && c.is_unassigned())
                        {
                            old.primary = false;
                        }
                    }
                }

                for copy in copies {
                    if copy.is_unassigned() {
                        unassigned.push(copy);
                        continue;
                    }
                    let node_id = copy
                        .assigned_node_id()
                        .expect("assigned copy must carry a node id")
                        .clone();
                    if copy.is_relocating() {
                        // Materialize the in-flight target copy on the target node.
                        let target_id = copy
                            .relocating_node_id
                            .clone()
                            .expect("relocating copy must carry a target");
                        let target_copy = ShardRouting {
                            shard_id: copy.shard_id.clone(),
                            primary: copy.primary,
                            state: ShardRoutingState::Initializing,
                            current_node_id: Some(target_id.clone()),
                            relocating_node_id: copy.current_node_id.clone(),
                            allocation_id: copy
                                .allocation_id
                                .as_ref()
                                .map(|id| format!("{id}-target")),
                            unassigned_info: None,
                            expected_shard_size: copy.expected_shard_size,
                        };
                        if let Some(target_node) = routing_nodes.get_mut(&target_id) {
                            target_node.insert(target_copy);
                        }
                    }
                    if let Some(node) = routing_nodes.get_mut(&node_id) {
                        node.insert(copy);
                    }
                }
            }
        }

        Self {
            nodes: routing_nodes,
            unassigned,
            ignored: Vec::new(),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&RoutingNode> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RoutingNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn unassigned(&self) -> &[ShardRouting] {
        &self.unassigned
    }

    pub fn ignored(&self) -> &[ShardRouting] {
        &self.ignored
    }

    pub fn has_unassigned(&self) -> bool {
        !self.unassigned.is_empty()
    }

    /// Takes the whole unassigned list; the caller owns iteration and must
    /// hand every shard back via `assign`, `ignore`, or `push_unassigned`.
    pub fn drain_unassigned(&mut self) -> Vec<ShardRouting> {
        std::mem::take(&mut self.unassigned)
    }

    pub fn push_unassigned(&mut self, routing: ShardRouting) {
        debug_assert!(routing.is_unassigned());
        self.unassigned.push(routing);
    }

    /// Moves every ignored shard back into the unassigned list so a later
    /// pass can retry it.
    pub fn reclaim_ignored(&mut self) {
        self.unassigned.append(&mut self.ignored);
    }

    /// Cancels an in-flight recovery of `shard_id` on `node_id`. A canceled
    /// relocation target reverts its source to `Started`; a canceled fresh
    /// initialization returns the copy to the unassigned list.
    pub fn cancel_recovery(&mut self, shard_id: &ShardId, node_id: &NodeId) -> bool {
        let Some(copy) = self
            .nodes
            .get(node_id)
            .and_then(|n| n.shard(shard_id))
            .filter(|c| c.is_initializing())
            .cloned()
        else {
            return false;
        };
        self.nodes
            .get_mut(node_id)
            .expect("checked above")
            .remove(shard_id);
        if let Some(source_node_id) = copy.relocating_node_id.clone() {
            if let Some(source_node) = self.nodes.get_mut(&source_node_id) {
                if let Some(source) = source_node.shard(shard_id).cloned() {
                    let mut reverted = source;
                    reverted.state = ShardRoutingState::Started;
                    reverted.relocating_node_id = None;
                    reverted.expected_shard_size = None;
                    source_node.insert(reverted);
                }
            }
        } else {
            self.unassigned
                .push(copy.moved_to_unassigned(UnassignedReason::ManualAllocation));
        }
        true
    }

    /// Unassigned → Initializing on `node_id`. Returns the new routing.
    pub fn assign(
        &mut self,
        routing: &ShardRouting,
        node_id: &NodeId,
        expected_shard_size: Option<u64>,
    ) -> ShardRouting {
        let initialized = routing.initialize(node_id.clone(), expected_shard_size);
        self.nodes
            .get_mut(node_id)
            .expect("cannot assign a shard to a node that is not in the routing table")
            .insert(initialized.clone());
        initialized
    }

    /// Parks an unassigned shard in the ignored list with the given status.
    pub fn ignore(&mut self, routing: ShardRouting, status: AllocationStatus) {
        let mut ignored = routing;
        let info = ignored
            .unassigned_info
            .take()
            .unwrap_or_else(|| {
                crate::core::routing::shard_routing::UnassignedInfo::new(
                    UnassignedReason::AllocationFailed,
                )
            })
            .with_status(status);
        ignored.unassigned_info = Some(info);
        self.ignored.push(ignored);
    }

    /// Started → Relocating towards `target`. Returns (source, target) routings.
    pub fn relocate(
        &mut self,
        routing: &ShardRouting,
        target: &NodeId,
        expected_shard_size: Option<u64>,
    ) -> (ShardRouting, ShardRouting) {
        let (source, target_copy) = routing.relocate(target.clone(), expected_shard_size);
        let source_node = source
            .assigned_node_id()
            .expect("relocating source must be assigned")
            .clone();
        self.nodes
            .get_mut(&source_node)
            .expect("relocation source node missing")
            .insert(source.clone());
        self.nodes
            .get_mut(target)
            .expect("relocation target node missing")
            .insert(target_copy.clone());
        (source, target_copy)
    }

    /// Initializing → Started. Completing a relocation target removes the
    /// relocating source from its node.
    pub fn start(&mut self, routing: &ShardRouting) -> ShardRouting {
        let node_id = routing
            .assigned_node_id()
            .expect("initializing copy must be assigned")
            .clone();
        if let Some(source_node_id) = routing.relocating_node_id.clone() {
            if let Some(source_node) = self.nodes.get_mut(&source_node_id) {
                source_node.remove(&routing.shard_id);
            }
        }
        let mut started = routing.moved_to_started();
        started.relocating_node_id = None;
        self.nodes
            .get_mut(&node_id)
            .expect("started copy's node missing")
            .insert(started.clone());
        started
    }

    /// Folds the working set back into an immutable table, preserving the
    /// index and shard ordering of `previous`. Relocation targets are dropped;
    /// they are re-derived from their `Relocating` sources on the next round.
    pub fn to_routing_table(&self, previous: &RoutingTable) -> RoutingTable {
        let mut by_shard: HashMap<ShardId, Vec<ShardRouting>> = HashMap::new();
        for node in self.nodes.values() {
            for routing in node.iter() {
                if routing.is_relocation_target() {
                    continue;
                }
                by_shard
                    .entry(routing.shard_id.clone())
                    .or_default()
                    .push(routing.clone());
            }
        }
        for routing in self.unassigned.iter().chain(self.ignored.iter()) {
            by_shard
                .entry(routing.shard_id.clone())
                .or_default()
                .push(routing.clone());
        }

        let mut indices = IndexMap::new();
        for (name, index_table) in &previous.indices {
            let shards = index_table
                .shards
                .iter()
                .map(|shard_table| {
                    let mut copies = by_shard
                        .remove(&shard_table.shard_id)
                        .unwrap_or_default();
                    // Primary first, stable for replicas.
                    copies.sort_by_key(|c| !c.primary);
                    ShardTable {
                        shard_id: shard_table.shard_id.clone(),
                        copies,
                    }
                })
                .collect();
            indices.insert(
                name.clone(),
                IndexRoutingTable {
                    index: index_table.index.clone(),
                    shards,
                },
            );
        }
        RoutingTable { indices }
    }

    /// Checks the per-shard copy-count invariant: assigned (excluding
    /// relocation targets) + unassigned + ignored copies of every shard equal
    /// `replicas + 1`. Indices absent from `metadata` are skipped.
    pub fn assert_consistency(&self, metadata: &Metadata) {
        let mut counts: HashMap<ShardId, usize> = HashMap::new();
        for node in self.nodes.values() {
            for routing in node.iter() {
                debug_assert_eq!(routing.assigned_node_id(), Some(&node.node_id));
                if !routing.is_relocation_target() {
                    *counts.entry(routing.shard_id.clone()).or_default() += 1;
                }
            }
        }
        for routing in self.unassigned.iter().chain(self.ignored.iter()) {
            *counts.entry(routing.shard_id.clone()).or_default() += 1;
        }
        for (shard_id, count) in counts {
            if let Some(replicas) = metadata.number_of_replicas(&shard_id) {
                assert_eq!(
                    count,
                    replicas as usize + 1,
                    "shard {shard_id} has {count} copies, expected {}",
                    replicas + 1
                );
            }
        }
    }
}
