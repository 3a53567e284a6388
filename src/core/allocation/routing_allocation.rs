// src/core/allocation/routing_allocation.rs

//! The context of one allocation round: immutable views of the cluster state
//! plus the mutable routing working set and its change accumulator. Thread
//! confined to whichever task runs the round; applied atomically at commit.

use crate::config::AllocationConfig;
use crate::core::allocation::deciders::AllocationDeciders;
use crate::core::allocation::ordering::NodeAllocationOrdering;
use crate::core::cluster::info::ClusterInfo;
use crate::core::cluster::state::ClusterState;
use crate::core::metadata::{DiscoveryNodes, Metadata, NodeId, ShardId};
use crate::core::routing::shard_routing::AllocationStatus;
use crate::core::routing::{
    RoutingChange, RoutingChanges, RoutingNodes, RoutingTable, ShardRouting,
};
use std::sync::Arc;

pub struct RoutingAllocation {
    deciders: Arc<AllocationDeciders>,
    config: Arc<AllocationConfig>,
    nodes: DiscoveryNodes,
    metadata: Metadata,
    cluster_info: Arc<ClusterInfo>,
    ordering: Arc<NodeAllocationOrdering>,
    routing_nodes: RoutingNodes,
    changes: RoutingChanges,
}

impl RoutingAllocation {
    pub fn new(
        deciders: Arc<AllocationDeciders>,
        config: Arc<AllocationConfig>,
        state: &ClusterState,
        cluster_info: Arc<ClusterInfo>,
        ordering: Arc<NodeAllocationOrdering>,
    ) -> Self {
        let routing_nodes = RoutingNodes::new(&state.routing_table, &state.nodes);
        Self {
            deciders,
            config,
            nodes: state.nodes.clone(),
            metadata: state.metadata.clone(),
            cluster_info,
            ordering,
            routing_nodes,
            changes: RoutingChanges::default(),
        }
    }

    pub fn deciders(&self) -> Arc<AllocationDeciders> {
        self.deciders.clone()
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    pub fn nodes(&self) -> &DiscoveryNodes {
        &self.nodes
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn cluster_info(&self) -> &ClusterInfo {
        &self.cluster_info
    }

    pub fn ordering(&self) -> &NodeAllocationOrdering {
        &self.ordering
    }

    pub fn routing_nodes(&self) -> &RoutingNodes {
        &self.routing_nodes
    }

    pub fn changes(&self) -> &RoutingChanges {
        &self.changes
    }

    pub fn has_changed(&self) -> bool {
        self.changes.changed()
    }

    /// The active primary copy of a shard, wherever it currently lives.
    pub fn active_primary(&self, shard_id: &ShardId) -> Option<&ShardRouting> {
        self.routing_nodes
            .nodes()
            .filter_map(|n| n.shard(shard_id))
            .find(|s| s.primary && s.is_active() && !s.is_relocation_target())
    }

    pub fn drain_unassigned(&mut self) -> Vec<ShardRouting> {
        self.routing_nodes.drain_unassigned()
    }

    pub fn push_unassigned(&mut self, routing: ShardRouting) {
        self.routing_nodes.push_unassigned(routing);
    }

    pub fn reclaim_ignored(&mut self) {
        self.routing_nodes.reclaim_ignored();
    }

    pub fn cancel_recovery(&mut self, shard_id: &ShardId, node_id: &NodeId) -> bool {
        self.routing_nodes.cancel_recovery(shard_id, node_id)
    }

    /// Unassigned → Initializing on `node_id`, with the expected size looked
    /// up from the cluster info. Advances the round-robin ordering record.
    pub fn assign_shard(&mut self, routing: &ShardRouting, node_id: &NodeId) -> ShardRouting {
        let expected = self.cluster_info.shard_size(routing);
        let initialized = self.routing_nodes.assign(routing, node_id, expected);
        self.ordering.record(routing.shard_id.index_name(), node_id);
        self.changes.push(RoutingChange::ShardInitialized {
            shard_id: routing.shard_id.clone(),
            primary: routing.primary,
            node: node_id.clone(),
        });
        initialized
    }

    pub fn ignore_shard(&mut self, routing: ShardRouting, status: AllocationStatus) {
        self.changes.push(RoutingChange::UnassignedIgnored {
            shard_id: routing.shard_id.clone(),
            primary: routing.primary,
            status,
        });
        self.routing_nodes.ignore(routing, status);
    }

    pub fn relocate_shard(
        &mut self,
        routing: &ShardRouting,
        target: &NodeId,
    ) -> (ShardRouting, ShardRouting) {
        let expected = self.cluster_info.shard_size(routing);
        let from = routing
            .assigned_node_id()
            .expect("relocation source must be assigned")
            .clone();
        let moved = self.routing_nodes.relocate(routing, target, expected);
        self.changes.push(RoutingChange::RelocationStarted {
            shard_id: routing.shard_id.clone(),
            from,
            to: target.clone(),
        });
        moved
    }

    pub fn start_shard(&mut self, routing: &ShardRouting) -> ShardRouting {
        let started = self.routing_nodes.start(routing);
        self.changes.push(RoutingChange::ShardStarted {
            shard_id: routing.shard_id.clone(),
            node: started
                .assigned_node_id()
                .expect("started copy must be assigned")
                .clone(),
        });
        started
    }

    /// Folds the working set back into an immutable routing table, preserving
    /// the ordering of `previous`.
    pub fn build_routing_table(&self, previous: &RoutingTable) -> RoutingTable {
        self.routing_nodes.to_routing_table(previous)
    }
}
