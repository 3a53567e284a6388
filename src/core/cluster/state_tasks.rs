// src/core/cluster/state_tasks.rs

//! Metadata and membership mutations, submitted through the master task
//! queue. Each task applies independently; a failing task is failed on its
//! own listener while the rest of the batch proceeds.

use crate::core::cluster::state::ClusterState;
use crate::core::errors::IoliteError;
use crate::core::master::task_queue::{ClusterStateTaskExecutor, TaskContext};
use crate::core::metadata::{DiscoveryNode, IndexMetadata, IndexState, NodeId, NodeShutdownKind};
use crate::core::routing::{RoutingTable, ShardRouting, UnassignedReason};
use std::sync::Arc;
use tracing::info;

pub enum ClusterStateUpdateTask {
    CreateIndex { metadata: IndexMetadata },
    DeleteIndex { name: String },
    /// Closed indices keep their routing so they stay recoverable.
    CloseIndex { name: String },
    OpenIndex { name: String },
    NodeJoined { node: DiscoveryNode },
    NodeLeft { node_id: NodeId },
    PutNodeShutdown { node_id: NodeId, kind: NodeShutdownKind },
    RemoveNodeShutdown { node_id: NodeId },
}

/// Applies metadata/membership tasks one by one against a working copy of
/// the state. Deterministic: the same batch against the same state yields
/// the same result.
pub struct ClusterStateUpdateExecutor;

impl ClusterStateUpdateExecutor {
    fn apply(
        task: &ClusterStateUpdateTask,
        state: &Arc<ClusterState>,
    ) -> Result<Arc<ClusterState>, IoliteError> {
        match task {
            ClusterStateUpdateTask::CreateIndex { metadata } => {
                if state.metadata.index(metadata.name()).is_some() {
                    return Err(IoliteError::InvalidState(format!(
                        "index [{}] already exists",
                        metadata.name()
                    )));
                }
                if metadata.number_of_shards == 0 {
                    return Err(IoliteError::InvalidRequest(format!(
                        "index [{}] must have at least one shard",
                        metadata.name()
                    )));
                }
                info!(
                    "creating index {} with [{}] shard(s) and [{}] replica(s)",
                    metadata.id, metadata.number_of_shards, metadata.number_of_replicas
                );
                let mut new_metadata = state.metadata.clone();
                new_metadata.put_index(metadata.clone());
                let mut new_table = state.routing_table.clone();
                new_table.add_index(metadata);
                Ok(state.with_metadata(new_metadata).with_routing_table(new_table))
            }
            ClusterStateUpdateTask::DeleteIndex { name } => {
                if state.metadata.index(name).is_none() {
                    return Err(IoliteError::IndexNotFound(name.clone()));
                }
                info!("deleting index [{name}]");
                let mut new_metadata = state.metadata.clone();
                new_metadata.remove_index(name);
                let mut new_table = state.routing_table.clone();
                new_table.remove_index(name);
                Ok(state.with_metadata(new_metadata).with_routing_table(new_table))
            }
            ClusterStateUpdateTask::CloseIndex { name } => {
                Self::set_index_state(state, name, IndexState::Closed)
            }
            ClusterStateUpdateTask::OpenIndex { name } => {
                Self::set_index_state(state, name, IndexState::Open)
            }
            ClusterStateUpdateTask::NodeJoined { node } => {
                if state.nodes.contains(&node.id) {
                    return Ok(state.clone());
                }
                info!("node [{}] ({}) joined the cluster", node.name, node.id);
                let mut new_nodes = state.nodes.clone();
                new_nodes.add(node.clone());
                Ok(state.with_nodes(new_nodes))
            }
            ClusterStateUpdateTask::NodeLeft { node_id } => {
                if !state.nodes.contains(node_id) {
                    return Ok(state.clone());
                }
                info!("node [{node_id}] left the cluster");
                let mut new_nodes = state.nodes.clone();
                new_nodes.remove(node_id);
                // Copies hosted by the departed node go back to unassigned in
                // the committed table; the next reconciliation replaces them.
                let new_table = strip_node(&state.routing_table, node_id);
                Ok(state.with_nodes(new_nodes).with_routing_table(new_table))
            }
            ClusterStateUpdateTask::PutNodeShutdown { node_id, kind } => {
                if !state.nodes.contains(node_id) {
                    return Err(IoliteError::NodeNotFound(node_id.clone()));
                }
                let mut new_metadata = state.metadata.clone();
                new_metadata.shutdowns.insert(node_id.clone(), kind.clone());
                Ok(state.with_metadata(new_metadata))
            }
            ClusterStateUpdateTask::RemoveNodeShutdown { node_id } => {
                let mut new_metadata = state.metadata.clone();
                if new_metadata.shutdowns.shift_remove(node_id).is_none() {
                    return Ok(state.clone());
                }
                Ok(state.with_metadata(new_metadata))
            }
        }
    }

    fn set_index_state(
        state: &Arc<ClusterState>,
        name: &str,
        index_state: IndexState,
    ) -> Result<Arc<ClusterState>, IoliteError> {
        let mut new_metadata = state.metadata.clone();
        let Some(index) = new_metadata.indices.get_mut(name) else {
            return Err(IoliteError::IndexNotFound(name.to_string()));
        };
        if index.state == index_state {
            return Ok(state.clone());
        }
        info!("index [{name}] is now {index_state:?}");
        index.state = index_state;
        Ok(state.with_metadata(new_metadata))
    }
}

impl ClusterStateTaskExecutor for ClusterStateUpdateExecutor {
    type Task = ClusterStateUpdateTask;

    fn execute(
        &self,
        initial_state: Arc<ClusterState>,
        tasks: &mut [TaskContext<Self::Task>],
    ) -> Result<Arc<ClusterState>, IoliteError> {
        let mut state = initial_state;
        for ctx in tasks.iter_mut() {
            match Self::apply(&ctx.task, &state) {
                Ok(next) => {
                    state = next;
                    ctx.success();
                }
                Err(e) => ctx.failure(e),
            }
        }
        Ok(state)
    }
}

fn strip_node(table: &RoutingTable, node_id: &NodeId) -> RoutingTable {
    let mut new_table = table.clone();
    for index_table in new_table.indices.values_mut() {
        for shard_table in &mut index_table.shards {
            for copy in &mut shard_table.copies {
                let on_node = copy.assigned_node_id() == Some(node_id);
                let relocating_to = copy.relocating_node_id.as_ref() == Some(node_id);
                if on_node {
                    *copy = copy.moved_to_unassigned(UnassignedReason::NodeLeft);
                } else if relocating_to && copy.is_relocating() {
                    *copy = ShardRouting {
                        state: crate::core::routing::ShardRoutingState::Started,
                        relocating_node_id: None,
                        expected_shard_size: None,
                        ..copy.clone()
                    };
                }
            }
        }
    }
    new_table
}
