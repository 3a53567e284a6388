// src/server/initialization.rs

//! Handles the complete server initialization process: building the initial
//! cluster state, wiring the local stats provider, and assembling the
//! `ServerContext`.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::cluster::info::{FsPathStats, NodeFsStats, ShardStoreStats};
use crate::core::cluster::info_service::StoreStatsProvider;
use crate::core::cluster::state::ClusterState;
use crate::core::errors::IoliteError;
use crate::core::master::service::NoopPublisher;
use crate::core::metadata::{DiscoveryNode, DiscoveryNodes, Metadata, NodeId, NodeRole};
use crate::core::routing::RoutingTable;
use crate::core::state::ServerState;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use sysinfo::Disks;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

/// Reports the local node's filesystem stats via `sysinfo`. Shard store
/// stats come from data nodes over the transport, which is not part of this
/// crate; a master-only process reports none.
pub struct LocalFsStatsProvider {
    node_id: NodeId,
}

impl LocalFsStatsProvider {
    pub fn new(node_id: NodeId) -> Self {
        Self { node_id }
    }
}

#[async_trait]
impl StoreStatsProvider for LocalFsStatsProvider {
    async fn node_fs_stats(&self) -> Result<Vec<NodeFsStats>, IoliteError> {
        let disks = Disks::new_with_refreshed_list();
        let paths = disks
            .iter()
            .map(|disk| FsPathStats {
                path: disk.mount_point().to_string_lossy().into_owned(),
                total_bytes: disk.total_space(),
                free_bytes: disk.available_space(),
            })
            .collect();
        Ok(vec![NodeFsStats {
            node_id: self.node_id.clone(),
            paths,
        }])
    }

    async fn shard_store_stats(&self) -> Result<Vec<ShardStoreStats>, IoliteError> {
        Ok(Vec::new())
    }
}

/// Builds the initial single-node cluster state and the shared server state.
pub async fn setup(config: Config) -> Result<ServerContext> {
    let node_id = uuid::Uuid::new_v4().to_string();
    info!(
        "initializing control plane as node [{}] ({})",
        config.node_name, node_id
    );

    let local_node = DiscoveryNode {
        id: node_id.clone(),
        name: config.node_name.clone(),
        roles: BTreeSet::from([NodeRole::Master, NodeRole::Data]),
    };
    let mut nodes = DiscoveryNodes::default();
    nodes.add(local_node);
    nodes.local_node_id = Some(node_id.clone());
    nodes.master_node_id = Some(node_id.clone());

    let initial_state = Arc::new(ClusterState::new(
        nodes,
        Metadata::default(),
        RoutingTable::default(),
    ));

    let state = ServerState::initialize(
        config,
        initial_state,
        Arc::new(NoopPublisher),
        Arc::new(LocalFsStatsProvider::new(node_id)),
    )?;

    let (shutdown_tx, _) = broadcast::channel(8);
    Ok(ServerContext {
        state,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}
