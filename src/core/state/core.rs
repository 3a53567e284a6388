// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use crate::config::Config;
use crate::core::IoliteError;
use crate::core::allocation::commands::AllocationCommand;
use crate::core::allocation::deciders::AllocationDeciders;
use crate::core::allocation::desired::allocator::{DesiredBalanceAllocator, DesiredBalanceStats};
use crate::core::cluster::info_service::{ClusterInfoService, StoreStatsProvider};
use crate::core::cluster::state::ClusterState;
use crate::core::cluster::state_tasks::{ClusterStateUpdateExecutor, ClusterStateUpdateTask};
use crate::core::master::service::{ClusterStatePublisher, MasterService};
use crate::core::master::task_queue::{MasterTaskQueue, Priority};
use crate::core::metadata::{DiscoveryNode, IndexMetadata, NodeId, NodeShutdownKind};
use crate::core::pressure::IndexingPressure;
use std::sync::Arc;
use tracing::info;

/// The central struct holding all shared, server-wide state. Wrapped in an
/// `Arc` and passed to every background task, providing a single source of
/// truth for the control plane's components.
pub struct ServerState {
    /// The server's static configuration.
    pub config: Arc<Config>,
    /// The single-writer master task loop and its published state.
    pub master: Arc<MasterService>,
    /// The periodically refreshed disk/shard-size snapshot.
    pub info: Arc<ClusterInfoService>,
    /// Desired-balance computation, reconciliation, and admin commands.
    pub allocator: Arc<DesiredBalanceAllocator>,
    /// Write-path admission control.
    pub pressure: Arc<IndexingPressure>,
    /// Queue for metadata and membership mutations.
    state_update_queue: MasterTaskQueue<ClusterStateUpdateTask>,
}

impl ServerState {
    /// Initializes the entire control plane from the given configuration.
    /// This is the main factory function for creating the server's shared context.
    pub fn initialize(
        config: Config,
        initial_state: Arc<ClusterState>,
        publisher: Arc<dyn ClusterStatePublisher>,
        stats_provider: Arc<dyn StoreStatsProvider>,
    ) -> Result<Arc<Self>, IoliteError> {
        let pressure_limit = config
            .resolve_indexing_pressure_limit()
            .map_err(|e| IoliteError::Config(e.to_string()))?;
        let config = Arc::new(config);
        let allocation_config = Arc::new(config.allocation.clone());

        let master = MasterService::new(initial_state, publisher);
        let info = Arc::new(ClusterInfoService::new(
            stats_provider,
            config.cluster_info.update_interval,
            config.cluster_info.update_timeout,
            config.allocation.disk_threshold_enabled,
        ));
        info.on_elected();

        let deciders = Arc::new(AllocationDeciders::standard());
        let allocator = DesiredBalanceAllocator::new(
            deciders,
            allocation_config,
            info.clone(),
            &master,
        );
        let state_update_queue =
            master.create_queue("cluster-state-update", Priority::Normal, ClusterStateUpdateExecutor);
        let pressure = Arc::new(IndexingPressure::new(pressure_limit));

        Ok(Arc::new(Self {
            config,
            master,
            info,
            allocator,
            pressure,
            state_update_queue,
        }))
    }

    /// The latest applied cluster state.
    pub fn cluster_state(&self) -> Arc<ClusterState> {
        self.master.state()
    }

    pub fn desired_balance_stats(&self) -> DesiredBalanceStats {
        self.allocator.stats()
    }

    /// Submits a state-update task and, on success, kicks off a fresh
    /// allocation round so routing follows the mutation.
    async fn submit_state_update(
        &self,
        source: &str,
        task: ClusterStateUpdateTask,
    ) -> Result<Arc<ClusterState>, IoliteError> {
        let receiver = self.state_update_queue.submit(source, task, None);
        let applied = receiver
            .await
            .map_err(|_| IoliteError::NotMaster)??;
        let _ = self.allocator.submit(applied.clone());
        Ok(applied)
    }

    pub async fn create_index(
        &self,
        metadata: IndexMetadata,
    ) -> Result<Arc<ClusterState>, IoliteError> {
        self.submit_state_update("create-index", ClusterStateUpdateTask::CreateIndex { metadata })
            .await
    }

    pub async fn delete_index(&self, name: &str) -> Result<Arc<ClusterState>, IoliteError> {
        self.submit_state_update(
            "delete-index",
            ClusterStateUpdateTask::DeleteIndex {
                name: name.to_string(),
            },
        )
        .await
    }

    pub async fn close_index(&self, name: &str) -> Result<Arc<ClusterState>, IoliteError> {
        self.submit_state_update(
            "close-index",
            ClusterStateUpdateTask::CloseIndex {
                name: name.to_string(),
            },
        )
        .await
    }

    pub async fn open_index(&self, name: &str) -> Result<Arc<ClusterState>, IoliteError> {
        self.submit_state_update(
            "open-index",
            ClusterStateUpdateTask::OpenIndex {
                name: name.to_string(),
            },
        )
        .await
    }

    pub async fn node_joined(
        &self,
        node: DiscoveryNode,
    ) -> Result<Arc<ClusterState>, IoliteError> {
        self.submit_state_update("node-join", ClusterStateUpdateTask::NodeJoined { node })
            .await
    }

    pub async fn node_left(&self, node_id: &NodeId) -> Result<Arc<ClusterState>, IoliteError> {
        self.submit_state_update(
            "node-left",
            ClusterStateUpdateTask::NodeLeft {
                node_id: node_id.clone(),
            },
        )
        .await
    }

    pub async fn put_node_shutdown(
        &self,
        node_id: &NodeId,
        kind: NodeShutdownKind,
    ) -> Result<Arc<ClusterState>, IoliteError> {
        self.submit_state_update(
            "put-node-shutdown",
            ClusterStateUpdateTask::PutNodeShutdown {
                node_id: node_id.clone(),
                kind,
            },
        )
        .await
    }

    /// Validates and applies admin allocation commands.
    pub fn execute_allocation_commands(
        &self,
        commands: Vec<AllocationCommand>,
    ) -> Result<(), IoliteError> {
        let state = self.cluster_state();
        self.allocator.execute_commands(commands, &state)?;
        Ok(())
    }

    /// Re-election of this node as master.
    pub fn on_master_elected(&self) {
        info!("node elected as master; control plane resuming");
        self.master.become_master();
        self.info.on_elected();
    }

    /// Master loss: every component falls back to its demoted state and all
    /// pending listeners are failed.
    pub fn on_master_demoted(&self) {
        info!("node lost mastership; draining control plane");
        self.master.step_down();
        self.info.on_demoted();
        self.allocator.on_demoted();
        self.pressure.reset();
    }
}
