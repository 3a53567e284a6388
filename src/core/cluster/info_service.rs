// src/core/cluster/info_service.rs

//! Periodically gathers filesystem stats from all data nodes and store-size
//! stats from all shards, aggregates them into an immutable [`ClusterInfo`]
//! snapshot, and notifies listeners.

use crate::core::cluster::info::{ClusterInfo, NodeFsStats, ShardStoreStats};
use crate::core::cluster::state::ClusterState;
use crate::core::errors::IoliteError;
use crate::core::metadata::NodeId;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, oneshot};
use tracing::{debug, info, warn};

/// Source of the raw stats gathered during a refresh. The production
/// implementation fans out over the transport to every data node; tests
/// inject fakes.
#[async_trait]
pub trait StoreStatsProvider: Send + Sync {
    async fn node_fs_stats(&self) -> Result<Vec<NodeFsStats>, IoliteError>;
    async fn shard_store_stats(&self) -> Result<Vec<ShardStoreStats>, IoliteError>;
}

/// Listener callback invoked with every published snapshot. Errors are
/// logged and never propagate to the refresh.
pub type InfoListener = Box<dyn Fn(&Arc<ClusterInfo>) -> Result<(), IoliteError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectorState {
    Idle,
    Refreshing,
    Stopped,
}

/// The cluster-info collector. At most one refresh is ever in flight; a
/// refresh requested while one is running is coalesced into exactly one
/// follow-up refresh.
pub struct ClusterInfoService {
    provider: Arc<dyn StoreStatsProvider>,
    update_interval: Duration,
    update_timeout: Duration,
    enabled: bool,
    state: Mutex<CollectorState>,
    current: RwLock<Arc<ClusterInfo>>,
    /// Listeners waiting for a refresh that has not yet *started*; served by
    /// the next refresh so the stats they observe are newer than the request.
    queued_listeners: Mutex<Vec<oneshot::Sender<Arc<ClusterInfo>>>>,
    listeners: Mutex<Vec<InfoListener>>,
    refresh_requested: Notify,
    known_data_nodes: Mutex<BTreeSet<NodeId>>,
    completed_refreshes: AtomicU64,
}

impl ClusterInfoService {
    pub fn new(
        provider: Arc<dyn StoreStatsProvider>,
        update_interval: Duration,
        update_timeout: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            provider,
            update_interval,
            update_timeout,
            enabled,
            state: Mutex::new(CollectorState::Stopped),
            current: RwLock::new(Arc::new(ClusterInfo::default())),
            queued_listeners: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            refresh_requested: Notify::new(),
            known_data_nodes: Mutex::new(BTreeSet::new()),
            completed_refreshes: AtomicU64::new(0),
        }
    }

    /// The latest published snapshot. Initially empty.
    pub fn cluster_info(&self) -> Arc<ClusterInfo> {
        self.current.read().clone()
    }

    pub fn add_listener(&self, listener: InfoListener) {
        self.listeners.lock().push(listener);
    }

    /// Registers a one-shot listener served by the next refresh to *start*.
    /// If the collector is stopped, the listener immediately receives an
    /// empty snapshot.
    pub fn refresh_async(&self, listener: oneshot::Sender<Arc<ClusterInfo>>) {
        if *self.state.lock() == CollectorState::Stopped {
            let _ = listener.send(Arc::new(ClusterInfo::default()));
            return;
        }
        self.queued_listeners.lock().push(listener);
        self.request_refresh();
    }

    /// Requests an off-cycle refresh. Requests arriving while a refresh is in
    /// flight coalesce into a single follow-up.
    pub fn request_refresh(&self) {
        self.refresh_requested.notify_one();
    }

    /// Inspects a newly applied cluster state; growth of the data-node set
    /// triggers an immediate off-cycle refresh.
    pub fn on_cluster_state(&self, state: &ClusterState) {
        let mut known = self.known_data_nodes.lock();
        let current: BTreeSet<NodeId> = state.nodes.data_node_ids().cloned().collect();
        let grew = current.iter().any(|id| !known.contains(id));
        *known = current;
        if grew {
            debug!("data node joined; requesting off-cycle cluster-info refresh");
            self.request_refresh();
        }
    }

    /// Master election: begin collecting.
    pub fn on_elected(&self) {
        let mut state = self.state.lock();
        if *state == CollectorState::Stopped {
            info!("cluster-info collector starting");
            *state = CollectorState::Idle;
        }
    }

    /// Master demotion: stop collecting and release queued listeners with an
    /// empty snapshot.
    pub fn on_demoted(&self) {
        {
            let mut state = self.state.lock();
            if *state == CollectorState::Stopped {
                return;
            }
            info!("cluster-info collector stopping");
            *state = CollectorState::Stopped;
        }
        let listeners = std::mem::take(&mut *self.queued_listeners.lock());
        let empty = Arc::new(ClusterInfo::default());
        for listener in listeners {
            let _ = listener.send(empty.clone());
        }
    }

    pub fn completed_refreshes(&self) -> u64 {
        self.completed_refreshes.load(Ordering::Acquire)
    }

    /// Runs the refresh loop: the periodic timer plus coalesced off-cycle
    /// requests. State-change notifications arrive via [`Self::on_cluster_state`]
    /// from whichever task watches applied states.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.enabled {
            info!("disk threshold monitoring disabled; cluster-info collector will not run");
            return;
        }
        info!(
            "cluster-info collector started (interval {:?}, fan-out timeout {:?})",
            self.update_interval, self.update_timeout
        );
        let mut interval = tokio::time::interval(self.update_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.refresh_now().await,
                _ = self.refresh_requested.notified() => self.refresh_now().await,
                _ = shutdown_rx.recv() => {
                    info!("cluster-info collector shutting down");
                    return;
                }
            }
        }
    }

    /// Performs one full refresh cycle. A no-op while stopped.
    pub async fn refresh_now(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                CollectorState::Stopped => return,
                // Structurally unreachable from the single run loop; guards
                // direct callers in tests.
                CollectorState::Refreshing => return,
                CollectorState::Idle => *state = CollectorState::Refreshing,
            }
        }

        // Listeners registered from here on are served by the *next* refresh.
        let serving = std::mem::take(&mut *self.queued_listeners.lock());

        let fs_fut = tokio::time::timeout(self.update_timeout, self.provider.node_fs_stats());
        let shards_fut =
            tokio::time::timeout(self.update_timeout, self.provider.shard_store_stats());
        let (fs_res, shards_res) = tokio::join!(fs_fut, shards_fut);

        let fs_stats: Vec<NodeFsStats> = match fs_res {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                warn!("node fs stats collection failed: {e}; keeping empty summary");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "node fs stats collection timed out after {:?}; keeping empty summary",
                    self.update_timeout
                );
                Vec::new()
            }
        };
        let shard_stats: Vec<ShardStoreStats> = match shards_res {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                warn!("shard store stats collection failed: {e}; keeping empty summary");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "shard store stats collection timed out after {:?}; keeping empty summary",
                    self.update_timeout
                );
                Vec::new()
            }
        };

        let snapshot = Arc::new(ClusterInfo::build(fs_stats, shard_stats));
        *self.current.write() = snapshot.clone();

        {
            let mut state = self.state.lock();
            if *state == CollectorState::Refreshing {
                *state = CollectorState::Idle;
            }
        }
        self.completed_refreshes.fetch_add(1, Ordering::AcqRel);

        for listener in serving {
            let _ = listener.send(snapshot.clone());
        }
        for listener in self.listeners.lock().iter() {
            if let Err(e) = listener(&snapshot) {
                warn!("cluster-info listener failed: {e}");
            }
        }
        debug!(
            "cluster-info refresh complete: {} nodes, {} shard sizes",
            snapshot.least_available_space.len(),
            snapshot.shard_sizes.len()
        );
    }
}
