// src/core/cluster/mod.rs

//! Cluster-level state: the immutable published [`ClusterState`] snapshot,
//! the [`ClusterInfo`] disk/shard-size snapshot, and the info collector that
//! refreshes it.

pub mod info;
pub mod info_service;
pub mod state;
pub mod state_tasks;

// Re-export key types for easier access from other modules.
pub use info::{ClusterInfo, DiskUsage, NodeFsStats, ShardSizeKey, ShardStoreStats};
pub use info_service::{ClusterInfoService, StoreStatsProvider};
pub use state::ClusterState;
pub use state_tasks::{ClusterStateUpdateExecutor, ClusterStateUpdateTask};
