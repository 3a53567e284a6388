// src/core/cluster/info.rs

//! The immutable cluster-info snapshot: per-node disk usage, per-shard store
//! sizes, and reserved space for in-flight recoveries. Replaced wholesale on
//! each refresh; read-only once published.

use crate::core::metadata::{NodeId, ShardId};
use crate::core::routing::ShardRouting;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Disk usage of one filesystem path on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub node_id: NodeId,
    pub path: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl DiskUsage {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    /// Fraction of the disk in use, `0.0..=1.0`. Zero-sized disks read as full.
    pub fn used_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.used_bytes() as f64 / self.total_bytes as f64
        }
    }
}

/// Identifies the store of one shard copy: shard plus primary flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardSizeKey {
    pub shard_id: ShardId,
    pub primary: bool,
}

/// Raw filesystem stats reported by one data node during a refresh.
#[derive(Debug, Clone)]
pub struct NodeFsStats {
    pub node_id: NodeId,
    pub paths: Vec<FsPathStats>,
}

#[derive(Debug, Clone)]
pub struct FsPathStats {
    pub path: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Raw store stats reported for one shard copy during a refresh.
#[derive(Debug, Clone)]
pub struct ShardStoreStats {
    pub shard_id: ShardId,
    pub primary: bool,
    pub node_id: NodeId,
    pub path: Option<String>,
    pub store_bytes: u64,
    /// Size of the full data set, which can exceed the local store for
    /// partially cached copies.
    pub data_set_bytes: u64,
    /// Bytes still expected to land for an in-flight recovery on this copy.
    pub reserved_bytes: u64,
}

/// The aggregated snapshot. Built once per refresh and never mutated after.
#[derive(Debug, Clone, Default)]
pub struct ClusterInfo {
    /// For each node, the path with the least available space.
    pub least_available_space: HashMap<NodeId, DiskUsage>,
    /// For each node, the path with the most available space.
    pub most_available_space: HashMap<NodeId, DiskUsage>,
    pub shard_sizes: HashMap<ShardSizeKey, u64>,
    /// Per shard, the max data-set size across all copies.
    pub shard_data_set_sizes: HashMap<ShardId, u64>,
    /// Reserved bytes per (node, path) for shards still recovering onto it.
    pub reserved_space: HashMap<(NodeId, String), u64>,
}

impl ClusterInfo {
    /// Aggregates one refresh's raw fan-out results. Either half may be empty
    /// when its request failed or timed out; the snapshot is still built.
    pub fn build(fs_stats: Vec<NodeFsStats>, shard_stats: Vec<ShardStoreStats>) -> Self {
        let mut least_available_space = HashMap::new();
        let mut most_available_space = HashMap::new();
        for node in fs_stats {
            let mut least: Option<DiskUsage> = None;
            let mut most: Option<DiskUsage> = None;
            for path in node.paths {
                let usage = DiskUsage {
                    node_id: node.node_id.clone(),
                    path: path.path,
                    total_bytes: path.total_bytes,
                    free_bytes: path.free_bytes,
                };
                if least
                    .as_ref()
                    .is_none_or(|l| usage.free_bytes < l.free_bytes)
                {
                    least = Some(usage.clone());
                }
                if most
                    .as_ref()
                    .is_none_or(|m| usage.free_bytes > m.free_bytes)
                {
                    most = Some(usage);
                }
            }
            if let (Some(least), Some(most)) = (least, most) {
                least_available_space.insert(node.node_id.clone(), least);
                most_available_space.insert(node.node_id, most);
            }
        }

        let mut shard_sizes = HashMap::new();
        let mut shard_data_set_sizes: HashMap<ShardId, u64> = HashMap::new();
        let mut reserved_space: HashMap<(NodeId, String), u64> = HashMap::new();
        for stat in shard_stats {
            shard_sizes.insert(
                ShardSizeKey {
                    shard_id: stat.shard_id.clone(),
                    primary: stat.primary,
                },
                stat.store_bytes,
            );
            let entry = shard_data_set_sizes
                .entry(stat.shard_id.clone())
                .or_default();
            *entry = (*entry).max(stat.data_set_bytes);
            if stat.reserved_bytes > 0 {
                if let Some(path) = stat.path {
                    *reserved_space
                        .entry((stat.node_id.clone(), path))
                        .or_default() += stat.reserved_bytes;
                }
            }
        }

        Self {
            least_available_space,
            most_available_space,
            shard_sizes,
            shard_data_set_sizes,
            reserved_space,
        }
    }

    /// Store size of the given shard copy, if known.
    pub fn shard_size(&self, routing: &ShardRouting) -> Option<u64> {
        self.shard_sizes
            .get(&ShardSizeKey {
                shard_id: routing.shard_id.clone(),
                primary: routing.primary,
            })
            .copied()
            .or_else(|| {
                // An unknown replica falls back to the primary's store size.
                self.shard_sizes
                    .get(&ShardSizeKey {
                        shard_id: routing.shard_id.clone(),
                        primary: true,
                    })
                    .copied()
            })
    }

    pub fn least_available(&self, node_id: &str) -> Option<&DiskUsage> {
        self.least_available_space.get(node_id)
    }

    pub fn reserved_bytes(&self, node_id: &str, path: &str) -> u64 {
        self.reserved_space
            .get(&(node_id.to_string(), path.to_string()))
            .copied()
            .unwrap_or(0)
    }
}
