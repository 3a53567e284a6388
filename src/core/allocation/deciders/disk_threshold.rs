// src/core/allocation/deciders/disk_threshold.rs

use crate::core::allocation::deciders::{AllocationDecider, Decision};
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::routing::{RoutingNode, ShardRouting};

/// Keeps nodes below the disk watermarks: allocation is refused when landing
/// the shard would push the node past the low watermark, and a shard may not
/// remain on a node past the high watermark. Nodes without disk info are
/// accepted; the collector will catch up.
pub struct DiskThresholdDecider;

impl AllocationDecider for DiskThresholdDecider {
    fn name(&self) -> &'static str {
        "disk_threshold"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let config = allocation.config();
        if !config.disk_threshold_enabled {
            return Decision::Yes;
        }
        let Some(usage) = allocation.cluster_info().least_available(&node.node_id) else {
            return Decision::Yes;
        };
        let shard_size = allocation.cluster_info().shard_size(shard).unwrap_or(0);
        let reserved = allocation
            .cluster_info()
            .reserved_bytes(&node.node_id, &usage.path);
        let projected_used = usage.used_bytes().saturating_add(reserved).saturating_add(shard_size);
        let projected_ratio = if usage.total_bytes == 0 {
            1.0
        } else {
            projected_used as f64 / usage.total_bytes as f64
        };
        if projected_ratio > config.low_disk_watermark_ratio {
            Decision::No(format!(
                "allocating {} ({shard_size} bytes) to node [{}] would raise disk usage to \
                 {:.1}%, above the low watermark of {:.1}%",
                shard.shard_id,
                node.node_id,
                projected_ratio * 100.0,
                config.low_disk_watermark_ratio * 100.0
            ))
        } else {
            Decision::Yes
        }
    }

    fn can_remain(
        &self,
        shard: &ShardRouting,
        node: &RoutingNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let config = allocation.config();
        if !config.disk_threshold_enabled {
            return Decision::Yes;
        }
        let Some(usage) = allocation.cluster_info().least_available(&node.node_id) else {
            return Decision::Yes;
        };
        if usage.used_ratio() > config.high_disk_watermark_ratio {
            Decision::No(format!(
                "disk usage on node [{}] is {:.1}%, above the high watermark of {:.1}%; \
                 {} must move elsewhere",
                node.node_id,
                usage.used_ratio() * 100.0,
                config.high_disk_watermark_ratio * 100.0,
                shard.shard_id
            ))
        } else {
            Decision::Yes
        }
    }
}
