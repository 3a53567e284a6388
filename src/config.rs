// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and validation.

use crate::core::metadata::{EnableAllocation, EnableRebalance};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::time::Duration;
use sysinfo::System;
use tracing::warn;

/// Settings for the cluster-info collector.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterInfoConfig {
    /// How often the collector refreshes disk and shard-size stats.
    /// Clamped to a minimum of 10 seconds.
    #[serde(with = "humantime_serde", default = "default_info_update_interval")]
    pub update_interval: Duration,
    /// Per fan-out timeout for each half of a refresh.
    #[serde(with = "humantime_serde", default = "default_info_update_timeout")]
    pub update_timeout: Duration,
}

impl Default for ClusterInfoConfig {
    fn default() -> Self {
        Self {
            update_interval: default_info_update_interval(),
            update_timeout: default_info_update_timeout(),
        }
    }
}

fn default_info_update_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_info_update_timeout() -> Duration {
    Duration::from_secs(15)
}

const MIN_INFO_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Weights and budget for the desired-balance computer's delegate balancer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BalancerConfig {
    /// Weight of a node's total shard count.
    #[serde(default = "default_shard_balance_factor")]
    pub shard_balance_factor: f64,
    /// Weight of a node's shard count for the index being placed.
    #[serde(default = "default_index_balance_factor")]
    pub index_balance_factor: f64,
    /// Weight of a node's disk used ratio.
    #[serde(default = "default_disk_usage_balance_factor")]
    pub disk_usage_balance_factor: f64,
    /// Iteration budget for one desired-balance computation.
    #[serde(default = "default_max_balancer_iterations")]
    pub max_iterations: u32,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            shard_balance_factor: default_shard_balance_factor(),
            index_balance_factor: default_index_balance_factor(),
            disk_usage_balance_factor: default_disk_usage_balance_factor(),
            max_iterations: default_max_balancer_iterations(),
        }
    }
}

fn default_shard_balance_factor() -> f64 {
    0.45
}

fn default_index_balance_factor() -> f64 {
    0.55
}

fn default_disk_usage_balance_factor() -> f64 {
    1.0
}

fn default_max_balancer_iterations() -> u32 {
    1000
}

/// Settings consumed by the allocation deciders and the balancer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AllocationConfig {
    /// Gates both the disk-threshold decider and the cluster-info collector.
    #[serde(default = "default_true")]
    pub disk_threshold_enabled: bool,
    /// A shard may not be *allocated* to a node whose disk would exceed this
    /// used ratio.
    #[serde(default = "default_low_disk_watermark")]
    pub low_disk_watermark_ratio: f64,
    /// A shard may not *remain* on a node whose disk exceeds this used ratio.
    #[serde(default = "default_high_disk_watermark")]
    pub high_disk_watermark_ratio: f64,
    /// Maximum concurrent recoveries landing on one node before THROTTLE.
    #[serde(default = "default_concurrent_recoveries")]
    pub node_concurrent_incoming_recoveries: usize,
    /// Maximum concurrent relocations leaving one node before THROTTLE.
    #[serde(default = "default_concurrent_recoveries")]
    pub node_concurrent_outgoing_recoveries: usize,
    #[serde(default)]
    pub allocation_enable: EnableAllocation,
    #[serde(default)]
    pub rebalance_enable: EnableRebalance,
    /// Node names no shard may be allocated to.
    #[serde(default)]
    pub excluded_node_names: BTreeSet<String>,
    #[serde(default)]
    pub balancer: BalancerConfig,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            disk_threshold_enabled: true,
            low_disk_watermark_ratio: default_low_disk_watermark(),
            high_disk_watermark_ratio: default_high_disk_watermark(),
            node_concurrent_incoming_recoveries: default_concurrent_recoveries(),
            node_concurrent_outgoing_recoveries: default_concurrent_recoveries(),
            allocation_enable: EnableAllocation::default(),
            rebalance_enable: EnableRebalance::default(),
            excluded_node_names: BTreeSet::new(),
            balancer: BalancerConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_low_disk_watermark() -> f64 {
    0.85
}

fn default_high_disk_watermark() -> f64 {
    0.90
}

fn default_concurrent_recoveries() -> usize {
    2
}

/// The indexing-pressure admission limit, as written in the config file:
/// either absolute bytes or a percentage of system memory.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum MemoryLimitConfig {
    Bytes(u64),
    String(String),
}

impl Default for MemoryLimitConfig {
    fn default() -> Self {
        Self::String("10%".to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IndexingPressureConfig {
    /// Admission threshold for combined coordinating + primary bytes.
    #[serde(default)]
    pub memory_limit: MemoryLimitConfig,
}

/// The fully resolved server configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_node_name")]
    pub node_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub cluster_info: ClusterInfoConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub indexing_pressure: IndexingPressureConfig,
    /// Write thread-pool queue depth; `-1` means unbounded.
    #[serde(default = "default_write_queue_size")]
    pub write_queue_size: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            log_level: default_log_level(),
            cluster_info: ClusterInfoConfig::default(),
            allocation: AllocationConfig::default(),
            indexing_pressure: IndexingPressureConfig::default(),
            write_queue_size: default_write_queue_size(),
        }
    }
}

fn default_node_name() -> String {
    "iolite-master".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_write_queue_size() -> i64 {
    10_000
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        if config.cluster_info.update_interval < MIN_INFO_UPDATE_INTERVAL {
            warn!(
                "cluster_info.update_interval {:?} is below the {:?} minimum; clamping",
                config.cluster_info.update_interval, MIN_INFO_UPDATE_INTERVAL
            );
            config.cluster_info.update_interval = MIN_INFO_UPDATE_INTERVAL;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(anyhow!("node_name cannot be empty"));
        }
        if self.cluster_info.update_timeout.is_zero() {
            return Err(anyhow!("cluster_info.update_timeout must be positive"));
        }
        let alloc = &self.allocation;
        if !(0.0..=1.0).contains(&alloc.low_disk_watermark_ratio)
            || !(0.0..=1.0).contains(&alloc.high_disk_watermark_ratio)
        {
            return Err(anyhow!("disk watermark ratios must be within 0.0..=1.0"));
        }
        if alloc.low_disk_watermark_ratio > alloc.high_disk_watermark_ratio {
            return Err(anyhow!(
                "low_disk_watermark_ratio cannot exceed high_disk_watermark_ratio"
            ));
        }
        if alloc.balancer.max_iterations == 0 {
            return Err(anyhow!("allocation.balancer.max_iterations must be positive"));
        }
        if self.write_queue_size < -1 {
            return Err(anyhow!("write_queue_size must be -1 (unbounded) or >= 0"));
        }
        Ok(())
    }

    /// Resolves the indexing-pressure limit to bytes, evaluating percentage
    /// limits against total system memory.
    pub fn resolve_indexing_pressure_limit(&self) -> Result<u64> {
        match &self.indexing_pressure.memory_limit {
            MemoryLimitConfig::Bytes(b) => Ok(*b),
            MemoryLimitConfig::String(s) => {
                let s_lower = s.to_lowercase();
                if let Some(percentage_str) = s_lower.strip_suffix('%') {
                    let percentage: f64 = percentage_str
                        .trim()
                        .parse()
                        .context("Invalid indexing_pressure.memory_limit percentage")?;
                    if !(0.0..=100.0).contains(&percentage) {
                        return Err(anyhow!(
                            "indexing_pressure.memory_limit percentage must be within 0..=100"
                        ));
                    }
                    let total = total_system_memory();
                    Ok((total as f64 * percentage / 100.0) as u64)
                } else {
                    s_lower
                        .parse::<u64>()
                        .map_err(|_| anyhow!("Invalid indexing_pressure.memory_limit value '{s}'"))
                }
            }
        }
    }
}

fn total_system_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory()
}
