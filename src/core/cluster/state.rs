// src/core/cluster/state.rs

//! The immutable cluster-state snapshot produced by the master task loop.

use crate::core::metadata::{DiscoveryNodes, Metadata};
use crate::core::routing::RoutingTable;
use std::sync::Arc;

/// One published cluster state. Copy-on-write: readers clone the `Arc` and
/// never lock; the master task loop is the only writer and bumps `version`
/// on every publish (strictly increasing).
#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    pub version: u64,
    pub nodes: DiscoveryNodes,
    pub metadata: Metadata,
    pub routing_table: RoutingTable,
}

impl ClusterState {
    pub fn new(nodes: DiscoveryNodes, metadata: Metadata, routing_table: RoutingTable) -> Self {
        Self {
            version: 0,
            nodes,
            metadata,
            routing_table,
        }
    }

    /// Derives a successor state with a new routing table. The version is
    /// left untouched; the master task loop stamps it at publish time.
    pub fn with_routing_table(&self, routing_table: RoutingTable) -> Arc<Self> {
        Arc::new(Self {
            version: self.version,
            nodes: self.nodes.clone(),
            metadata: self.metadata.clone(),
            routing_table,
        })
    }

    pub fn with_metadata(&self, metadata: Metadata) -> Arc<Self> {
        Arc::new(Self {
            version: self.version,
            nodes: self.nodes.clone(),
            metadata,
            routing_table: self.routing_table.clone(),
        })
    }

    pub fn with_nodes(&self, nodes: DiscoveryNodes) -> Arc<Self> {
        Arc::new(Self {
            version: self.version,
            nodes,
            metadata: self.metadata.clone(),
            routing_table: self.routing_table.clone(),
        })
    }
}
