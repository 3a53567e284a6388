// src/core/routing/table.rs

//! The committed routing table: for every shard of every index, the routing
//! entry of each logical copy (one primary plus `number_of_replicas`
//! replicas). Relocation targets are not logical copies; they only exist in
//! the working [`super::RoutingNodes`] form.

use crate::core::metadata::{IndexId, IndexMetadata, ShardId};
use crate::core::routing::shard_routing::{ShardRouting, UnassignedReason};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// All copies of one shard. `copies[0]` is the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardTable {
    pub shard_id: ShardId,
    pub copies: Vec<ShardRouting>,
}

impl ShardTable {
    pub fn primary(&self) -> Option<&ShardRouting> {
        self.copies.iter().find(|c| c.primary)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &ShardRouting> {
        self.copies.iter().filter(|c| !c.primary)
    }

    /// The primary, if it holds live data and can serve.
    pub fn active_primary(&self) -> Option<&ShardRouting> {
        self.primary().filter(|p| p.is_active())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRoutingTable {
    pub index: IndexId,
    pub shards: Vec<ShardTable>,
}

impl IndexRoutingTable {
    /// Builds the initial routing of a freshly created index: every copy
    /// unassigned, primaries with `IndexCreated`, replicas with `ReplicaAdded`.
    pub fn new_index(metadata: &IndexMetadata) -> Self {
        let shards = metadata
            .shard_ids()
            .map(|shard_id| {
                let mut copies = Vec::with_capacity(metadata.number_of_replicas as usize + 1);
                copies.push(ShardRouting::new_unassigned(
                    shard_id.clone(),
                    true,
                    UnassignedReason::IndexCreated,
                ));
                for _ in 0..metadata.number_of_replicas {
                    copies.push(ShardRouting::new_unassigned(
                        shard_id.clone(),
                        false,
                        UnassignedReason::ReplicaAdded,
                    ));
                }
                ShardTable { shard_id, copies }
            })
            .collect();
        Self {
            index: metadata.id.clone(),
            shards,
        }
    }
}

/// The committed, immutable routing view inside a cluster state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoutingTable {
    pub indices: IndexMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    pub fn index(&self, name: &str) -> Option<&IndexRoutingTable> {
        self.indices.get(name)
    }

    pub fn shard(&self, shard_id: &ShardId) -> Option<&ShardTable> {
        self.indices
            .get(shard_id.index_name())
            .filter(|t| t.index.uuid == shard_id.index.uuid)
            .and_then(|t| t.shards.get(shard_id.id as usize))
    }

    pub fn add_index(&mut self, metadata: &IndexMetadata) {
        self.indices.insert(
            metadata.name().to_string(),
            IndexRoutingTable::new_index(metadata),
        );
    }

    pub fn remove_index(&mut self, name: &str) -> Option<IndexRoutingTable> {
        self.indices.shift_remove(name)
    }

    pub fn all_shards(&self) -> impl Iterator<Item = &ShardRouting> {
        self.indices
            .values()
            .flat_map(|t| t.shards.iter())
            .flat_map(|s| s.copies.iter())
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &ShardId> {
        self.indices
            .values()
            .flat_map(|t| t.shards.iter())
            .map(|s| &s.shard_id)
    }

    pub fn has_unassigned_shards(&self) -> bool {
        self.all_shards().any(|s| s.is_unassigned())
    }
}
