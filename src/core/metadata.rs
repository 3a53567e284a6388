// src/core/metadata.rs

//! Cluster metadata: index definitions, node membership, and node-shutdown
//! markers. All of these are value types carried inside the immutable
//! [`crate::core::cluster::ClusterState`] snapshot.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// A node identifier, unique for the lifetime of the cluster membership entry.
pub type NodeId = String;

/// Stable identity of an index: its user-visible name plus an immutable UUID
/// that survives the name being reused after a delete/create cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId {
    pub name: String,
    pub uuid: Uuid,
}

impl IndexId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.name)
    }
}

/// Identifies one shard of one index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId {
    pub index: IndexId,
    pub id: u32,
}

impl ShardId {
    pub fn new(index: IndexId, id: u32) -> Self {
        Self { index, id }
    }

    pub fn index_name(&self) -> &str {
        &self.index.name
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index.name, self.id)
    }
}

/// Whether an index is open for writes or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IndexState {
    #[default]
    Open,
    Closed,
}

/// Per-index settings consumed by the allocation deciders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexSettings {
    /// Node names this index's shards may never be allocated to.
    #[serde(default)]
    pub excluded_node_names: BTreeSet<String>,
    /// Per-index override of the cluster-wide allocation enable toggle.
    #[serde(default)]
    pub allocation_enable: Option<EnableAllocation>,
    /// Restricts the *initial* allocation of this index's shards to one node,
    /// e.g. after a shrink. Cleared once the shards have started somewhere.
    #[serde(default)]
    pub initial_recovery_node: Option<NodeId>,
}

/// Cluster-wide (or per-index) toggle controlling which shards may be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EnableAllocation {
    #[default]
    All,
    Primaries,
    NewPrimaries,
    None,
}

/// Toggle controlling which shards may take part in voluntary rebalancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EnableRebalance {
    #[default]
    All,
    Primaries,
    Replicas,
    None,
}

/// The definition of one index. `uuid` and `number_of_shards` are immutable
/// for the lifetime of the index; `number_of_replicas` may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub id: IndexId,
    pub state: IndexState,
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
    /// Recovery ordering hint: higher-priority indices are allocated first.
    pub priority: u32,
    pub settings: IndexSettings,
}

impl IndexMetadata {
    pub fn new(name: impl Into<String>, shards: u32, replicas: u32) -> Self {
        Self {
            id: IndexId::new(name),
            state: IndexState::Open,
            number_of_shards: shards,
            number_of_replicas: replicas,
            priority: 1,
            settings: IndexSettings::default(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Iterates all shard ids of this index, `0..number_of_shards`.
    pub fn shard_ids(&self) -> impl Iterator<Item = ShardId> + '_ {
        (0..self.number_of_shards).map(|n| ShardId::new(self.id.clone(), n))
    }
}

/// How a node is being taken out of service. Consumed by the node-shutdown
/// decider and by the reconciler's forced-move phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeShutdownKind {
    /// Node restarts in place; shards may stay where they are.
    Restart,
    /// Node leaves permanently; shards must move somewhere else.
    Remove,
    /// Node is being swapped for a named replacement; shards should move there.
    Replace { target_node_name: String },
}

/// The full metadata half of the cluster state: all index definitions plus
/// node-shutdown markers. Insertion-ordered so iteration is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub indices: IndexMap<String, IndexMetadata>,
    pub shutdowns: IndexMap<NodeId, NodeShutdownKind>,
}

impl Metadata {
    pub fn index(&self, name: &str) -> Option<&IndexMetadata> {
        self.indices.get(name)
    }

    pub fn index_for_shard(&self, shard_id: &ShardId) -> Option<&IndexMetadata> {
        self.indices
            .get(shard_id.index_name())
            .filter(|m| m.id.uuid == shard_id.index.uuid)
    }

    /// Replica count for a shard, if the owning index still exists.
    pub fn number_of_replicas(&self, shard_id: &ShardId) -> Option<u32> {
        self.index_for_shard(shard_id).map(|m| m.number_of_replicas)
    }

    pub fn shutdown_for(&self, node_id: &NodeId) -> Option<&NodeShutdownKind> {
        self.shutdowns.get(node_id)
    }

    /// Adds an index definition. Replaces any prior definition of the same name.
    pub fn put_index(&mut self, index: IndexMetadata) {
        self.indices.insert(index.name().to_string(), index);
    }

    pub fn remove_index(&mut self, name: &str) -> Option<IndexMetadata> {
        self.indices.shift_remove(name)
    }
}

/// Roles a node can hold. Only data nodes host shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    Master,
    Data,
}

/// A member of the cluster as seen by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    pub id: NodeId,
    pub name: String,
    pub roles: BTreeSet<NodeRole>,
}

impl DiscoveryNode {
    pub fn new_data_node(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roles: BTreeSet::from([NodeRole::Data]),
        }
    }

    pub fn is_data_node(&self) -> bool {
        self.roles.contains(&NodeRole::Data)
    }
}

/// The current cluster membership view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryNodes {
    pub nodes: IndexMap<NodeId, DiscoveryNode>,
    pub local_node_id: Option<NodeId>,
    pub master_node_id: Option<NodeId>,
}

impl DiscoveryNodes {
    pub fn get(&self, id: &str) -> Option<&DiscoveryNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn add(&mut self, node: DiscoveryNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn remove(&mut self, id: &str) -> Option<DiscoveryNode> {
        self.nodes.shift_remove(id)
    }

    pub fn data_nodes(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values().filter(|n| n.is_data_node())
    }

    pub fn data_node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.data_nodes().map(|n| &n.id)
    }

    /// Node name → node lookup, used by the replace-shutdown path where the
    /// replacement is named before it has an id.
    pub fn find_by_name(&self, name: &str) -> Option<&DiscoveryNode> {
        self.nodes.values().find(|n| n.name == name)
    }
}
