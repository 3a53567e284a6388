// src/core/routing/shard_routing.rs

//! The per-copy routing entry and its state machine.

use crate::core::metadata::{NodeId, ShardId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of one shard copy.
///
/// `relocating_node_id` is overloaded the same way on both ends of a
/// relocation: on the `Relocating` source it names the target node, on the
/// in-flight `Initializing` target it names the source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardRoutingState {
    Unassigned,
    Initializing,
    Started,
    Relocating,
}

impl fmt::Display for ShardRoutingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unassigned => "UNASSIGNED",
            Self::Initializing => "INITIALIZING",
            Self::Started => "STARTED",
            Self::Relocating => "RELOCATING",
        };
        f.write_str(s)
    }
}

/// Why a shard copy is unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnassignedReason {
    IndexCreated,
    ReplicaAdded,
    NodeLeft,
    AllocationFailed,
    ManualAllocation,
}

/// Outcome of the most recent allocation attempt for an unassigned copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationStatus {
    /// No allocation attempt has been made yet.
    NoAttempt,
    /// Every viable node answered THROTTLE; the copy will be retried.
    DecidersThrottled,
    /// The decider chain refused every candidate node.
    DecidersNo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedInfo {
    pub reason: UnassignedReason,
    pub message: Option<String>,
    pub allocation_status: AllocationStatus,
}

impl UnassignedInfo {
    pub fn new(reason: UnassignedReason) -> Self {
        Self {
            reason,
            message: None,
            allocation_status: AllocationStatus::NoAttempt,
        }
    }

    pub fn with_status(mut self, status: AllocationStatus) -> Self {
        self.allocation_status = status;
        self
    }
}

/// Routing of a single shard copy. Value-typed: a state transition replaces
/// the entry rather than mutating it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    pub shard_id: ShardId,
    pub primary: bool,
    pub state: ShardRoutingState,
    pub current_node_id: Option<NodeId>,
    pub relocating_node_id: Option<NodeId>,
    /// Unique per active copy; assigned at initialization.
    pub allocation_id: Option<String>,
    pub unassigned_info: Option<UnassignedInfo>,
    pub expected_shard_size: Option<u64>,
}

impl ShardRouting {
    pub fn new_unassigned(shard_id: ShardId, primary: bool, reason: UnassignedReason) -> Self {
        Self {
            shard_id,
            primary,
            state: ShardRoutingState::Unassigned,
            current_node_id: None,
            relocating_node_id: None,
            allocation_id: None,
            unassigned_info: Some(UnassignedInfo::new(reason)),
            expected_shard_size: None,
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.state == ShardRoutingState::Unassigned
    }

    /// Started or relocating: the copy holds live data and can serve.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ShardRoutingState::Started | ShardRoutingState::Relocating
        )
    }

    pub fn is_started(&self) -> bool {
        self.state == ShardRoutingState::Started
    }

    pub fn is_initializing(&self) -> bool {
        self.state == ShardRoutingState::Initializing
    }

    pub fn is_relocating(&self) -> bool {
        self.state == ShardRoutingState::Relocating
    }

    /// True for the in-flight target copy of a relocation.
    pub fn is_relocation_target(&self) -> bool {
        self.state == ShardRoutingState::Initializing && self.relocating_node_id.is_some()
    }

    pub fn assigned_node_id(&self) -> Option<&NodeId> {
        self.current_node_id.as_ref()
    }

    /// Unassigned → Initializing on `node_id`.
    pub fn initialize(&self, node_id: NodeId, expected_shard_size: Option<u64>) -> Self {
        debug_assert!(self.is_unassigned(), "can only initialize an unassigned shard");
        Self {
            shard_id: self.shard_id.clone(),
            primary: self.primary,
            state: ShardRoutingState::Initializing,
            current_node_id: Some(node_id),
            relocating_node_id: None,
            allocation_id: Some(Uuid::new_v4().to_string()),
            unassigned_info: None,
            expected_shard_size,
        }
    }

    /// Initializing → Started. Relocation markers and the expected size are cleared.
    pub fn moved_to_started(&self) -> Self {
        debug_assert!(self.is_initializing(), "can only start an initializing shard");
        Self {
            state: ShardRoutingState::Started,
            relocating_node_id: None,
            expected_shard_size: None,
            ..self.clone()
        }
    }

    /// Started → Relocating towards `target`. Returns the updated source and
    /// the freshly initializing target copy.
    pub fn relocate(&self, target: NodeId, expected_shard_size: Option<u64>) -> (Self, Self) {
        debug_assert!(self.is_started(), "can only relocate a started shard");
        let source = Self {
            state: ShardRoutingState::Relocating,
            relocating_node_id: Some(target.clone()),
            expected_shard_size,
            ..self.clone()
        };
        let target_copy = Self {
            shard_id: self.shard_id.clone(),
            primary: self.primary,
            state: ShardRoutingState::Initializing,
            current_node_id: Some(target),
            relocating_node_id: self.current_node_id.clone(),
            allocation_id: Some(Uuid::new_v4().to_string()),
            unassigned_info: None,
            expected_shard_size,
        };
        (source, target_copy)
    }

    /// Assigned → Unassigned, e.g. when the hosting node left the cluster.
    pub fn moved_to_unassigned(&self, reason: UnassignedReason) -> Self {
        Self {
            state: ShardRoutingState::Unassigned,
            current_node_id: None,
            relocating_node_id: None,
            allocation_id: None,
            unassigned_info: Some(UnassignedInfo::new(reason)),
            expected_shard_size: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for ShardRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}], node[{}], {}",
            self.shard_id,
            if self.primary { "P" } else { "R" },
            self.current_node_id.as_deref().unwrap_or("-"),
            self.state
        )
    }
}
