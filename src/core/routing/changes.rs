// src/core/routing/changes.rs

//! Append-only log of shard transitions produced by one allocation round.
//! The log is the audit trail; the new routing table itself is rebuilt from
//! the working set when the master task commits.

use crate::core::metadata::{NodeId, ShardId};
use crate::core::routing::shard_routing::AllocationStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingChange {
    ShardInitialized {
        shard_id: ShardId,
        primary: bool,
        node: NodeId,
    },
    ShardStarted {
        shard_id: ShardId,
        node: NodeId,
    },
    RelocationStarted {
        shard_id: ShardId,
        from: NodeId,
        to: NodeId,
    },
    UnassignedIgnored {
        shard_id: ShardId,
        primary: bool,
        status: AllocationStatus,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RoutingChanges {
    changes: Vec<RoutingChange>,
}

impl RoutingChanges {
    pub fn push(&mut self, change: RoutingChange) {
        self.changes.push(change);
    }

    /// True once any change that affects shard placement has been recorded.
    /// Ignoring an unassigned shard does not move anything and does not count.
    pub fn changed(&self) -> bool {
        self.changes
            .iter()
            .any(|c| !matches!(c, RoutingChange::UnassignedIgnored { .. }))
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutingChange> {
        self.changes.iter()
    }
}
