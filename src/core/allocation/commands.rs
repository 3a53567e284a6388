// src/core/allocation/commands.rs

//! Administrator-issued allocation commands. Commands are validated against
//! the current cluster state up front; accepted commands become hints the
//! desired-balance computer folds into its next computation.

use crate::core::cluster::state::ClusterState;
use crate::core::errors::IoliteError;
use crate::core::metadata::{NodeId, ShardId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "command")]
pub enum AllocationCommand {
    /// Move a started shard copy from one node to another.
    Move {
        shard: ShardId,
        from: NodeId,
        to: NodeId,
    },
    /// Allocate an unassigned shard copy to a specific node.
    Allocate { shard: ShardId, node: NodeId },
    /// Cancel an in-flight recovery of a shard copy on a node.
    Cancel { shard: ShardId, node: NodeId },
}

impl AllocationCommand {
    pub fn shard_id(&self) -> &ShardId {
        match self {
            Self::Move { shard, .. } | Self::Allocate { shard, .. } | Self::Cancel { shard, .. } => {
                shard
            }
        }
    }

    /// Checks the command against the current state: the index and shard must
    /// exist and every referenced node must be a known data node.
    pub fn validate(&self, state: &ClusterState) -> Result<(), IoliteError> {
        let shard_id = self.shard_id();
        if state.metadata.index_for_shard(shard_id).is_none() {
            return Err(IoliteError::IndexNotFound(shard_id.index_name().to_string()));
        }
        if state.routing_table.shard(shard_id).is_none() {
            return Err(IoliteError::ShardNotFound(shard_id.to_string()));
        }
        let check_node = |node: &NodeId| -> Result<(), IoliteError> {
            if state.nodes.contains(node) {
                Ok(())
            } else {
                Err(IoliteError::NodeNotFound(node.clone()))
            }
        };
        match self {
            Self::Move { from, to, .. } => {
                check_node(from)?;
                check_node(to)?;
                if from == to {
                    return Err(IoliteError::InvalidRequest(format!(
                        "cannot move {shard_id} from [{from}] onto itself"
                    )));
                }
                Ok(())
            }
            Self::Allocate { node, .. } | Self::Cancel { node, .. } => check_node(node),
        }
    }
}
