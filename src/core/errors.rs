// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the control plane.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
///
/// Allocation-decider outcomes (`No`, `Throttle`) are deliberately *not* errors;
/// they are data carried by [`crate::core::allocation::deciders::Decision`].
/// `Clone` because one batch-level failure fans out to every listener in the batch.
#[derive(Error, Debug, Clone)]
pub enum IoliteError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Back-pressure rejection from the indexing-pressure controller. Carries
    /// enough context for the caller to retry with backoff.
    #[error(
        "rejected execution of {role} operation [attempted: {attempted_bytes} bytes, \
         current: {current_bytes} bytes, limit: {limit_bytes} bytes]"
    )]
    RejectedExecution {
        role: &'static str,
        attempted_bytes: u64,
        current_bytes: u64,
        limit_bytes: u64,
    },

    /// This node is no longer the elected master. All pending master-task
    /// listeners are completed with this error when the node steps down.
    #[error("node is no longer the elected master")]
    NotMaster,

    /// A master task carried a timeout and expired before its batch ran.
    #[error("master task [{0}] timed out before execution")]
    TaskTimeout(String),

    /// Publication of a newly computed cluster state was rejected.
    #[error("cluster state publication failed: {0}")]
    PublicationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("no such index [{0}]")]
    IndexNotFound(String),

    #[error("no such shard [{0}]")]
    ShardNotFound(String),

    #[error("no such node [{0}]")]
    NodeNotFound(String),

    /// A command was syntactically valid but cannot be applied to the current state.
    #[error("Command not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for IoliteError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}
