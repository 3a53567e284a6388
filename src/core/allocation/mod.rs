// src/core/allocation/mod.rs

//! Shard allocation: the decider chain, the per-round allocation context,
//! the weight-based balancer, and the desired-balance machinery built on top.

pub mod balancer;
pub mod commands;
pub mod deciders;
pub mod desired;
pub mod ordering;
pub mod routing_allocation;

pub use commands::AllocationCommand;
pub use ordering::NodeAllocationOrdering;
pub use routing_allocation::RoutingAllocation;
