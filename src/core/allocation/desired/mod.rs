// src/core/allocation/desired/mod.rs

//! Desired-balance allocation: the continuously recomputed target assignment,
//! the reconciler that drives routing toward it, and the facade that ties
//! both to the master task queue.

pub mod allocator;
pub mod balance;
pub mod computer;
pub mod reconciler;

pub use allocator::{DesiredBalanceAllocator, DesiredBalanceStats};
pub use balance::{DesiredBalance, ShardAssignment};
pub use computer::{ContinuousComputation, DesiredBalanceComputer, DesiredBalanceInput};
pub use reconciler::reconcile;
