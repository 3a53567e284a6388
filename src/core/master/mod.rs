// src/core/master/mod.rs

//! The master task queue: the sole writer of cluster state. Every mutation is
//! submitted as a task on a named, priority-ordered queue and executed by a
//! single consumer loop that batches tasks per queue and publishes at most
//! one new state per batch.

pub mod service;
pub mod task_queue;

pub use service::{ClusterStatePublisher, MasterService, NoopPublisher};
pub use task_queue::{
    ClusterStateTaskExecutor, MasterTaskQueue, Priority, TaskContext, TaskResult,
};
