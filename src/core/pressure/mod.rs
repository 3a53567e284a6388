// src/core/pressure/mod.rs

//! Indexing pressure: per-node accounting of in-flight write bytes and
//! operations for the coordinating, primary, and replica roles, with lock-free
//! admission control against a single byte limit. Rejection is immediate;
//! there are no timeouts on this path.

use crate::core::errors::IoliteError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Coordinating,
    Primary,
    Replica,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::Coordinating => "coordinating",
            Role::Primary => "primary",
            Role::Replica => "replica",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    combined_coordinating_and_primary_bytes: AtomicU64,
    coordinating_bytes: AtomicU64,
    primary_bytes: AtomicU64,
    replica_bytes: AtomicU64,

    coordinating_ops: AtomicU64,
    primary_ops: AtomicU64,
    replica_ops: AtomicU64,

    total_coordinating_bytes: AtomicU64,
    total_primary_bytes: AtomicU64,
    total_replica_bytes: AtomicU64,
    total_coordinating_ops: AtomicU64,
    total_primary_ops: AtomicU64,
    total_replica_ops: AtomicU64,

    coordinating_rejections: AtomicU64,
    primary_rejections: AtomicU64,
}

#[derive(Debug)]
struct Inner {
    limit_bytes: u64,
    /// Bumped on demotion; releases stamped with an older generation are
    /// no-ops, so counters stay at zero after a reset.
    generation: AtomicU64,
    counters: Counters,
}

/// Process-wide write admission state. Cheap to clone; all clones share the
/// same counters. Updates are plain atomics; contention is resolved by
/// optimistic compare-exchange loops, never locks.
#[derive(Debug, Clone)]
pub struct IndexingPressure {
    inner: Arc<Inner>,
}

impl IndexingPressure {
    pub fn new(limit_bytes: u64) -> Self {
        info!("indexing pressure limit set to {limit_bytes} bytes");
        Self {
            inner: Arc::new(Inner {
                limit_bytes,
                generation: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Read-then-increment admission under a single compare-exchange: the
    /// combined counter never exceeds the limit after a successful mark.
    fn try_admit_combined(&self, bytes: u64) -> Result<(), u64> {
        let counters = &self.inner.counters;
        let mut current = counters
            .combined_coordinating_and_primary_bytes
            .load(Ordering::Acquire);
        loop {
            if current.saturating_add(bytes) > self.inner.limit_bytes {
                return Err(current);
            }
            match counters.combined_coordinating_and_primary_bytes.compare_exchange(
                current,
                current + bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Admits coordinating-role work, or rejects when the combined
    /// coordinating + primary bytes would exceed the limit.
    pub fn mark_coordinating(&self, bytes: u64, ops: u64) -> Result<Releasable, IoliteError> {
        let counters = &self.inner.counters;
        if let Err(current) = self.try_admit_combined(bytes) {
            counters.coordinating_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(
                "rejecting coordinating operation of {bytes} bytes (current {current}, limit {})",
                self.inner.limit_bytes
            );
            return Err(IoliteError::RejectedExecution {
                role: Role::Coordinating.label(),
                attempted_bytes: bytes,
                current_bytes: current,
                limit_bytes: self.inner.limit_bytes,
            });
        }
        counters.coordinating_bytes.fetch_add(bytes, Ordering::AcqRel);
        counters.coordinating_ops.fetch_add(ops, Ordering::AcqRel);
        counters
            .total_coordinating_bytes
            .fetch_add(bytes, Ordering::Relaxed);
        counters
            .total_coordinating_ops
            .fetch_add(ops, Ordering::Relaxed);
        Ok(Releasable::new(self.clone(), Role::Coordinating, bytes, ops))
    }

    /// Admits primary-role work with the same combined-counter semantics.
    /// A rejection here fails only the affected per-item work; the rest of a
    /// bulk can still succeed.
    pub fn mark_primary(&self, bytes: u64, ops: u64) -> Result<Releasable, IoliteError> {
        let counters = &self.inner.counters;
        if let Err(current) = self.try_admit_combined(bytes) {
            counters.primary_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(
                "rejecting primary operation of {bytes} bytes (current {current}, limit {})",
                self.inner.limit_bytes
            );
            return Err(IoliteError::RejectedExecution {
                role: Role::Primary.label(),
                attempted_bytes: bytes,
                current_bytes: current,
                limit_bytes: self.inner.limit_bytes,
            });
        }
        counters.primary_bytes.fetch_add(bytes, Ordering::AcqRel);
        counters.primary_ops.fetch_add(ops, Ordering::AcqRel);
        counters
            .total_primary_bytes
            .fetch_add(bytes, Ordering::Relaxed);
        counters.total_primary_ops.fetch_add(ops, Ordering::Relaxed);
        Ok(Releasable::new(self.clone(), Role::Primary, bytes, ops))
    }

    /// Replica-role work is always accounted and never rejected: replicas
    /// must keep up with writes their primaries already accepted.
    pub fn mark_replica(&self, bytes: u64, ops: u64) -> Releasable {
        let counters = &self.inner.counters;
        counters.replica_bytes.fetch_add(bytes, Ordering::AcqRel);
        counters.replica_ops.fetch_add(ops, Ordering::AcqRel);
        counters
            .total_replica_bytes
            .fetch_add(bytes, Ordering::Relaxed);
        counters.total_replica_ops.fetch_add(ops, Ordering::Relaxed);
        Releasable::new(self.clone(), Role::Replica, bytes, ops)
    }

    /// Master loss: abandon outstanding releases and zero the counters. Any
    /// release from before the reset becomes a no-op.
    pub fn reset(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        let counters = &self.inner.counters;
        counters
            .combined_coordinating_and_primary_bytes
            .store(0, Ordering::Release);
        counters.coordinating_bytes.store(0, Ordering::Release);
        counters.primary_bytes.store(0, Ordering::Release);
        counters.replica_bytes.store(0, Ordering::Release);
        counters.coordinating_ops.store(0, Ordering::Release);
        counters.primary_ops.store(0, Ordering::Release);
        counters.replica_ops.store(0, Ordering::Release);
    }

    fn release(&self, role: Role, bytes: u64, ops: u64) {
        let counters = &self.inner.counters;
        match role {
            Role::Coordinating => {
                counters
                    .combined_coordinating_and_primary_bytes
                    .fetch_sub(bytes, Ordering::AcqRel);
                counters.coordinating_bytes.fetch_sub(bytes, Ordering::AcqRel);
                counters.coordinating_ops.fetch_sub(ops, Ordering::AcqRel);
            }
            Role::Primary => {
                counters
                    .combined_coordinating_and_primary_bytes
                    .fetch_sub(bytes, Ordering::AcqRel);
                counters.primary_bytes.fetch_sub(bytes, Ordering::AcqRel);
                counters.primary_ops.fetch_sub(ops, Ordering::AcqRel);
            }
            Role::Replica => {
                counters.replica_bytes.fetch_sub(bytes, Ordering::AcqRel);
                counters.replica_ops.fetch_sub(ops, Ordering::AcqRel);
            }
        }
    }

    pub fn limit_bytes(&self) -> u64 {
        self.inner.limit_bytes
    }

    pub fn get_current_combined_bytes(&self) -> u64 {
        self.inner
            .counters
            .combined_coordinating_and_primary_bytes
            .load(Ordering::Acquire)
    }

    pub fn get_current_coordinating_bytes(&self) -> u64 {
        self.inner.counters.coordinating_bytes.load(Ordering::Acquire)
    }

    pub fn get_current_primary_bytes(&self) -> u64 {
        self.inner.counters.primary_bytes.load(Ordering::Acquire)
    }

    pub fn get_current_replica_bytes(&self) -> u64 {
        self.inner.counters.replica_bytes.load(Ordering::Acquire)
    }

    pub fn get_current_coordinating_ops(&self) -> u64 {
        self.inner.counters.coordinating_ops.load(Ordering::Acquire)
    }

    pub fn get_current_primary_ops(&self) -> u64 {
        self.inner.counters.primary_ops.load(Ordering::Acquire)
    }

    pub fn get_current_replica_ops(&self) -> u64 {
        self.inner.counters.replica_ops.load(Ordering::Acquire)
    }

    pub fn get_total_coordinating_bytes(&self) -> u64 {
        self.inner
            .counters
            .total_coordinating_bytes
            .load(Ordering::Relaxed)
    }

    pub fn get_total_primary_bytes(&self) -> u64 {
        self.inner.counters.total_primary_bytes.load(Ordering::Relaxed)
    }

    pub fn get_total_replica_bytes(&self) -> u64 {
        self.inner.counters.total_replica_bytes.load(Ordering::Relaxed)
    }

    pub fn get_coordinating_rejections(&self) -> u64 {
        self.inner
            .counters
            .coordinating_rejections
            .load(Ordering::Relaxed)
    }

    pub fn get_primary_rejections(&self) -> u64 {
        self.inner.counters.primary_rejections.load(Ordering::Relaxed)
    }
}

/// Scoped release for one admitted mark. Idempotent: explicit [`release`]
/// and the `Drop` safety net decrement the counters exactly once between
/// them, and a release outlives a [`IndexingPressure::reset`] as a no-op.
///
/// [`release`]: Releasable::release
#[derive(Debug)]
pub struct Releasable {
    pressure: IndexingPressure,
    role: Role,
    bytes: u64,
    ops: u64,
    generation: u64,
    released: AtomicBool,
}

impl Releasable {
    fn new(pressure: IndexingPressure, role: Role, bytes: u64, ops: u64) -> Self {
        let generation = pressure.inner.generation.load(Ordering::Acquire);
        Self {
            pressure,
            role,
            bytes,
            ops,
            generation,
            released: AtomicBool::new(false),
        }
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.generation != self.pressure.inner.generation.load(Ordering::Acquire) {
            return;
        }
        self.pressure.release(self.role, self.bytes, self.ops);
    }
}

impl Drop for Releasable {
    fn drop(&mut self) {
        self.release();
    }
}
