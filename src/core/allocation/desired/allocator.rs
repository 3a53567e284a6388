// src/core/allocation/desired/allocator.rs

//! The desired-balance allocator facade: submits allocation rounds to the
//! continuous computation, turns published balances into reconcile tasks on
//! the master queue, and completes waiting callers once a reconciliation at
//! or past their submitted index has been applied.

use crate::config::AllocationConfig;
use crate::core::allocation::commands::AllocationCommand;
use crate::core::allocation::deciders::AllocationDeciders;
use crate::core::allocation::desired::balance::DesiredBalance;
use crate::core::allocation::desired::computer::{
    ContinuousComputation, DesiredBalanceComputer, DesiredBalanceInput,
};
use crate::core::allocation::desired::reconciler::reconcile;
use crate::core::allocation::ordering::NodeAllocationOrdering;
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::cluster::info_service::ClusterInfoService;
use crate::core::cluster::state::ClusterState;
use crate::core::errors::IoliteError;
use crate::core::master::service::MasterService;
use crate::core::master::task_queue::{
    ClusterStateTaskExecutor, MasterTaskQueue, Priority, TaskContext,
};
use crate::core::metadata::NodeId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};

/// Counters exposed for monitoring, one snapshot per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DesiredBalanceStats {
    pub last_converged_index: u64,
    pub computation_active: bool,
    pub computations_submitted: u64,
    pub computations_executed: u64,
    pub computations_converged: u64,
    pub computed_shard_movements: u64,
    pub reconciliations_executed: u64,
    pub cumulative_computation_ms: u64,
    pub cumulative_reconciliation_ms: u64,
}

/// The task carried on the reconcile queue: one published balance.
pub struct ReconcileTask {
    pub balance: Arc<DesiredBalance>,
}

struct AllocatorInner {
    computation: ContinuousComputation,
    deciders: Arc<AllocationDeciders>,
    config: Arc<AllocationConfig>,
    ordering: Arc<NodeAllocationOrdering>,
    info: Arc<ClusterInfoService>,
    next_input_index: AtomicU64,
    /// Waiters keyed by the input index they submitted; completed once a
    /// reconciliation with `last_converged_index >= key` is applied.
    pending: Mutex<BTreeMap<u64, Vec<oneshot::Sender<Result<u64, IoliteError>>>>>,
    last_reconciled_index: AtomicU64,
    reconciliations_executed: AtomicU64,
    cumulative_reconciliation_ms: AtomicU64,
    command_hints: Mutex<Vec<AllocationCommand>>,
    /// Data nodes seen by the previous round, for detecting departures.
    known_nodes: Mutex<BTreeSet<NodeId>>,
}

impl AllocatorInner {
    /// Drops round-robin ordering records for nodes that left the cluster
    /// since the previous round.
    fn prune_departed_nodes(&self, state: &ClusterState) {
        let current: BTreeSet<NodeId> = state.nodes.data_node_ids().cloned().collect();
        let mut known = self.known_nodes.lock();
        for departed in known.difference(&current) {
            self.ordering.on_node_removed(departed);
        }
        *known = current;
    }

    fn complete_pending_up_to(&self, index: u64) {
        let mut pending = self.pending.lock();
        let keep = pending.split_off(&(index + 1));
        let done = std::mem::replace(&mut *pending, keep);
        drop(pending);
        for (_, listeners) in done {
            for listener in listeners {
                let _ = listener.send(Ok(index));
            }
        }
    }
}

pub struct DesiredBalanceAllocator {
    inner: Arc<AllocatorInner>,
    reconcile_queue: MasterTaskQueue<ReconcileTask>,
}

impl DesiredBalanceAllocator {
    pub fn new(
        deciders: Arc<AllocationDeciders>,
        config: Arc<AllocationConfig>,
        info: Arc<ClusterInfoService>,
        master: &MasterService,
    ) -> Arc<Self> {
        let ordering = Arc::new(NodeAllocationOrdering::default());
        let computer = Arc::new(DesiredBalanceComputer::new(
            deciders.clone(),
            config.clone(),
            ordering.clone(),
        ));
        let inner = Arc::new(AllocatorInner {
            computation: ContinuousComputation::new(computer),
            deciders,
            config,
            ordering,
            info,
            next_input_index: AtomicU64::new(0),
            pending: Mutex::new(BTreeMap::new()),
            last_reconciled_index: AtomicU64::new(0),
            reconciliations_executed: AtomicU64::new(0),
            cumulative_reconciliation_ms: AtomicU64::new(0),
            command_hints: Mutex::new(Vec::new()),
            known_nodes: Mutex::new(BTreeSet::new()),
        });
        let reconcile_queue = master.create_queue(
            "reconcile-desired-balance",
            Priority::Urgent,
            ReconcileExecutor {
                inner: inner.clone(),
            },
        );
        Arc::new(Self {
            inner,
            reconcile_queue,
        })
    }

    pub fn desired_balance(&self) -> Arc<DesiredBalance> {
        self.inner.computation.current_desired_balance()
    }

    /// The shared round-robin allocation ordering, consulted by both the
    /// computer and the reconciler.
    pub fn ordering(&self) -> Arc<NodeAllocationOrdering> {
        self.inner.ordering.clone()
    }

    /// Submits a fresh allocation round for `state`. The returned listener
    /// fires once a reconciliation with a converged index at or past this
    /// round's index has been applied.
    pub fn submit(
        &self,
        state: Arc<ClusterState>,
    ) -> oneshot::Receiver<Result<u64, IoliteError>> {
        self.inner.prune_departed_nodes(&state);
        let index = self.inner.next_input_index.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().entry(index).or_default().push(tx);
        let input = DesiredBalanceInput {
            index,
            cluster_state: state,
            cluster_info: self.inner.info.cluster_info(),
            pending_commands: self.inner.command_hints.lock().clone(),
        };
        self.inner.computation.on_new_input(input);
        rx
    }

    /// Validates admin commands against `state` and folds the accepted ones
    /// into the next computation as hints.
    pub fn execute_commands(
        &self,
        commands: Vec<AllocationCommand>,
        state: &Arc<ClusterState>,
    ) -> Result<oneshot::Receiver<Result<u64, IoliteError>>, IoliteError> {
        for command in &commands {
            command.validate(state)?;
        }
        info!("accepted [{}] allocation command(s)", commands.len());
        self.inner.command_hints.lock().extend(commands);
        Ok(self.submit(state.clone()))
    }

    /// Master loss: back to the sentinel balance, every waiter fails.
    pub fn on_demoted(&self) {
        self.inner.computation.reset();
        self.inner.command_hints.lock().clear();
        let pending = std::mem::take(&mut *self.inner.pending.lock());
        for (_, listeners) in pending {
            for listener in listeners {
                let _ = listener.send(Err(IoliteError::NotMaster));
            }
        }
    }

    pub fn stats(&self) -> DesiredBalanceStats {
        let stats = self.inner.computation.stats();
        DesiredBalanceStats {
            last_converged_index: self
                .inner
                .computation
                .current_desired_balance()
                .last_converged_index,
            computation_active: self.inner.computation.is_active(),
            computations_submitted: stats.submitted.load(Ordering::Relaxed),
            computations_executed: stats.executed.load(Ordering::Relaxed),
            computations_converged: stats.converged.load(Ordering::Relaxed),
            computed_shard_movements: stats.iterations.load(Ordering::Relaxed),
            reconciliations_executed: self
                .inner
                .reconciliations_executed
                .load(Ordering::Relaxed),
            cumulative_computation_ms: stats.computation_time_ms.load(Ordering::Relaxed),
            cumulative_reconciliation_ms: self
                .inner
                .cumulative_reconciliation_ms
                .load(Ordering::Relaxed),
        }
    }

    /// Forwards every newly published balance to the reconcile queue. Spawned
    /// once by the server.
    pub async fn run_reconciliations(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut balance_rx = self.inner.computation.subscribe();
        loop {
            tokio::select! {
                changed = balance_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let balance = balance_rx.borrow_and_update().clone();
                    if balance.is_sentinel() {
                        continue;
                    }
                    debug!(
                        "submitting reconcile task for balance index [{}]",
                        balance.last_converged_index
                    );
                    // Completion is observed through the pending-listener
                    // queue, not this per-task listener.
                    let _ = self
                        .reconcile_queue
                        .submit("desired-balance-changed", ReconcileTask { balance }, None);
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    }
}

/// Batch executor for the reconcile queue. Coalesces: only the batch's
/// greatest converged index is reconciled; the rest are acknowledged as
/// superseded with no-op commit hooks.
struct ReconcileExecutor {
    inner: Arc<AllocatorInner>,
}

impl ClusterStateTaskExecutor for ReconcileExecutor {
    type Task = ReconcileTask;

    fn execute(
        &self,
        initial_state: Arc<ClusterState>,
        tasks: &mut [TaskContext<Self::Task>],
    ) -> Result<Arc<ClusterState>, IoliteError> {
        let Some(best_pos) = tasks
            .iter()
            .enumerate()
            .max_by_key(|(_, t)| t.task.balance.last_converged_index)
            .map(|(i, _)| i)
        else {
            return Ok(initial_state);
        };
        let best_index = tasks[best_pos].task.balance.last_converged_index;
        let last_applied = self.inner.last_reconciled_index.load(Ordering::Acquire);

        // An already-applied (or older) balance never regresses the state.
        if best_index < last_applied {
            for ctx in tasks.iter_mut() {
                ctx.success_with_hook(|_| {});
            }
            return Ok(initial_state);
        }

        let balance = tasks[best_pos].task.balance.clone();
        let started = Instant::now();
        let mut allocation = RoutingAllocation::new(
            self.inner.deciders.clone(),
            self.inner.config.clone(),
            &initial_state,
            self.inner.info.cluster_info(),
            self.inner.ordering.clone(),
        );
        reconcile(&balance, &mut allocation);
        self.inner
            .reconciliations_executed
            .fetch_add(1, Ordering::Relaxed);
        self.inner
            .cumulative_reconciliation_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);

        let new_state = if allocation.changes().is_empty() {
            initial_state.clone()
        } else {
            let table = allocation.build_routing_table(&initial_state.routing_table);
            if table == initial_state.routing_table {
                initial_state.clone()
            } else {
                initial_state.with_routing_table(table)
            }
        };

        let inner = self.inner.clone();
        for (pos, ctx) in tasks.iter_mut().enumerate() {
            if pos == best_pos {
                let inner = inner.clone();
                ctx.success_with_hook(move |_applied| {
                    inner
                        .last_reconciled_index
                        .fetch_max(best_index, Ordering::AcqRel);
                    inner.complete_pending_up_to(best_index);
                });
            } else {
                // Superseded by a newer balance in the same batch.
                ctx.success_with_hook(|_| {});
            }
        }
        Ok(new_state)
    }
}
