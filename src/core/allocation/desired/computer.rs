// src/core/allocation/desired/computer.rs

//! The continuous desired-balance computation: a single background worker
//! that always consumes the latest submitted input, discards older ones, and
//! abandons an in-flight computation as soon as a newer input arrives.

use crate::config::AllocationConfig;
use crate::core::allocation::balancer::{Balancer, WeightFunction};
use crate::core::allocation::commands::AllocationCommand;
use crate::core::allocation::deciders::AllocationDeciders;
use crate::core::allocation::desired::balance::{DesiredBalance, ShardAssignment};
use crate::core::allocation::ordering::NodeAllocationOrdering;
use crate::core::allocation::routing_allocation::RoutingAllocation;
use crate::core::cluster::info::ClusterInfo;
use crate::core::cluster::state::ClusterState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One submission to the computer. `index` is monotonic; a higher index
/// always supersedes a lower one.
#[derive(Clone)]
pub struct DesiredBalanceInput {
    pub index: u64,
    pub cluster_state: Arc<ClusterState>,
    pub cluster_info: Arc<ClusterInfo>,
    pub pending_commands: Vec<AllocationCommand>,
}

pub enum ComputationOutcome {
    /// A full pass changed nothing.
    Converged(DesiredBalance),
    /// The iteration budget ran out; the partial result is still published.
    BudgetExhausted(DesiredBalance),
    /// The staleness predicate fired; the result is discarded.
    Stale,
}

#[derive(Debug, Default)]
pub struct ComputationStats {
    pub submitted: AtomicU64,
    pub executed: AtomicU64,
    pub converged: AtomicU64,
    pub iterations: AtomicU64,
    pub computation_time_ms: AtomicU64,
}

/// Pure computation: given the previous balance and one input, simulate the
/// balancer to a fixed point (or until the budget or staleness stops it).
pub struct DesiredBalanceComputer {
    deciders: Arc<AllocationDeciders>,
    config: Arc<AllocationConfig>,
    ordering: Arc<NodeAllocationOrdering>,
}

impl DesiredBalanceComputer {
    pub fn new(
        deciders: Arc<AllocationDeciders>,
        config: Arc<AllocationConfig>,
        ordering: Arc<NodeAllocationOrdering>,
    ) -> Self {
        Self {
            deciders,
            config,
            ordering,
        }
    }

    pub fn compute(
        &self,
        previous: &DesiredBalance,
        input: &DesiredBalanceInput,
        is_fresh: &mut dyn FnMut() -> bool,
    ) -> (ComputationOutcome, u64) {
        let mut allocation = RoutingAllocation::new(
            self.deciders.clone(),
            self.config.clone(),
            &input.cluster_state,
            input.cluster_info.clone(),
            self.ordering.clone(),
        );
        let balancer = Balancer::new(WeightFunction::new(&self.config.balancer));

        balancer.apply_command_hints(&mut allocation, &input.pending_commands);
        self.warm_start(&mut allocation, previous);

        let max_iterations = u64::from(self.config.balancer.max_iterations);
        let mut iterations = 0;
        loop {
            allocation.reclaim_ignored();
            let allocated = balancer.allocate_unassigned(&mut allocation);
            let moved = balancer.move_shards(&mut allocation);
            let rebalanced = balancer.rebalance(&mut allocation);
            balancer.start_initializing(&mut allocation);
            iterations += 1;

            if !(allocated || moved || rebalanced) {
                debug!(
                    "desired balance for input [{}] converged after [{iterations}] iterations",
                    input.index
                );
                return (
                    ComputationOutcome::Converged(Self::extract(&allocation, input.index)),
                    iterations,
                );
            }
            if iterations >= max_iterations {
                warn!(
                    "desired balance computation for input [{}] exhausted its budget of \
                     [{max_iterations}] iterations; publishing the partial result",
                    input.index
                );
                return (
                    ComputationOutcome::BudgetExhausted(Self::extract(&allocation, input.index)),
                    iterations,
                );
            }
            if !is_fresh() {
                debug!(
                    "desired balance computation for input [{}] abandoned after \
                     [{iterations}] iterations; a newer input is queued",
                    input.index
                );
                return (ComputationOutcome::Stale, iterations);
            }
        }
    }

    /// Re-applies the previous balance as a starting point so an unchanged
    /// cluster converges immediately instead of being re-balanced from
    /// scratch.
    fn warm_start(&self, allocation: &mut RoutingAllocation, previous: &DesiredBalance) {
        if previous.is_sentinel() {
            return;
        }
        let unassigned = allocation.drain_unassigned();
        for shard in unassigned {
            if !shard.primary && allocation.active_primary(&shard.shard_id).is_none() {
                allocation.push_unassigned(shard);
                continue;
            }
            let desired = previous
                .assignment(&shard.shard_id)
                .map(|a| a.nodes.clone())
                .unwrap_or_default();
            let deciders = allocation.deciders();
            let chosen = desired.into_iter().find(|node_id| {
                allocation
                    .routing_nodes()
                    .node(node_id)
                    .is_some_and(|node| deciders.can_allocate(&shard, node, allocation).is_yes())
            });
            match chosen {
                Some(node_id) => {
                    allocation.assign_shard(&shard, &node_id);
                }
                None => allocation.push_unassigned(shard),
            }
        }
    }

    /// Reads the converged simulation back out as a balance. At this point
    /// every copy is either started or parked unassigned/ignored.
    fn extract(allocation: &RoutingAllocation, index: u64) -> DesiredBalance {
        let mut balance = DesiredBalance {
            last_converged_index: index,
            assignments: Default::default(),
        };
        for node in allocation.routing_nodes().nodes() {
            for routing in node.iter() {
                if routing.is_relocation_target() {
                    continue;
                }
                let assignment = balance
                    .assignments
                    .entry(routing.shard_id.clone())
                    .or_insert_with(ShardAssignment::default);
                assignment.nodes.insert(node.node_id.clone());
                assignment.total += 1;
            }
        }
        for routing in allocation
            .routing_nodes()
            .unassigned()
            .iter()
            .chain(allocation.routing_nodes().ignored())
        {
            let assignment = balance
                .assignments
                .entry(routing.shard_id.clone())
                .or_insert_with(ShardAssignment::default);
            assignment.total += 1;
            if routing.primary {
                assignment.ignored_primaries += 1;
            } else {
                assignment.ignored_replicas += 1;
            }
        }
        balance
    }
}

/// Keeps a single computation worker alive across inputs. Submitting a new
/// input replaces any queued one; the worker picks up whatever is newest when
/// it finishes (or abandons) the current computation.
pub struct ContinuousComputation {
    computer: Arc<DesiredBalanceComputer>,
    queued: Arc<Mutex<Option<DesiredBalanceInput>>>,
    active: Arc<AtomicBool>,
    /// Bumped by [`Self::reset`]; a computation started under an older
    /// generation publishes nothing.
    generation: Arc<AtomicU64>,
    balance_tx: Arc<watch::Sender<Arc<DesiredBalance>>>,
    stats: Arc<ComputationStats>,
}

impl ContinuousComputation {
    pub fn new(computer: Arc<DesiredBalanceComputer>) -> Self {
        let (balance_tx, _) = watch::channel(Arc::new(DesiredBalance::sentinel()));
        Self {
            computer,
            queued: Arc::new(Mutex::new(None)),
            active: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            balance_tx: Arc::new(balance_tx),
            stats: Arc::new(ComputationStats::default()),
        }
    }

    /// The last successfully computed balance; initially the sentinel.
    pub fn current_desired_balance(&self) -> Arc<DesiredBalance> {
        self.balance_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DesiredBalance>> {
        self.balance_tx.subscribe()
    }

    /// True while a worker is computing.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &ComputationStats {
        &self.stats
    }

    /// Replaces any queued input with this one and makes sure a worker is
    /// running. Returns immediately.
    pub fn on_new_input(&self, input: DesiredBalanceInput) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        *self.queued.lock() = Some(input);
        if !self.active.swap(true, Ordering::AcqRel) {
            self.spawn_worker();
        }
    }

    /// Master loss: discard queued work and fall back to the sentinel balance.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.queued.lock() = None;
        self.balance_tx
            .send_replace(Arc::new(DesiredBalance::sentinel()));
        info!("desired balance reset to sentinel");
    }

    fn spawn_worker(&self) {
        let computer = self.computer.clone();
        let queued = self.queued.clone();
        let active = self.active.clone();
        let generation = self.generation.clone();
        let balance_tx = self.balance_tx.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            loop {
                let input = queued.lock().take();
                let Some(input) = input else {
                    active.store(false, Ordering::Release);
                    // Re-check for an input that slipped in before the store.
                    if queued.lock().is_some() && !active.swap(true, Ordering::AcqRel) {
                        continue;
                    }
                    return;
                };

                stats.executed.fetch_add(1, Ordering::Relaxed);
                let started_generation = generation.load(Ordering::Acquire);
                let previous = balance_tx.borrow().clone();
                let started = Instant::now();
                let mut fresh = || queued.lock().is_none();
                let (outcome, iterations) = computer.compute(&previous, &input, &mut fresh);
                stats.iterations.fetch_add(iterations, Ordering::Relaxed);
                stats.computation_time_ms.fetch_add(
                    started.elapsed().as_millis() as u64,
                    Ordering::Relaxed,
                );

                if generation.load(Ordering::Acquire) != started_generation {
                    // A reset happened mid-computation; the result belongs to
                    // the previous mastership and is discarded.
                    continue;
                }
                match outcome {
                    ComputationOutcome::Converged(balance) => {
                        stats.converged.fetch_add(1, Ordering::Relaxed);
                        balance_tx.send_replace(Arc::new(balance));
                    }
                    ComputationOutcome::BudgetExhausted(balance) => {
                        balance_tx.send_replace(Arc::new(balance));
                    }
                    ComputationOutcome::Stale => {}
                }

                // Let other tasks run between computations.
                tokio::task::yield_now().await;
            }
        });
    }
}
