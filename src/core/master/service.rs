// src/core/master/service.rs

//! The single-consumer master loop: drains submissions in priority-then-FIFO
//! order, batches tasks per queue, publishes at most one new state per batch,
//! and completes every listener exactly once.

use crate::core::cluster::state::ClusterState;
use crate::core::errors::IoliteError;
use crate::core::master::task_queue::{
    ClusterStateTaskExecutor, ErasedQueueExecutor, MasterMessage, MasterTaskQueue, Priority,
    Submission, TypedQueueExecutor,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Publishes a newly produced state to the rest of the cluster. The transport
/// implementation lives outside this crate; tests inject failing publishers.
pub trait ClusterStatePublisher: Send + Sync {
    fn publish(&self, state: &Arc<ClusterState>) -> Result<(), IoliteError>;
}

/// Accepts every publication. The default when no transport is wired in.
pub struct NoopPublisher;

impl ClusterStatePublisher for NoopPublisher {
    fn publish(&self, _state: &Arc<ClusterState>) -> Result<(), IoliteError> {
        Ok(())
    }
}

pub struct MasterService {
    tx: mpsc::UnboundedSender<MasterMessage>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<MasterMessage>>>,
    queues: RwLock<Vec<Arc<dyn ErasedQueueExecutor>>>,
    is_master: Arc<AtomicBool>,
    state_tx: watch::Sender<Arc<ClusterState>>,
    publisher: Arc<dyn ClusterStatePublisher>,
}

impl MasterService {
    /// A freshly created service considers itself elected; callers demote it
    /// with [`Self::step_down`] when leadership is lost.
    pub fn new(
        initial_state: Arc<ClusterState>,
        publisher: Arc<dyn ClusterStatePublisher>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(initial_state);
        Arc::new(Self {
            tx,
            rx: Mutex::new(Some(rx)),
            queues: RwLock::new(Vec::new()),
            is_master: Arc::new(AtomicBool::new(true)),
            state_tx,
            publisher,
        })
    }

    /// Registers a named queue with a fixed priority and batch executor.
    pub fn create_queue<E: ClusterStateTaskExecutor>(
        &self,
        name: &str,
        priority: Priority,
        executor: E,
    ) -> MasterTaskQueue<E::Task> {
        let mut queues = self.queues.write();
        let queue_id = queues.len();
        queues.push(Arc::new(TypedQueueExecutor {
            name: name.to_string(),
            executor,
        }));
        info!("registered master task queue [{name}] with priority [{priority}]");
        MasterTaskQueue {
            queue_id,
            name: name.to_string(),
            priority,
            tx: self.tx.clone(),
            is_master: self.is_master.clone(),
            _marker: PhantomData,
        }
    }

    /// The latest applied state.
    pub fn state(&self) -> Arc<ClusterState> {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Arc<ClusterState>> {
        self.state_tx.subscribe()
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::Acquire)
    }

    /// Leadership lost: reject new submissions immediately and complete every
    /// pending listener with `NotMaster`.
    pub fn step_down(&self) {
        if self.is_master.swap(false, Ordering::AcqRel) {
            warn!("master service stepping down; pending tasks will be failed");
            let _ = self.tx.send(MasterMessage::StepDown);
        }
    }

    pub fn become_master(&self) {
        if !self.is_master.swap(true, Ordering::AcqRel) {
            info!("master service elected");
        }
    }

    /// The single consumer loop. Must be spawned exactly once.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut rx = self
            .rx
            .lock()
            .take()
            .expect("MasterService::run may only be called once");
        // Keyed by (priority rank, arrival seq): iteration order is exactly
        // priority-then-FIFO.
        let mut pending: BTreeMap<(u8, u64), Submission> = BTreeMap::new();
        let mut next_seq: u64 = 0;

        loop {
            let earliest_deadline = pending.values().filter_map(|s| s.deadline).min();
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(msg) => {
                            Self::handle_message(msg, &mut pending, &mut next_seq);
                            while let Ok(msg) = rx.try_recv() {
                                Self::handle_message(msg, &mut pending, &mut next_seq);
                            }
                        }
                        None => return,
                    }
                }
                _ = sleep_until_deadline(earliest_deadline), if earliest_deadline.is_some() => {}
                _ = shutdown_rx.recv() => {
                    // Executor shutdown behaves like master loss for callers.
                    info!("master service shutting down");
                    Self::fail_all(&mut pending);
                    return;
                }
            }

            Self::expire_overdue(&mut pending);
            while !pending.is_empty() {
                self.process_one_batch(&mut pending);
                Self::expire_overdue(&mut pending);
            }
        }
    }

    fn handle_message(
        msg: MasterMessage,
        pending: &mut BTreeMap<(u8, u64), Submission>,
        next_seq: &mut u64,
    ) {
        match msg {
            MasterMessage::Submit(submission) => {
                let key = (submission.priority.rank(), *next_seq);
                *next_seq += 1;
                pending.insert(key, submission);
            }
            MasterMessage::StepDown => Self::fail_all(pending),
        }
    }

    fn fail_all(pending: &mut BTreeMap<(u8, u64), Submission>) {
        for (_, submission) in std::mem::take(pending) {
            let _ = submission.listener.send(Err(IoliteError::NotMaster));
        }
    }

    fn expire_overdue(pending: &mut BTreeMap<(u8, u64), Submission>) {
        let now = Instant::now();
        let overdue: Vec<(u8, u64)> = pending
            .iter()
            .filter(|(_, s)| s.deadline.is_some_and(|d| d <= now))
            .map(|(k, _)| *k)
            .collect();
        for key in overdue {
            if let Some(submission) = pending.remove(&key) {
                warn!(
                    "master task [{}] timed out before execution",
                    submission.source
                );
                let _ = submission
                    .listener
                    .send(Err(IoliteError::TaskTimeout(submission.source)));
            }
        }
    }

    /// Pops the highest-priority submission, gathers every other pending
    /// submission for the same queue into one batch, executes, publishes if
    /// the state changed, then completes listeners and runs commit hooks.
    fn process_one_batch(&self, pending: &mut BTreeMap<(u8, u64), Submission>) {
        let Some((_, first)) = pending.pop_first() else {
            return;
        };
        let queue_id = first.queue_id;
        let batch_keys: Vec<(u8, u64)> = pending
            .iter()
            .filter(|(_, s)| s.queue_id == queue_id)
            .map(|(k, _)| *k)
            .collect();
        let mut batch = vec![first];
        for key in batch_keys {
            if let Some(submission) = pending.remove(&key) {
                batch.push(submission);
            }
        }

        let queue = self.queues.read()[queue_id].clone();
        let current = self.state_tx.borrow().clone();
        debug!(
            "executing batch of [{}] task(s) on queue [{}]",
            batch.len(),
            queue.name()
        );
        let outcome = queue.execute(current.clone(), batch);

        let changed = !Arc::ptr_eq(&outcome.new_state, &current);
        let effective = if changed {
            let mut next = (*outcome.new_state).clone();
            next.version = current.version + 1;
            let next = Arc::new(next);
            match self.publisher.publish(&next) {
                Ok(()) => {
                    debug!(
                        "published cluster state version [{}] from queue [{}]",
                        next.version,
                        queue.name()
                    );
                    self.state_tx.send_replace(next.clone());
                    next
                }
                Err(e) => {
                    // State is not advanced; every task in the batch fails.
                    warn!("publication from queue [{}] failed: {e}", queue.name());
                    for completion in outcome.completions {
                        let _ = completion
                            .listener
                            .send(Err(IoliteError::PublicationFailed(e.to_string())));
                    }
                    return;
                }
            }
        } else {
            current
        };

        for completion in outcome.completions {
            match completion.result {
                Ok(hook) => {
                    if let Some(hook) = hook {
                        hook(&effective);
                    }
                    let _ = completion.listener.send(Ok(effective.clone()));
                }
                Err(e) => {
                    let _ = completion.listener.send(Err(e));
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
