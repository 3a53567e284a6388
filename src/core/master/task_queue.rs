// src/core/master/task_queue.rs

//! Task submission types: priorities, per-task contexts, the batch executor
//! trait, and the typed queue handle returned by
//! [`super::MasterService::create_queue`].

use crate::core::cluster::state::ClusterState;
use crate::core::errors::IoliteError;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use strum_macros::Display;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

/// Task priorities. Dequeue order is priority first, FIFO within a priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Priority {
    Immediate,
    Urgent,
    High,
    Normal,
    Low,
}

impl Priority {
    pub(crate) fn rank(self) -> u8 {
        match self {
            Priority::Immediate => 0,
            Priority::Urgent => 1,
            Priority::High => 2,
            Priority::Normal => 3,
            Priority::Low => 4,
        }
    }
}

/// What a task's listener eventually observes: the applied state, or why the
/// task failed. Exactly one of the two, exactly once.
pub type TaskResult = Result<Arc<ClusterState>, IoliteError>;

/// Commit hooks run after a batch's state has been published (or, for a
/// batch that changed nothing, against the unchanged state).
pub type CommitHook = Box<dyn FnOnce(&Arc<ClusterState>) + Send>;

pub(crate) enum TaskOutcome {
    Success(Option<CommitHook>),
    Failure(IoliteError),
}

/// One task inside a batch. The executor must mark every context either
/// succeeded or failed; unmarked tasks inherit the batch result.
pub struct TaskContext<T> {
    pub task: T,
    source: String,
    outcome: Option<TaskOutcome>,
}

impl<T> TaskContext<T> {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn success(&mut self) {
        self.outcome = Some(TaskOutcome::Success(None));
    }

    pub fn success_with_hook(
        &mut self,
        hook: impl FnOnce(&Arc<ClusterState>) + Send + 'static,
    ) {
        self.outcome = Some(TaskOutcome::Success(Some(Box::new(hook))));
    }

    pub fn failure(&mut self, err: IoliteError) {
        self.outcome = Some(TaskOutcome::Failure(err));
    }

    fn take_outcome(&mut self) -> Option<TaskOutcome> {
        self.outcome.take()
    }
}

/// Batch executor for one queue. Must be deterministic given the same input
/// batch; the master loop may retry a batch after a transient failure.
pub trait ClusterStateTaskExecutor: Send + Sync + 'static {
    type Task: Send + 'static;

    /// Produces the next state from `initial_state` and the batch. Returning
    /// the input `Arc` unchanged (by identity) means nothing is published.
    fn execute(
        &self,
        initial_state: Arc<ClusterState>,
        tasks: &mut [TaskContext<Self::Task>],
    ) -> Result<Arc<ClusterState>, IoliteError>;
}

pub(crate) struct Submission {
    pub queue_id: usize,
    pub priority: Priority,
    pub source: String,
    pub deadline: Option<Instant>,
    pub payload: Box<dyn Any + Send>,
    pub listener: oneshot::Sender<TaskResult>,
}

pub(crate) enum MasterMessage {
    Submit(Submission),
    StepDown,
}

/// A typed handle to one named queue. Cheap to clone and share.
pub struct MasterTaskQueue<T> {
    pub(crate) queue_id: usize,
    pub(crate) name: String,
    pub(crate) priority: Priority,
    pub(crate) tx: mpsc::UnboundedSender<MasterMessage>,
    pub(crate) is_master: Arc<AtomicBool>,
    pub(crate) _marker: PhantomData<fn(T)>,
}

impl<T> Clone for MasterTaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue_id: self.queue_id,
            name: self.name.clone(),
            priority: self.priority,
            tx: self.tx.clone(),
            is_master: self.is_master.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + 'static> MasterTaskQueue<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a task. Success or failure surfaces exclusively on the
    /// returned listener; a node that is not the master fails immediately.
    pub fn submit(
        &self,
        source: impl Into<String>,
        task: T,
        timeout: Option<Duration>,
    ) -> oneshot::Receiver<TaskResult> {
        let (listener, receiver) = oneshot::channel();
        if !self.is_master.load(Ordering::Acquire) {
            let _ = listener.send(Err(IoliteError::NotMaster));
            return receiver;
        }
        let submission = Submission {
            queue_id: self.queue_id,
            priority: self.priority,
            source: source.into(),
            deadline: timeout.map(|t| Instant::now() + t),
            payload: Box::new(task),
            listener,
        };
        if let Err(e) = self.tx.send(MasterMessage::Submit(submission)) {
            if let MasterMessage::Submit(submission) = e.0 {
                let _ = submission.listener.send(Err(IoliteError::NotMaster));
            }
        }
        receiver
    }
}

/// Per-task completion produced by a batch, paired with its listener.
pub(crate) struct Completion {
    pub listener: oneshot::Sender<TaskResult>,
    pub result: Result<Option<CommitHook>, IoliteError>,
}

pub(crate) struct BatchOutcome {
    pub new_state: Arc<ClusterState>,
    pub completions: Vec<Completion>,
}

/// Object-safe wrapper the master loop drives; downcasts payloads back to
/// the executor's task type.
pub(crate) trait ErasedQueueExecutor: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, state: Arc<ClusterState>, batch: Vec<Submission>) -> BatchOutcome;
}

pub(crate) struct TypedQueueExecutor<E: ClusterStateTaskExecutor> {
    pub name: String,
    pub executor: E,
}

impl<E: ClusterStateTaskExecutor> ErasedQueueExecutor for TypedQueueExecutor<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, state: Arc<ClusterState>, batch: Vec<Submission>) -> BatchOutcome {
        let mut contexts = Vec::with_capacity(batch.len());
        let mut listeners = Vec::with_capacity(batch.len());
        for submission in batch {
            match submission.payload.downcast::<E::Task>() {
                Ok(task) => {
                    contexts.push(TaskContext {
                        task: *task,
                        source: submission.source,
                        outcome: None,
                    });
                    listeners.push(submission.listener);
                }
                Err(_) => {
                    error!(
                        "task submitted to queue [{}] has the wrong type; failing it",
                        self.name
                    );
                    let _ = submission.listener.send(Err(IoliteError::Internal(format!(
                        "task type mismatch on queue [{}]",
                        self.name
                    ))));
                }
            }
        }

        let result = self.executor.execute(state.clone(), &mut contexts);
        let (new_state, batch_error) = match result {
            Ok(next) => (next, None),
            Err(e) => {
                error!("executor for queue [{}] failed: {e}", self.name);
                (state, Some(e))
            }
        };

        let completions = contexts
            .into_iter()
            .zip(listeners)
            .map(|(mut ctx, listener)| {
                let result = match ctx.take_outcome() {
                    Some(TaskOutcome::Success(hook)) => Ok(hook),
                    Some(TaskOutcome::Failure(e)) => Err(e),
                    None => match &batch_error {
                        Some(e) => Err(e.clone()),
                        None => Ok(None),
                    },
                };
                Completion { listener, result }
            })
            .collect();

        BatchOutcome {
            new_state,
            completions,
        }
    }
}
