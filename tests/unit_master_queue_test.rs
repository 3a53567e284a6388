use iolitedb::core::IoliteError;
use iolitedb::core::cluster::state::ClusterState;
use iolitedb::core::cluster::state_tasks::{ClusterStateUpdateExecutor, ClusterStateUpdateTask};
use iolitedb::core::master::service::{ClusterStatePublisher, MasterService, NoopPublisher};
use iolitedb::core::master::task_queue::{ClusterStateTaskExecutor, Priority, TaskContext};
use iolitedb::core::metadata::IndexMetadata;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Records every executed task name plus the batch sizes it saw.
struct RecordingExecutor {
    log: Arc<Mutex<Vec<String>>>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl ClusterStateTaskExecutor for RecordingExecutor {
    type Task = String;

    fn execute(
        &self,
        initial_state: Arc<ClusterState>,
        tasks: &mut [TaskContext<Self::Task>],
    ) -> Result<Arc<ClusterState>, IoliteError> {
        self.batch_sizes.lock().push(tasks.len());
        for ctx in tasks.iter_mut() {
            self.log.lock().push(ctx.task.clone());
            ctx.success();
        }
        Ok(initial_state)
    }
}

struct RejectingPublisher;

impl ClusterStatePublisher for RejectingPublisher {
    fn publish(&self, _state: &Arc<ClusterState>) -> Result<(), IoliteError> {
        Err(IoliteError::PublicationFailed("transport refused".to_string()))
    }
}

fn empty_state() -> Arc<ClusterState> {
    Arc::new(ClusterState::default())
}

fn spawn_master(master: &Arc<MasterService>) -> broadcast::Sender<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(master.clone().run(shutdown_rx));
    shutdown_tx
}

#[tokio::test]
async fn test_priority_order_beats_submission_order() {
    let master = MasterService::new(empty_state(), Arc::new(NoopPublisher));
    let log = Arc::new(Mutex::new(Vec::new()));
    let batch_sizes = Arc::new(Mutex::new(Vec::new()));
    let low = master.create_queue(
        "low",
        Priority::Low,
        RecordingExecutor {
            log: log.clone(),
            batch_sizes: batch_sizes.clone(),
        },
    );
    let urgent = master.create_queue(
        "urgent",
        Priority::Urgent,
        RecordingExecutor {
            log: log.clone(),
            batch_sizes: batch_sizes.clone(),
        },
    );

    // Enqueue before the loop starts so both are pending in the same drain.
    let low_rx = low.submit("low-task", "low".to_string(), None);
    let urgent_rx = urgent.submit("urgent-task", "urgent".to_string(), None);
    let _shutdown = spawn_master(&master);

    low_rx.await.unwrap().unwrap();
    urgent_rx.await.unwrap().unwrap();
    assert_eq!(*log.lock(), vec!["urgent".to_string(), "low".to_string()]);
}

#[tokio::test]
async fn test_same_queue_tasks_run_as_one_batch() {
    let master = MasterService::new(empty_state(), Arc::new(NoopPublisher));
    let log = Arc::new(Mutex::new(Vec::new()));
    let batch_sizes = Arc::new(Mutex::new(Vec::new()));
    let queue = master.create_queue(
        "batched",
        Priority::Normal,
        RecordingExecutor {
            log: log.clone(),
            batch_sizes: batch_sizes.clone(),
        },
    );

    let rx1 = queue.submit("first", "a".to_string(), None);
    let rx2 = queue.submit("second", "b".to_string(), None);
    let _shutdown = spawn_master(&master);

    rx1.await.unwrap().unwrap();
    rx2.await.unwrap().unwrap();
    assert_eq!(*batch_sizes.lock(), vec![2]);
    // FIFO within the batch.
    assert_eq!(*log.lock(), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_identity_state_is_not_republished() {
    let master = MasterService::new(empty_state(), Arc::new(NoopPublisher));
    let log = Arc::new(Mutex::new(Vec::new()));
    let batch_sizes = Arc::new(Mutex::new(Vec::new()));
    let queue = master.create_queue(
        "noop",
        Priority::Normal,
        RecordingExecutor {
            log,
            batch_sizes,
        },
    );
    let _shutdown = spawn_master(&master);

    let applied = queue
        .submit("noop-task", "x".to_string(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(applied.version, 0);
    assert_eq!(master.state().version, 0);
}

#[tokio::test]
async fn test_state_mutations_bump_version_and_batch_failures_are_per_task() {
    let master = MasterService::new(empty_state(), Arc::new(NoopPublisher));
    let queue = master.create_queue("updates", Priority::Normal, ClusterStateUpdateExecutor);

    // Both tasks land in one batch; the duplicate fails on its own listener
    // while the batch still applies the first.
    let rx1 = queue.submit(
        "create-index",
        ClusterStateUpdateTask::CreateIndex {
            metadata: IndexMetadata::new("logs", 1, 0),
        },
        None,
    );
    let rx2 = queue.submit(
        "create-index",
        ClusterStateUpdateTask::CreateIndex {
            metadata: IndexMetadata::new("logs", 1, 0),
        },
        None,
    );
    let _shutdown = spawn_master(&master);

    let applied = rx1.await.unwrap().unwrap();
    assert_eq!(applied.version, 1);
    assert!(applied.metadata.index("logs").is_some());
    assert!(matches!(
        rx2.await.unwrap(),
        Err(IoliteError::InvalidState(_))
    ));
    assert_eq!(master.state().version, 1);
}

#[tokio::test]
async fn test_publication_failure_leaves_state_unchanged() {
    let master = MasterService::new(empty_state(), Arc::new(RejectingPublisher));
    let queue = master.create_queue("updates", Priority::Normal, ClusterStateUpdateExecutor);
    let _shutdown = spawn_master(&master);

    let result = queue
        .submit(
            "create-index",
            ClusterStateUpdateTask::CreateIndex {
                metadata: IndexMetadata::new("logs", 1, 0),
            },
            None,
        )
        .await
        .unwrap();
    assert!(matches!(result, Err(IoliteError::PublicationFailed(_))));
    assert_eq!(master.state().version, 0);
    assert!(master.state().metadata.index("logs").is_none());
}

#[tokio::test]
async fn test_task_timeout_fails_listener_without_mutation() {
    let master = MasterService::new(empty_state(), Arc::new(NoopPublisher));
    let queue = master.create_queue("updates", Priority::Normal, ClusterStateUpdateExecutor);

    let rx = queue.submit(
        "create-index",
        ClusterStateUpdateTask::CreateIndex {
            metadata: IndexMetadata::new("logs", 1, 0),
        },
        Some(Duration::from_millis(10)),
    );
    // Let the deadline pass before the loop ever runs.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _shutdown = spawn_master(&master);

    assert!(matches!(
        rx.await.unwrap(),
        Err(IoliteError::TaskTimeout(_))
    ));
    assert_eq!(master.state().version, 0);
}

#[tokio::test]
async fn test_step_down_fails_pending_and_rejects_new_submissions() {
    let master = MasterService::new(empty_state(), Arc::new(NoopPublisher));
    let log = Arc::new(Mutex::new(Vec::new()));
    let batch_sizes = Arc::new(Mutex::new(Vec::new()));
    let queue = master.create_queue(
        "work",
        Priority::Normal,
        RecordingExecutor {
            log: log.clone(),
            batch_sizes,
        },
    );

    // Pending before the loop starts, then the step-down races in behind it.
    let rx = queue.submit("pending", "a".to_string(), None);
    master.step_down();
    let _shutdown = spawn_master(&master);

    assert!(matches!(rx.await.unwrap(), Err(IoliteError::NotMaster)));
    assert!(log.lock().is_empty());

    let rejected = queue.submit("late", "b".to_string(), None);
    assert!(matches!(
        rejected.await.unwrap(),
        Err(IoliteError::NotMaster)
    ));

    master.become_master();
    assert!(master.is_master());
    let accepted = queue.submit("after-reelection", "c".to_string(), None);
    accepted.await.unwrap().unwrap();
    assert_eq!(*log.lock(), vec!["c".to_string()]);
}
