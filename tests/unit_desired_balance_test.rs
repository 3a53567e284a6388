use iolitedb::config::AllocationConfig;
use iolitedb::core::allocation::NodeAllocationOrdering;
use iolitedb::core::allocation::commands::AllocationCommand;
use iolitedb::core::allocation::deciders::AllocationDeciders;
use iolitedb::core::allocation::desired::computer::{
    ComputationOutcome, ContinuousComputation, DesiredBalanceComputer, DesiredBalanceInput,
};
use iolitedb::core::cluster::info::ClusterInfo;
use iolitedb::core::cluster::state::ClusterState;
use iolitedb::core::metadata::{
    DiscoveryNode, DiscoveryNodes, IndexMetadata, Metadata, ShardId,
};
use iolitedb::core::routing::RoutingTable;
use std::sync::Arc;
use std::time::Duration;

fn cluster_state(node_ids: &[&str], indices: Vec<IndexMetadata>) -> Arc<ClusterState> {
    let mut nodes = DiscoveryNodes::default();
    for id in node_ids {
        nodes.add(DiscoveryNode::new_data_node(*id, *id));
    }
    let mut metadata = Metadata::default();
    let mut table = RoutingTable::default();
    for index in indices {
        table.add_index(&index);
        metadata.put_index(index);
    }
    Arc::new(ClusterState::new(nodes, metadata, table))
}

fn computer() -> DesiredBalanceComputer {
    DesiredBalanceComputer::new(
        Arc::new(AllocationDeciders::standard()),
        Arc::new(AllocationConfig::default()),
        Arc::new(NodeAllocationOrdering::default()),
    )
}

fn input(index: u64, state: Arc<ClusterState>) -> DesiredBalanceInput {
    DesiredBalanceInput {
        index,
        cluster_state: state,
        cluster_info: Arc::new(ClusterInfo::default()),
        pending_commands: Vec::new(),
    }
}

#[tokio::test]
async fn test_computation_converges_and_covers_every_shard() {
    let index = IndexMetadata::new("test", 2, 1);
    let shard_ids: Vec<ShardId> = index.shard_ids().collect();
    let state = cluster_state(&["n1", "n2"], vec![index]);

    let (outcome, iterations) =
        computer().compute(&Default::default(), &input(1, state), &mut || true);
    let balance = match outcome {
        ComputationOutcome::Converged(balance) => balance,
        _ => panic!("computation must converge"),
    };
    assert!(iterations >= 1);
    assert_eq!(balance.last_converged_index, 1);

    // Completeness: the balance keys are exactly the live shards, and each
    // fully assignable shard maps to replicas + 1 distinct nodes.
    assert_eq!(balance.assignments.len(), shard_ids.len());
    for shard_id in &shard_ids {
        let assignment = balance.assignment(shard_id).expect("shard must be mapped");
        assert_eq!(assignment.total, 2);
        assert_eq!(assignment.nodes.len(), 2);
        assert!(!assignment.primary_ignored());
        assert!(!assignment.replica_ignored());
    }
}

#[tokio::test]
async fn test_unplaceable_replicas_are_reported_ignored() {
    let index = IndexMetadata::new("test", 1, 2);
    let shard_id = ShardId::new(index.id.clone(), 0);
    let state = cluster_state(&["n1"], vec![index]);

    let (outcome, _) = computer().compute(&Default::default(), &input(1, state), &mut || true);
    let balance = match outcome {
        ComputationOutcome::Converged(balance) => balance,
        _ => panic!("computation must converge"),
    };
    let assignment = balance.assignment(&shard_id).unwrap();
    // One node can host only the primary; both replicas stay ignored.
    assert_eq!(assignment.nodes.len(), 1);
    assert_eq!(assignment.total, 3);
    assert!(!assignment.primary_ignored());
    assert!(assignment.replica_ignored());
    assert_eq!(assignment.ignored_replicas, 2);
}

#[tokio::test]
async fn test_stale_input_aborts_without_publishing() {
    let index = IndexMetadata::new("test", 4, 1);
    let state = cluster_state(&["n1", "n2", "n3"], vec![index]);

    // Goes stale immediately after the first pass.
    let (outcome, _) =
        computer().compute(&Default::default(), &input(1, state), &mut || false);
    assert!(matches!(outcome, ComputationOutcome::Stale));
}

#[tokio::test]
async fn test_move_command_hint_steers_the_balance() {
    let index = IndexMetadata::new("test", 1, 0);
    let shard_id = ShardId::new(index.id.clone(), 0);
    let mut state = cluster_state(&["n1", "n2"], vec![index]);
    {
        let state_mut = Arc::make_mut(&mut state);
        let shard_table = &mut state_mut
            .routing_table
            .indices
            .get_mut("test")
            .unwrap()
            .shards[0];
        shard_table.copies[0] = shard_table.copies[0]
            .initialize("n1".to_string(), None)
            .moved_to_started();
    }

    let mut input = input(1, state);
    input.pending_commands.push(AllocationCommand::Move {
        shard: shard_id.clone(),
        from: "n1".to_string(),
        to: "n2".to_string(),
    });
    let (outcome, _) = computer().compute(&Default::default(), &input, &mut || true);
    let balance = match outcome {
        ComputationOutcome::Converged(balance) => balance,
        _ => panic!("computation must converge"),
    };
    let assignment = balance.assignment(&shard_id).unwrap();
    assert!(assignment.nodes.contains("n2"));
    assert!(!assignment.nodes.contains("n1"));
}

#[tokio::test]
async fn test_continuous_computation_publishes_latest_input_only() {
    let index = IndexMetadata::new("test", 2, 1);
    let state = cluster_state(&["n1", "n2"], vec![index]);

    let computation = ContinuousComputation::new(Arc::new(computer()));
    assert!(computation.current_desired_balance().is_sentinel());
    assert!(!computation.is_active());

    let mut balance_rx = computation.subscribe();
    for n in 1..=20u64 {
        computation.on_new_input(input(n, state.clone()));
    }

    // The newest input always wins; older queued inputs are discarded, so
    // the published index reaches 20 without requiring 20 computations.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            balance_rx.changed().await.expect("computation sender alive");
            if balance_rx.borrow_and_update().last_converged_index == 20 {
                return;
            }
        }
    })
    .await
    .expect("latest input must be computed");

    let stats = computation.stats();
    let executed = stats.executed.load(std::sync::atomic::Ordering::Relaxed);
    assert_eq!(
        stats.submitted.load(std::sync::atomic::Ordering::Relaxed),
        20
    );
    assert!(executed <= 20);
    assert!(executed >= 1);

    // The worker parks once nothing newer is queued.
    tokio::time::timeout(Duration::from_secs(5), async {
        while computation.is_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker must go idle");
}

#[tokio::test]
async fn test_reset_returns_to_sentinel() {
    let index = IndexMetadata::new("test", 1, 0);
    let state = cluster_state(&["n1"], vec![index]);
    let computation = ContinuousComputation::new(Arc::new(computer()));
    let mut balance_rx = computation.subscribe();

    computation.on_new_input(input(1, state));
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            balance_rx.changed().await.expect("computation sender alive");
            if !balance_rx.borrow_and_update().is_sentinel() {
                return;
            }
        }
    })
    .await
    .expect("balance must be published");

    computation.reset();
    assert!(computation.current_desired_balance().is_sentinel());
}
