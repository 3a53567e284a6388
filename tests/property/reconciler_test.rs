// tests/property/reconciler_test.rs

//! Closure and completeness properties of the desired-balance pipeline over
//! arbitrary cluster shapes.

use iolitedb::config::AllocationConfig;
use iolitedb::core::allocation::NodeAllocationOrdering;
use iolitedb::core::allocation::deciders::AllocationDeciders;
use iolitedb::core::allocation::desired::computer::{
    ComputationOutcome, DesiredBalanceComputer, DesiredBalanceInput,
};
use iolitedb::core::allocation::desired::reconcile;
use iolitedb::core::allocation::routing_allocation::RoutingAllocation;
use iolitedb::core::cluster::info::ClusterInfo;
use iolitedb::core::cluster::state::ClusterState;
use iolitedb::core::metadata::{DiscoveryNode, DiscoveryNodes, IndexMetadata, Metadata};
use iolitedb::core::routing::RoutingTable;
use proptest::prelude::*;
use std::sync::Arc;

fn arbitrary_cluster() -> impl Strategy<Value = (usize, Vec<(u32, u32)>)> {
    (
        0usize..=4,
        prop::collection::vec((1u32..=3, 0u32..=2), 1..=3),
    )
}

fn build_state(node_count: usize, shapes: &[(u32, u32)]) -> Arc<ClusterState> {
    let mut nodes = DiscoveryNodes::default();
    for n in 0..node_count {
        let id = format!("node-{n}");
        nodes.add(DiscoveryNode::new_data_node(id.clone(), id));
    }
    let mut metadata = Metadata::default();
    let mut table = RoutingTable::default();
    for (i, (shards, replicas)) in shapes.iter().enumerate() {
        let index = IndexMetadata::new(format!("index-{i}"), *shards, *replicas);
        table.add_index(&index);
        metadata.put_index(index);
    }
    Arc::new(ClusterState::new(nodes, metadata, table))
}

fn allocation_for(state: &Arc<ClusterState>) -> RoutingAllocation {
    RoutingAllocation::new(
        Arc::new(AllocationDeciders::standard()),
        Arc::new(AllocationConfig::default()),
        state,
        Arc::new(ClusterInfo::default()),
        Arc::new(NodeAllocationOrdering::default()),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariants: the computed balance covers exactly the live shards, and
    /// one reconciliation leaves no shard unaccounted: every copy is either
    /// assigned to exactly one node or parked ignored, with the per-shard
    /// copy count equal to replicas + 1.
    #[test]
    fn reconciliation_closes_over_every_shard(
        (node_count, shapes) in arbitrary_cluster()
    ) {
        let state = build_state(node_count, &shapes);
        let total_shards: usize = shapes.iter().map(|(s, _)| *s as usize).sum();

        let computer = DesiredBalanceComputer::new(
            Arc::new(AllocationDeciders::standard()),
            Arc::new(AllocationConfig::default()),
            Arc::new(NodeAllocationOrdering::default()),
        );
        let input = DesiredBalanceInput {
            index: 1,
            cluster_state: state.clone(),
            cluster_info: Arc::new(ClusterInfo::default()),
            pending_commands: Vec::new(),
        };
        let (outcome, _) = computer.compute(&Default::default(), &input, &mut || true);
        let balance = match outcome {
            ComputationOutcome::Converged(balance) => balance,
            ComputationOutcome::BudgetExhausted(balance) => balance,
            ComputationOutcome::Stale => unreachable!("input never goes stale"),
        };

        // Completeness: keys are exactly the shards of the live indices.
        prop_assert_eq!(balance.assignments.len(), total_shards);
        for assignment in balance.assignments.values() {
            prop_assert!(assignment.nodes.len() <= assignment.total);
        }

        let mut allocation = allocation_for(&state);
        reconcile(&balance, &mut allocation);

        prop_assert!(!allocation.routing_nodes().has_unassigned());
        let metadata = state.metadata.clone();
        allocation.routing_nodes().assert_consistency(&metadata);
    }

    /// A reconciliation applied twice without any recovery completing in
    /// between proposes no movements the second time.
    #[test]
    fn second_reconciliation_is_movement_free(
        (node_count, shapes) in arbitrary_cluster()
    ) {
        let state = build_state(node_count, &shapes);
        let computer = DesiredBalanceComputer::new(
            Arc::new(AllocationDeciders::standard()),
            Arc::new(AllocationConfig::default()),
            Arc::new(NodeAllocationOrdering::default()),
        );
        let input = DesiredBalanceInput {
            index: 1,
            cluster_state: state.clone(),
            cluster_info: Arc::new(ClusterInfo::default()),
            pending_commands: Vec::new(),
        };
        let (outcome, _) = computer.compute(&Default::default(), &input, &mut || true);
        let balance = match outcome {
            ComputationOutcome::Converged(balance) => balance,
            ComputationOutcome::BudgetExhausted(balance) => balance,
            ComputationOutcome::Stale => unreachable!("input never goes stale"),
        };

        let mut first = allocation_for(&state);
        reconcile(&balance, &mut first);
        let state = state.with_routing_table(first.build_routing_table(&state.routing_table));

        let mut second = allocation_for(&state);
        reconcile(&balance, &mut second);
        prop_assert!(!second.has_changed());
    }
}
