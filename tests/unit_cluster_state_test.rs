use async_trait::async_trait;
use iolitedb::config::{Config, MemoryLimitConfig};
use iolitedb::core::IoliteError;
use iolitedb::core::cluster::info::{NodeFsStats, ShardStoreStats};
use iolitedb::core::cluster::info_service::StoreStatsProvider;
use iolitedb::core::cluster::state::ClusterState;
use iolitedb::core::master::service::NoopPublisher;
use iolitedb::core::metadata::{
    DiscoveryNode, DiscoveryNodes, IndexMetadata, Metadata, NodeShutdownKind, ShardId,
};
use iolitedb::core::routing::RoutingTable;
use iolitedb::core::state::ServerState;
use std::sync::Arc;
use tokio::sync::broadcast;

struct EmptyStatsProvider;

#[async_trait]
impl StoreStatsProvider for EmptyStatsProvider {
    async fn node_fs_stats(&self) -> Result<Vec<NodeFsStats>, IoliteError> {
        Ok(Vec::new())
    }

    async fn shard_store_stats(&self) -> Result<Vec<ShardStoreStats>, IoliteError> {
        Ok(Vec::new())
    }
}

fn server_with_nodes(node_ids: &[&str]) -> Arc<ServerState> {
    let mut nodes = DiscoveryNodes::default();
    for id in node_ids {
        nodes.add(DiscoveryNode::new_data_node(*id, *id));
    }
    let initial = Arc::new(ClusterState::new(
        nodes,
        Metadata::default(),
        RoutingTable::default(),
    ));
    let mut config = Config::default();
    config.indexing_pressure.memory_limit = MemoryLimitConfig::Bytes(10_000);
    ServerState::initialize(
        config,
        initial,
        Arc::new(NoopPublisher),
        Arc::new(EmptyStatsProvider),
    )
    .expect("server state must initialize")
}

fn spawn_master(server: &Arc<ServerState>) -> broadcast::Sender<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(server.master.clone().run(shutdown_rx));
    shutdown_tx
}

#[tokio::test]
async fn test_create_and_delete_index() {
    let server = server_with_nodes(&["n1"]);
    let _shutdown = spawn_master(&server);

    let applied = server
        .create_index(IndexMetadata::new("logs", 2, 1))
        .await
        .expect("creation must succeed");
    assert_eq!(applied.version, 1);
    let index = applied.metadata.index("logs").unwrap();
    assert_eq!(index.number_of_shards, 2);
    // Every copy starts unassigned.
    let routing = applied.routing_table.index("logs").unwrap();
    assert_eq!(routing.shards.len(), 2);
    for shard_table in &routing.shards {
        assert_eq!(shard_table.copies.len(), 2);
        assert!(shard_table.copies.iter().all(|c| c.is_unassigned()));
    }

    let duplicate = server.create_index(IndexMetadata::new("logs", 2, 1)).await;
    assert!(matches!(duplicate, Err(IoliteError::InvalidState(_))));

    let applied = server.delete_index("logs").await.expect("deletion must succeed");
    assert!(applied.metadata.index("logs").is_none());
    assert!(applied.routing_table.index("logs").is_none());

    let missing = server.delete_index("logs").await;
    assert!(matches!(missing, Err(IoliteError::IndexNotFound(_))));
}

#[tokio::test]
async fn test_close_and_reopen_index_keeps_routing() {
    let server = server_with_nodes(&["n1"]);
    let _shutdown = spawn_master(&server);

    server
        .create_index(IndexMetadata::new("logs", 1, 0))
        .await
        .expect("creation must succeed");
    let applied = server.close_index("logs").await.expect("close must succeed");
    assert_eq!(
        applied.metadata.index("logs").unwrap().state,
        iolitedb::core::metadata::IndexState::Closed
    );
    // Routing survives a close so the index stays recoverable.
    assert!(applied.routing_table.index("logs").is_some());

    let applied = server.open_index("logs").await.expect("open must succeed");
    assert_eq!(
        applied.metadata.index("logs").unwrap().state,
        iolitedb::core::metadata::IndexState::Open
    );

    let missing = server.close_index("nope").await;
    assert!(matches!(missing, Err(IoliteError::IndexNotFound(_))));
}

#[tokio::test]
async fn test_zero_shard_index_is_rejected() {
    let server = server_with_nodes(&["n1"]);
    let _shutdown = spawn_master(&server);

    let result = server.create_index(IndexMetadata::new("bad", 0, 0)).await;
    assert!(matches!(result, Err(IoliteError::InvalidRequest(_))));
    assert_eq!(server.cluster_state().version, 0);
}

#[tokio::test]
async fn test_node_membership_changes() {
    let server = server_with_nodes(&["n1"]);
    let _shutdown = spawn_master(&server);

    let applied = server
        .node_joined(DiscoveryNode::new_data_node("n2", "n2"))
        .await
        .expect("join must succeed");
    assert!(applied.nodes.contains("n2"));

    // Joining twice is idempotent and publishes nothing new.
    let version = applied.version;
    let applied = server
        .node_joined(DiscoveryNode::new_data_node("n2", "n2"))
        .await
        .expect("idempotent join must succeed");
    assert_eq!(applied.version, version);

    let applied = server.node_left(&"n2".to_string()).await.expect("leave must succeed");
    assert!(!applied.nodes.contains("n2"));
}

#[tokio::test]
async fn test_node_left_strips_its_shard_copies() {
    let server = server_with_nodes(&["n1", "n2"]);
    let (shutdown_tx, _) = broadcast::channel(4);
    tokio::spawn(server.master.clone().run(shutdown_tx.subscribe()));
    tokio::spawn(
        server
            .allocator
            .clone()
            .run_reconciliations(shutdown_tx.subscribe()),
    );

    let applied = server
        .create_index(IndexMetadata::new("logs", 1, 0))
        .await
        .expect("creation must succeed");
    let shard_id = ShardId::new(applied.metadata.index("logs").unwrap().id.clone(), 0);

    // Let the allocation round place the primary somewhere.
    let receiver = server.allocator.submit(applied.clone());
    tokio::time::timeout(std::time::Duration::from_secs(5), receiver)
        .await
        .expect("round must complete")
        .expect("listener must not be dropped")
        .expect("allocation must succeed");
    let placed = server.cluster_state();
    let hosting_node = placed
        .routing_table
        .shard(&shard_id)
        .unwrap()
        .primary()
        .unwrap()
        .assigned_node_id()
        .expect("primary must be placed")
        .clone();

    // Drop the hosting node: its copy must not survive in the table.
    let applied = server
        .node_left(&hosting_node)
        .await
        .expect("leave must succeed");
    let primary = applied.routing_table.shard(&shard_id).unwrap().primary().unwrap();
    assert!(primary.is_unassigned());
}

#[tokio::test]
async fn test_node_shutdown_markers() {
    let server = server_with_nodes(&["n1"]);
    let _shutdown = spawn_master(&server);

    let applied = server
        .put_node_shutdown(&"n1".to_string(), NodeShutdownKind::Restart)
        .await
        .expect("marker must apply");
    assert!(matches!(
        applied.metadata.shutdown_for(&"n1".to_string()),
        Some(NodeShutdownKind::Restart)
    ));

    let unknown = server
        .put_node_shutdown(&"nx".to_string(), NodeShutdownKind::Remove)
        .await;
    assert!(matches!(unknown, Err(IoliteError::NodeNotFound(_))));
}

#[tokio::test]
async fn test_versions_strictly_increase_across_mutations() {
    let server = server_with_nodes(&["n1"]);
    let _shutdown = spawn_master(&server);

    let mut last_version = 0;
    for n in 0..4u32 {
        let applied = server
            .create_index(IndexMetadata::new(format!("idx-{n}"), 1, 0))
            .await
            .expect("creation must succeed");
        assert!(applied.version > last_version);
        last_version = applied.version;
    }
}
