use async_trait::async_trait;
use iolitedb::core::IoliteError;
use iolitedb::core::cluster::info::{FsPathStats, NodeFsStats, ShardSizeKey, ShardStoreStats};
use iolitedb::core::cluster::info_service::{ClusterInfoService, StoreStatsProvider};
use iolitedb::core::cluster::state::ClusterState;
use iolitedb::core::metadata::{DiscoveryNode, DiscoveryNodes, IndexId, Metadata, ShardId};
use iolitedb::core::routing::RoutingTable;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// Fake stats source. Each fs-stats call is tagged by stamping the call
/// number into `free_bytes`, so tests can tell refreshes apart.
struct FakeProvider {
    delay: Duration,
    fs_calls: AtomicU64,
    fs_hangs: bool,
}

impl FakeProvider {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            fs_calls: AtomicU64::new(0),
            fs_hangs: false,
        }
    }

    fn hanging() -> Self {
        Self {
            delay: Duration::ZERO,
            fs_calls: AtomicU64::new(0),
            fs_hangs: true,
        }
    }
}

fn test_shard_id() -> ShardId {
    ShardId::new(
        IndexId {
            name: "test".to_string(),
            uuid: uuid::Uuid::nil(),
        },
        0,
    )
}

#[async_trait]
impl StoreStatsProvider for FakeProvider {
    async fn node_fs_stats(&self) -> Result<Vec<NodeFsStats>, IoliteError> {
        if self.fs_hangs {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.delay).await;
        let call = self.fs_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(vec![NodeFsStats {
            node_id: "n1".to_string(),
            paths: vec![
                FsPathStats {
                    path: "/data".to_string(),
                    total_bytes: 1000,
                    free_bytes: call,
                },
                FsPathStats {
                    path: "/scratch".to_string(),
                    total_bytes: 1000,
                    free_bytes: 900,
                },
            ],
        }])
    }

    async fn shard_store_stats(&self) -> Result<Vec<ShardStoreStats>, IoliteError> {
        Ok(vec![
            ShardStoreStats {
                shard_id: test_shard_id(),
                primary: true,
                node_id: "n1".to_string(),
                path: Some("/data".to_string()),
                store_bytes: 512,
                data_set_bytes: 512,
                reserved_bytes: 0,
            },
            ShardStoreStats {
                shard_id: test_shard_id(),
                primary: false,
                node_id: "n2".to_string(),
                path: Some("/data".to_string()),
                store_bytes: 256,
                data_set_bytes: 768,
                reserved_bytes: 128,
            },
        ])
    }
}

fn service_with(provider: FakeProvider, interval: Duration, timeout: Duration) -> Arc<ClusterInfoService> {
    let service = Arc::new(ClusterInfoService::new(
        Arc::new(provider),
        interval,
        timeout,
        true,
    ));
    service.on_elected();
    service
}

fn state_with_nodes(node_ids: &[&str]) -> Arc<ClusterState> {
    let mut nodes = DiscoveryNodes::default();
    for id in node_ids {
        nodes.add(DiscoveryNode::new_data_node(*id, *id));
    }
    Arc::new(ClusterState::new(
        nodes,
        Metadata::default(),
        RoutingTable::default(),
    ))
}

#[tokio::test]
async fn test_refresh_builds_the_snapshot() {
    let service = service_with(
        FakeProvider::new(Duration::ZERO),
        Duration::from_secs(3600),
        Duration::from_secs(15),
    );

    service.refresh_now().await;
    let info = service.cluster_info();

    // Least/most available path selection per node.
    let least = info.least_available("n1").expect("n1 must be known");
    assert_eq!(least.path, "/data");
    assert_eq!(least.free_bytes, 1);
    assert_eq!(info.most_available_space.get("n1").unwrap().path, "/scratch");

    // Per-copy store sizes, max data-set size across copies, reserved space.
    let primary_key = ShardSizeKey {
        shard_id: test_shard_id(),
        primary: true,
    };
    assert_eq!(info.shard_sizes.get(&primary_key), Some(&512));
    assert_eq!(info.shard_data_set_sizes.get(&test_shard_id()), Some(&768));
    assert_eq!(info.reserved_bytes("n2", "/data"), 128);
}

#[tokio::test]
async fn test_node_join_during_refresh_coalesces_to_one_follow_up() {
    let service = service_with(
        FakeProvider::new(Duration::from_millis(300)),
        Duration::from_secs(3600),
        Duration::from_secs(15),
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(service.clone().run(shutdown_tx.subscribe()));

    // The startup tick's refresh is now in flight; two joins arrive while it
    // runs and must coalesce to exactly one extra refresh.
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.on_cluster_state(&state_with_nodes(&["n1"]));
    service.on_cluster_state(&state_with_nodes(&["n1", "n2"]));

    tokio::time::timeout(Duration::from_secs(5), async {
        while service.completed_refreshes() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("the follow-up refresh must run");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(service.completed_refreshes(), 2);
}

#[tokio::test]
async fn test_refresh_async_is_served_by_the_next_refresh() {
    let service = service_with(
        FakeProvider::new(Duration::from_millis(200)),
        Duration::from_secs(3600),
        Duration::from_secs(15),
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(service.clone().run(shutdown_tx.subscribe()));

    // Register while the first refresh is in flight: the listener must see
    // stats strictly newer than its request, i.e. the second refresh's.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (tx, rx) = oneshot::channel();
    service.refresh_async(tx);

    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("listener must be served")
        .expect("sender must not be dropped");
    assert_eq!(snapshot.least_available("n1").unwrap().free_bytes, 2);
}

#[tokio::test]
async fn test_fan_out_timeout_keeps_the_partial_half() {
    let service = service_with(
        FakeProvider::hanging(),
        Duration::from_secs(3600),
        Duration::from_millis(100),
    );

    service.refresh_now().await;
    let info = service.cluster_info();

    // The fs half timed out and contributed an empty summary; the shard half
    // is intact.
    assert!(info.least_available_space.is_empty());
    assert!(!info.shard_sizes.is_empty());
}

#[tokio::test]
async fn test_demotion_releases_queued_listeners_with_empty_snapshot() {
    let service = service_with(
        FakeProvider::new(Duration::ZERO),
        Duration::from_secs(3600),
        Duration::from_secs(15),
    );

    // Queued but never served: the run loop is not spawned.
    let (tx, rx) = oneshot::channel();
    service.refresh_async(tx);
    service.on_demoted();

    let snapshot = rx.await.expect("listener must be released");
    assert!(snapshot.least_available_space.is_empty());
    assert!(snapshot.shard_sizes.is_empty());

    // After demotion, listeners are answered immediately with emptiness.
    let (tx, rx) = oneshot::channel();
    service.refresh_async(tx);
    let snapshot = rx.await.expect("listener must be released");
    assert!(snapshot.shard_sizes.is_empty());
}

#[tokio::test]
async fn test_listener_errors_do_not_break_the_refresh() {
    let service = service_with(
        FakeProvider::new(Duration::ZERO),
        Duration::from_secs(3600),
        Duration::from_secs(15),
    );
    let seen = Arc::new(AtomicU64::new(0));
    service.add_listener(Box::new(|_| {
        Err(IoliteError::Internal("listener exploded".to_string()))
    }));
    let seen_clone = seen.clone();
    service.add_listener(Box::new(move |info| {
        seen_clone.fetch_add(info.shard_sizes.len() as u64, Ordering::SeqCst);
        Ok(())
    }));

    service.refresh_now().await;
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_disabled_collector_does_not_run() {
    let service = Arc::new(ClusterInfoService::new(
        Arc::new(FakeProvider::new(Duration::ZERO)),
        Duration::from_secs(3600),
        Duration::from_secs(15),
        false,
    ));
    service.on_elected();
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(service.clone().run(shutdown_tx.subscribe()));
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("disabled collector must exit immediately")
        .expect("task must not panic");
    assert_eq!(service.completed_refreshes(), 0);
}
