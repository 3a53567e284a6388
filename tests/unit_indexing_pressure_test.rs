use iolitedb::core::IoliteError;
use iolitedb::core::pressure::IndexingPressure;
use std::sync::Arc;

#[tokio::test]
async fn test_coordinating_admission_and_release() {
    let pressure = Arc::new(IndexingPressure::new(1500));

    let release = pressure.mark_coordinating(1200, 1).expect("must admit");
    assert_eq!(pressure.get_current_combined_bytes(), 1200);
    assert_eq!(pressure.get_current_coordinating_bytes(), 1200);
    assert_eq!(pressure.get_current_coordinating_ops(), 1);
    assert_eq!(pressure.get_current_primary_bytes(), 0);
    assert_eq!(pressure.get_current_replica_bytes(), 0);

    // A second, overlapping request above the limit is rejected and changes
    // no counters.
    let rejected = pressure.mark_coordinating(400, 1);
    match rejected {
        Err(IoliteError::RejectedExecution {
            role,
            attempted_bytes,
            current_bytes,
            limit_bytes,
        }) => {
            assert_eq!(role, "coordinating");
            assert_eq!(attempted_bytes, 400);
            assert_eq!(current_bytes, 1200);
            assert_eq!(limit_bytes, 1500);
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert_eq!(pressure.get_current_combined_bytes(), 1200);
    assert_eq!(pressure.get_coordinating_rejections(), 1);

    release.release();
    assert_eq!(pressure.get_current_combined_bytes(), 0);
    assert_eq!(pressure.get_current_coordinating_bytes(), 0);
    assert_eq!(pressure.get_current_coordinating_ops(), 0);
}

#[tokio::test]
async fn test_primary_shares_combined_budget_with_coordinating() {
    let pressure = Arc::new(IndexingPressure::new(1000));

    let _coord = pressure.mark_coordinating(700, 1).expect("must admit");
    let rejected = pressure.mark_primary(400, 1);
    assert!(matches!(
        rejected,
        Err(IoliteError::RejectedExecution { role: "primary", .. })
    ));
    assert_eq!(pressure.get_primary_rejections(), 1);

    let primary = pressure.mark_primary(300, 2).expect("must admit");
    assert_eq!(pressure.get_current_combined_bytes(), 1000);
    assert_eq!(pressure.get_current_primary_bytes(), 300);
    assert_eq!(pressure.get_current_primary_ops(), 2);
    primary.release();
    assert_eq!(pressure.get_current_combined_bytes(), 700);
}

#[tokio::test]
async fn test_replica_never_rejects_for_space() {
    let pressure = Arc::new(IndexingPressure::new(100));

    // Far above the limit, still accounted.
    let release = pressure.mark_replica(5000, 3);
    assert_eq!(pressure.get_current_replica_bytes(), 5000);
    assert_eq!(pressure.get_current_replica_ops(), 3);
    // Replica bytes never count against the combined admission budget.
    assert_eq!(pressure.get_current_combined_bytes(), 0);
    let admitted = pressure.mark_coordinating(100, 1);
    assert!(admitted.is_ok());

    release.release();
    assert_eq!(pressure.get_current_replica_bytes(), 0);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let pressure = Arc::new(IndexingPressure::new(1000));

    let release = pressure.mark_coordinating(600, 1).expect("must admit");
    release.release();
    release.release();
    assert_eq!(pressure.get_current_combined_bytes(), 0);
    assert_eq!(pressure.get_current_coordinating_bytes(), 0);

    // Mark/release twice leaves every counter at its initial value.
    let r1 = pressure.mark_primary(200, 1).expect("must admit");
    r1.release();
    let r2 = pressure.mark_primary(200, 1).expect("must admit");
    r2.release();
    assert_eq!(pressure.get_current_combined_bytes(), 0);
    assert_eq!(pressure.get_current_primary_bytes(), 0);
    assert_eq!(pressure.get_current_primary_ops(), 0);
}

#[tokio::test]
async fn test_drop_releases_exactly_once() {
    let pressure = Arc::new(IndexingPressure::new(1000));
    {
        let release = pressure.mark_coordinating(400, 1).expect("must admit");
        // Explicit release, then drop: the drop must not double-decrement.
        release.release();
    }
    assert_eq!(pressure.get_current_combined_bytes(), 0);

    {
        let _release = pressure.mark_coordinating(400, 1).expect("must admit");
        // Dropped without an explicit release.
    }
    assert_eq!(pressure.get_current_combined_bytes(), 0);
}

#[tokio::test]
async fn test_reset_abandons_outstanding_releases() {
    let pressure = Arc::new(IndexingPressure::new(1000));

    let stale = pressure.mark_coordinating(800, 1).expect("must admit");
    pressure.reset();
    assert_eq!(pressure.get_current_combined_bytes(), 0);

    // A release minted before the reset must not drive counters negative.
    let fresh = pressure.mark_coordinating(500, 1).expect("must admit");
    stale.release();
    assert_eq!(pressure.get_current_combined_bytes(), 500);
    fresh.release();
    assert_eq!(pressure.get_current_combined_bytes(), 0);
}

#[tokio::test]
async fn test_totals_survive_releases() {
    let pressure = Arc::new(IndexingPressure::new(10_000));
    let r1 = pressure.mark_coordinating(1000, 2).expect("must admit");
    let r2 = pressure.mark_replica(500, 1);
    r1.release();
    r2.release();
    assert_eq!(pressure.get_total_coordinating_bytes(), 1000);
    assert_eq!(pressure.get_total_replica_bytes(), 500);
    assert_eq!(pressure.get_current_combined_bytes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_marks_never_exceed_limit() {
    let pressure = Arc::new(IndexingPressure::new(10_000));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let pressure = pressure.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..200 {
                if let Ok(release) = pressure.mark_coordinating(900, 1) {
                    assert!(pressure.get_current_combined_bytes() <= 10_000);
                    tokio::task::yield_now().await;
                    release.release();
                }
            }
        }));
    }
    for handle in handles {
        handle.await.expect("worker must not panic");
    }
    assert_eq!(pressure.get_current_combined_bytes(), 0);
    assert_eq!(pressure.get_current_coordinating_bytes(), 0);
}
