// tests/property/pressure_test.rs

//! Conservation and bound properties of the indexing-pressure counters.

use iolitedb::core::pressure::IndexingPressure;
use proptest::prelude::*;
use std::sync::Arc;

const LIMIT: u64 = 5_000;

#[derive(Debug, Clone)]
enum Op {
    Coordinating(u64, u64),
    Primary(u64, u64),
    Replica(u64, u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..2_000, 1u64..5).prop_map(|(b, o)| Op::Coordinating(b, o)),
        (1u64..2_000, 1u64..5).prop_map(|(b, o)| Op::Primary(b, o)),
        (1u64..2_000, 1u64..5).prop_map(|(b, o)| Op::Replica(b, o)),
    ]
}

proptest! {
    /// Invariant: after every acquired reference is released, every role
    /// counter is back at zero, no matter which marks were admitted.
    #[test]
    fn counters_return_to_zero_after_all_releases(
        ops in prop::collection::vec(op_strategy(), 1..60)
    ) {
        let pressure = Arc::new(IndexingPressure::new(LIMIT));
        let mut releases = Vec::new();
        for op in &ops {
            match op {
                Op::Coordinating(bytes, n) => {
                    if let Ok(release) = pressure.mark_coordinating(*bytes, *n) {
                        releases.push(release);
                    }
                }
                Op::Primary(bytes, n) => {
                    if let Ok(release) = pressure.mark_primary(*bytes, *n) {
                        releases.push(release);
                    }
                }
                Op::Replica(bytes, n) => releases.push(pressure.mark_replica(*bytes, *n)),
            }
            // Bound: combined coordinating + primary never exceeds the limit.
            prop_assert!(pressure.get_current_combined_bytes() <= LIMIT);
        }
        for release in releases {
            release.release();
        }
        prop_assert_eq!(pressure.get_current_combined_bytes(), 0);
        prop_assert_eq!(pressure.get_current_coordinating_bytes(), 0);
        prop_assert_eq!(pressure.get_current_primary_bytes(), 0);
        prop_assert_eq!(pressure.get_current_replica_bytes(), 0);
        prop_assert_eq!(pressure.get_current_coordinating_ops(), 0);
        prop_assert_eq!(pressure.get_current_primary_ops(), 0);
        prop_assert_eq!(pressure.get_current_replica_ops(), 0);
    }

    /// Releasing twice never double-decrements, regardless of how mark and
    /// release calls interleave.
    #[test]
    fn double_release_never_double_decrements(
        bytes in prop::collection::vec(1u64..1_000, 1..20)
    ) {
        let pressure = Arc::new(IndexingPressure::new(LIMIT));
        for b in &bytes {
            if let Ok(release) = pressure.mark_coordinating(*b, 1) {
                release.release();
                release.release();
                drop(release);
            }
        }
        prop_assert_eq!(pressure.get_current_combined_bytes(), 0);
        prop_assert_eq!(pressure.get_current_coordinating_bytes(), 0);
    }
}
