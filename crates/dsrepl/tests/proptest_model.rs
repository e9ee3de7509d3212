//! Property-based tests for the replication data model.

use chrono::{DateTime, TimeZone, Utc};
use dsrepl::cursor::{CursorTracker, ReplicationCursor, ReplicationCursorSet};
use dsrepl::metadata::{AttributeMetadata, ReplicationMetadataSet};
use dsrepl::queue::{
    snapshot_order, OperationQueue, ReplicationOperationInformation, ReplicationOperationType,
};
use dsrepl::types::InvocationId;
use dsrepl::ErrorKind;
use proptest::prelude::*;
use std::cmp::Ordering;

const NC: &str = "DC=corp,DC=example";

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn entry(name: &str, version: u32, usn: u64) -> AttributeMetadata {
    AttributeMetadata {
        name: name.to_string(),
        version,
        last_originating_change_time: at(usn as i64),
        originating_invocation_id: InvocationId::from_u128(usn as u128 + 1),
        originating_change_usn: usn,
        local_change_usn: usn,
        originating_server: "dc1.corp.example".to_string(),
    }
}

/// Distinct attribute names with a version and USN each.
fn any_entries() -> impl Strategy<Value = Vec<AttributeMetadata>> {
    proptest::collection::btree_set("[a-z]{1,12}", 0..24)
        .prop_map(|names| names.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
        .prop_flat_map(|names| {
            let n = names.len();
            (
                Just(names),
                proptest::collection::vec((1u32..50, 1u64..10_000), n..=n),
            )
        })
        .prop_map(|(names, meta)| {
            names
                .iter()
                .zip(meta)
                .map(|(name, (version, usn))| entry(name, version, usn))
                .collect()
        })
}

fn any_operation_type() -> impl Strategy<Value = ReplicationOperationType> {
    prop_oneof![
        Just(ReplicationOperationType::Sync),
        Just(ReplicationOperationType::Add),
        Just(ReplicationOperationType::Delete),
        Just(ReplicationOperationType::Modify),
        Just(ReplicationOperationType::UpdateReference),
    ]
}

proptest! {
    /// Bulk export followed by a re-read yields the same entries in the same order.
    #[test]
    fn test_metadata_export_round_trip(entries in any_entries(), start in 0usize..4, slack in 0usize..4) {
        let set = ReplicationMetadataSet::from_entries(entries.clone()).unwrap();
        let mut buffer = vec![None; start + entries.len() + slack];
        let written = set.copy_to(&mut buffer, start).unwrap();
        prop_assert_eq!(written, entries.len());

        let exported: Vec<_> = buffer[start..start + written].iter().cloned().map(Option::unwrap).collect();
        prop_assert_eq!(&exported, &entries);
        prop_assert!(buffer[..start].iter().all(Option::is_none));

        let reread = ReplicationMetadataSet::from_entries(exported).unwrap();
        prop_assert_eq!(reread, set);
    }

    /// Lookup by any casing of a name returns exactly what a scan finds.
    #[test]
    fn test_metadata_lookup_matches_scan(entries in any_entries()) {
        let set = ReplicationMetadataSet::from_entries(entries.clone()).unwrap();
        for e in &entries {
            let scanned = set.iter().find(|m| m.name.eq_ignore_ascii_case(&e.name));
            prop_assert_eq!(set.get(&e.name.to_uppercase()), scanned);
            prop_assert_eq!(scanned, Some(e));
        }
        prop_assert!(set.get("no-such-attribute-0").is_none());
    }

    /// Undersized destinations and bad offsets are rejected without writing.
    #[test]
    fn test_metadata_export_bounds(entries in any_entries(), shortfall in 1usize..4, overshoot in 1usize..4) {
        prop_assume!(!entries.is_empty());
        let set = ReplicationMetadataSet::from_entries(entries.clone()).unwrap();

        let mut small = vec![None; entries.len().saturating_sub(shortfall)];
        let err = set.copy_to(&mut small, 0).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::BufferTooSmall);
        prop_assert!(small.iter().all(Option::is_none));

        let mut exact = vec![None; entries.len()];
        let err = set.copy_to(&mut exact, entries.len() + overshoot).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
    }

    /// Pending operations come back ordered by priority, then enqueue time.
    #[test]
    fn test_queue_snapshot_ordering(
        ops in proptest::collection::vec((any_operation_type(), -3i32..4, 0i64..20), 0..32)
    ) {
        let mut queue = OperationQueue::new();
        for (i, (kind, priority, offset)) in ops.iter().enumerate() {
            queue.enqueue(*kind, NC, format!("dc{i}"), *priority, at(*offset));
        }

        let info = ReplicationOperationInformation::from_snapshot(queue.snapshot());
        let pending = info.pending_operations();
        prop_assert_eq!(pending.len(), ops.len());
        for pair in pending.windows(2) {
            prop_assert_ne!(snapshot_order(&pair[0], &pair[1]), Ordering::Greater);
            prop_assert!(pair[0].priority <= pair[1].priority);
            if pair[0].priority == pair[1].priority {
                prop_assert!(pair[0].time_enqueued <= pair[1].time_enqueued);
            }
        }
    }

    /// The tracker's mark is the running maximum; every drop is reported.
    #[test]
    fn test_cursor_tracker_monotonic(usns in proptest::collection::vec(0u64..1_000, 1..40)) {
        let source = InvocationId::from_u128(7);
        let mut tracker = CursorTracker::new();
        let mut running_max = 0;

        for usn in usns {
            let set = ReplicationCursorSet::new(
                NC,
                vec![ReplicationCursor::new(NC, source, usn, Some("dc2".to_string()))],
            );
            let regressions = tracker.observe(&set);
            if usn < running_max {
                prop_assert_eq!(regressions.len(), 1);
                prop_assert_eq!(regressions[0].previous, running_max);
                prop_assert_eq!(regressions[0].observed, usn);
            } else {
                prop_assert!(regressions.is_empty());
                running_max = usn;
            }
            prop_assert_eq!(tracker.high_water(NC, &source), running_max);
        }
    }
}
