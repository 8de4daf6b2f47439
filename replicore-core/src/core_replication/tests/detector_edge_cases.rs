/*
    Detector and conflict store edge cases

    Tests covering:
    1. Tombstones take part in causality like documents
    2. Set growth, pruning and collapse across several arrivals
    3. The store refuses anything that is not an antichain
*/

use crate::core_replication::{
    ConflictDetector, ConflictSet, ConflictStore, Decision, LocalState, RejectReason, ReplicationError,
};
use crate::test_utils::assertions::assert_antichain;
use crate::test_utils::fixtures::{doc, tombstone};

#[test]
fn test_tombstone_dominating_document_is_accepted() {
    // Goal: Deletion that saw the write replaces it
    let existing = doc("d", "Users", &[(1, 1)], 1);
    let incoming = tombstone("d", "Users", &[(1, 2)], 2);
    let decision = ConflictDetector.process(incoming.clone(), LocalState::Clean(Some(existing))).unwrap();
    assert_eq!(decision, Decision::Accept(incoming));
}

#[test]
fn test_stale_write_after_tombstone_is_rejected() {
    // Goal: Old write does not resurrect a deleted document
    let existing = tombstone("d", "Users", &[(1, 2)], 2);
    let incoming = doc("d", "Users", &[(1, 1)], 9);
    let decision = ConflictDetector.process(incoming, LocalState::Clean(Some(existing))).unwrap();
    assert_eq!(decision, Decision::Reject(RejectReason::Dominated));
}

#[test]
fn test_equal_vector_different_payload_is_duplicate() {
    // Goal: Equality is decided by the vector alone
    let existing = doc("d", "Users", &[(1, 1)], 1);
    let mut incoming = existing.clone();
    incoming.payload = b"something else".to_vec();
    let decision = ConflictDetector.process(incoming, LocalState::Clean(Some(existing))).unwrap();
    assert_eq!(decision, Decision::Reject(RejectReason::AlreadyApplied));
}

#[test]
fn test_growth_then_collapse_sequence() {
    // Goal: Three-way conflict shrinks step by step and finally collapses
    let mut local = LocalState::Clean(Some(doc("d", "Users", &[(1, 1)], 1)));
    let arrivals = vec![
        doc("d", "Users", &[(2, 1)], 2),
        doc("d", "Users", &[(3, 1)], 3),
        doc("d", "Users", &[(1, 1), (2, 1)], 4),
        doc("d", "Users", &[(1, 1), (2, 1), (3, 1)], 5),
    ];
    let expected_sizes = [Some(2), Some(3), Some(2), None];

    for (incoming, expected) in arrivals.into_iter().zip(expected_sizes) {
        match ConflictDetector.process(incoming, local.clone()).unwrap() {
            Decision::Conflict(set) => {
                assert_eq!(Some(set.len()), expected);
                assert_antichain(&set);
                local = LocalState::Conflicted(set);
            }
            Decision::Accept(item) => {
                assert_eq!(expected, None);
                assert_eq!(item.last_modified.as_millis(), 5);
                local = LocalState::Clean(Some(item));
            }
            Decision::Reject(reason) => panic!("unexpected reject: {}", reason),
        }
    }
    assert!(matches!(local, LocalState::Clean(Some(_))));
}

#[test]
fn test_dominated_by_one_member_concurrent_with_other() {
    // Goal: Being covered by any member is enough to reject
    let set = ConflictSet::pair(doc("d", "Users", &[(1, 2)], 1), doc("d", "Users", &[(2, 1)], 1)).unwrap();
    let incoming = doc("d", "Users", &[(1, 1)], 3);
    let decision = ConflictDetector.process(incoming, LocalState::Conflicted(set)).unwrap();
    assert_eq!(decision, Decision::Reject(RejectReason::Dominated));
}

#[test]
fn test_store_rejects_ordered_members() {
    // Goal: Antichain check guards every write path
    let ordered = ConflictSet::from_members(
        "d",
        vec![doc("d", "Users", &[(1, 1)], 1), doc("d", "Users", &[(1, 2)], 2)],
    );
    assert!(matches!(ordered, Err(ReplicationError::InvariantViolation(_))));

    let store = ConflictStore::new();
    let result = store.modify("d", |slot| {
        *slot = Some(
            ConflictSet::from_members(
                "elsewhere",
                vec![doc("elsewhere", "Users", &[(1, 1)], 1), doc("elsewhere", "Users", &[(2, 1)], 1)],
            )
            .unwrap(),
        );
    });
    assert!(matches!(result, Err(ReplicationError::InvariantViolation(_))));
    assert!(store.is_empty());
}

#[test]
fn test_disjoint_single_node_vectors_conflict() {
    // Goal: Writes from nodes that never saw each other are concurrent
    let existing = doc("d", "Users", &[(1, 5)], 1);
    let incoming = doc("d", "Users", &[(2, 1)], 1);
    assert!(matches!(
        ConflictDetector.process(incoming, LocalState::Clean(Some(existing))).unwrap(),
        Decision::Conflict(_)
    ));
}
