//! Custom assertions for replication tests
//!
//! Provides assertion helpers that print the offending versions instead of
//! a bare `false`.

use crate::core_replication::{
    ConflictSet, ItemOutcome, ReplicationError, ReplicationResult, VectorOrdering, VersionedItem,
};
use std::fmt::Debug;

/// Assert that a Result is Ok and return the value
pub fn assert_ok<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that every pair of members is concurrent
pub fn assert_antichain(set: &ConflictSet) {
    let members = set.members();
    for (i, a) in members.iter().enumerate() {
        for b in &members[i + 1..] {
            let ordering = a.compare(b);
            if ordering != VectorOrdering::Concurrent {
                panic!(
                    "Conflict set for {} holds ordered members ({:?}): [{}] vs [{}]",
                    set.id(),
                    ordering,
                    a.change_vector,
                    b.change_vector
                );
            }
        }
    }
}

/// Assert that a read reports a conflict and return its members
pub fn assert_conflicted(read: ReplicationResult<Option<VersionedItem>>) -> Vec<VersionedItem> {
    match read {
        Err(ReplicationError::Conflict(err)) => err.members,
        other => panic!("Expected conflict, got {:?}", other),
    }
}

/// Assert that processing stored something
pub fn assert_applied(outcome: &ItemOutcome) {
    if !outcome.changed_storage() {
        panic!("Expected item to reach storage, got {:?}", outcome);
    }
}

/// Assert that two collections have the same elements (order doesn't matter)
pub fn assert_same_elements<T: PartialEq + Debug>(a: &[T], b: &[T]) {
    if a.len() != b.len() {
        panic!(
            "Collections have different lengths: {} vs {}. a: {:?}, b: {:?}",
            a.len(),
            b.len(),
            a,
            b
        );
    }
    for item in a {
        if !b.contains(item) {
            panic!(
                "Element {:?} from first collection not found in second. a: {:?}, b: {:?}",
                item, a, b
            );
        }
    }
}
