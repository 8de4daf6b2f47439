/*
    conflict_store.rs - Antichains of concurrent versions per document

    A ConflictSet holds the versions of one document that are pairwise
    concurrent. Inserting a version prunes every member it dominates and is
    refused when an existing member already covers it, so a set can never
    hold two causally ordered versions.

    The ConflictStore maps document ids to their sets. Every write re-checks
    the antichain property; callers serialise writes per id through the
    processor's striped locks, the store itself only guards its map.
*/

use super::change_vector::{ChangeVector, VectorOrdering};
use super::errors::{ReplicationError, ReplicationResult};
use super::hashing::combine64;
use super::item::{DocumentId, Timestamp, VersionedItem};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Result of offering a version to a conflict set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Incoming version joined the set; `pruned` members were dominated by it
    Inserted { pruned: usize },
    /// An existing member dominates or equals the incoming version
    Covered,
}

/// Pairwise-concurrent versions of one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSet {
    id: DocumentId,
    members: Vec<VersionedItem>,
}

impl ConflictSet {
    /// Set holding two concurrent versions
    pub fn pair(existing: VersionedItem, incoming: VersionedItem) -> ReplicationResult<Self> {
        if existing.compare(&incoming) != VectorOrdering::Concurrent {
            return Err(ReplicationError::InvariantViolation(format!(
                "versions of {} are causally ordered",
                existing.id
            )));
        }
        Ok(ConflictSet { id: existing.id.clone(), members: vec![existing, incoming] })
    }

    /// Build a set from arbitrary members, checking the antichain property
    pub fn from_members(id: impl Into<DocumentId>, members: Vec<VersionedItem>) -> ReplicationResult<Self> {
        let set = ConflictSet { id: id.into(), members };
        if !set.is_antichain() {
            return Err(ReplicationError::InvariantViolation(format!(
                "members of {} are not pairwise concurrent",
                set.id
            )));
        }
        Ok(set)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn members(&self) -> &[VersionedItem] {
        &self.members
    }

    pub fn into_members(self) -> Vec<VersionedItem> {
        self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains_tombstone(&self) -> bool {
        self.members.iter().any(VersionedItem::is_tombstone)
    }

    pub fn change_vectors(&self) -> Vec<ChangeVector> {
        self.members.iter().map(|m| m.change_vector.clone()).collect()
    }

    /// Members sorted into their canonical sequence
    pub fn canonical_members(&self) -> Vec<&VersionedItem> {
        let mut sorted: Vec<&VersionedItem> = self.members.iter().collect();
        sorted.sort_by(|a, b| a.canonical_cmp(b));
        sorted
    }

    /// Collection the set belongs to.
    ///
    /// Taken from the first live document in canonical order; a set made only
    /// of tombstones uses the first tombstone's collection.
    pub fn collection(&self) -> Option<&str> {
        let canonical = self.canonical_members();
        canonical
            .iter()
            .find(|m| !m.is_tombstone())
            .or_else(|| canonical.first())
            .map(|m| m.collection.as_str())
    }

    /// Live documents disagree on their collection
    pub fn has_mixed_collections(&self) -> bool {
        let mut live = self.members.iter().filter(|m| !m.is_tombstone());
        match live.next() {
            Some(first) => live.any(|m| m.collection != first.collection),
            None => false,
        }
    }

    /// Merge of every member's change vector
    pub fn merged_vector(&self) -> ChangeVector {
        ChangeVector::merge_all(self.members.iter().map(|m| &m.change_vector))
    }

    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.members.iter().map(|m| m.last_modified).max()
    }

    /// Order-independent fingerprint of the member set
    pub fn fingerprint(&self) -> u64 {
        self.canonical_members().iter().fold(self.members.len() as u64, |acc, m| {
            combine64(acc, m.change_vector.fingerprint_with(u64::from(m.tombstone)))
        })
    }

    /// Same members, ignoring order
    pub fn same_members(&self, other: &ConflictSet) -> bool {
        self.id == other.id
            && self.members.len() == other.members.len()
            && self.canonical_members() == other.canonical_members()
    }

    /// Every pair of members compares Concurrent
    pub fn is_antichain(&self) -> bool {
        self.members.iter().enumerate().all(|(i, a)| {
            self.members[i + 1..]
                .iter()
                .all(|b| a.compare(b) == VectorOrdering::Concurrent)
        })
    }

    /// Offer `incoming` to the set, pruning the members it dominates
    pub fn insert(&mut self, incoming: VersionedItem) -> InsertOutcome {
        let covered = self.members.iter().any(|m| {
            matches!(incoming.compare(m), VectorOrdering::Dominated | VectorOrdering::Equal)
        });
        if covered {
            return InsertOutcome::Covered;
        }

        let before = self.members.len();
        self.members
            .retain(|m| incoming.compare(m) != VectorOrdering::Dominates);
        let pruned = before - self.members.len();
        self.members.push(incoming);
        InsertOutcome::Inserted { pruned }
    }
}

fn poisoned<T>(_: PoisonError<T>) -> ReplicationError {
    ReplicationError::Internal("conflict store lock poisoned".to_string())
}

/// Recorded conflicts keyed by document id
#[derive(Debug, Default)]
pub struct ConflictStore {
    sets: RwLock<HashMap<DocumentId, ConflictSet>>,
}

impl ConflictStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> ReplicationResult<Option<ConflictSet>> {
        let sets = self.sets.read().map_err(poisoned)?;
        Ok(sets.get(id).cloned())
    }

    /// Record `set`, replacing any previous set for its id.
    ///
    /// Refuses sets with fewer than two members or with causally ordered
    /// members.
    pub fn put(&self, set: ConflictSet) -> ReplicationResult<()> {
        check_storable(&set)?;
        let mut sets = self.sets.write().map_err(poisoned)?;
        sets.insert(set.id.clone(), set);
        Ok(())
    }

    /// Drop the set recorded for `id`, returning it
    pub fn clear(&self, id: &str) -> ReplicationResult<Option<ConflictSet>> {
        let mut sets = self.sets.write().map_err(poisoned)?;
        Ok(sets.remove(id))
    }

    /// Atomic read-modify-write of one entry.
    ///
    /// `f` sees the current set (if any) and may replace or remove it. When
    /// the entry it leaves behind is not storable, the previous entry is
    /// restored and the error returned.
    pub fn modify<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Option<ConflictSet>) -> R,
    ) -> ReplicationResult<R> {
        let mut sets = self.sets.write().map_err(poisoned)?;
        let previous = sets.remove(id);
        let mut slot = previous.clone();
        let result = f(&mut slot);

        if let Some(set) = slot {
            if let Err(err) = check_storable(&set).and_then(|_| same_id(id, &set)) {
                if let Some(previous) = previous {
                    sets.insert(id.to_string(), previous);
                }
                return Err(err);
            }
            sets.insert(id.to_string(), set);
        }
        Ok(result)
    }

    /// Copy of every recorded set, ordered by id
    pub fn snapshot(&self) -> ReplicationResult<Vec<ConflictSet>> {
        let sets = self.sets.read().map_err(poisoned)?;
        let mut all: Vec<ConflictSet> = sets.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    pub fn ids(&self) -> ReplicationResult<Vec<DocumentId>> {
        let sets = self.sets.read().map_err(poisoned)?;
        let mut ids: Vec<DocumentId> = sets.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn len(&self) -> usize {
        self.sets.read().map(|s| s.len()).unwrap_or_else(|e| e.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_storable(set: &ConflictSet) -> ReplicationResult<()> {
    if set.len() < 2 {
        return Err(ReplicationError::InvariantViolation(format!(
            "conflict set for {} has {} member(s)",
            set.id,
            set.len()
        )));
    }
    if !set.is_antichain() {
        return Err(ReplicationError::InvariantViolation(format!(
            "members of {} are not pairwise concurrent",
            set.id
        )));
    }
    Ok(())
}

fn same_id(id: &str, set: &ConflictSet) -> ReplicationResult<()> {
    if set.id != id {
        return Err(ReplicationError::InvariantViolation(format!(
            "set for {} stored under {}",
            set.id, id
        )));
    }
    Ok(())
}
