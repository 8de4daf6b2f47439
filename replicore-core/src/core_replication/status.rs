/*
    status.rs - Resolver status projection

    Per collection: how many conflicts are currently unresolved and what the
    last resolution attempt produced.
*/

use super::conflict_store::ConflictSet;
use super::item::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Result of the last resolution attempt in a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved { document_id: String, tombstone: bool, at: Timestamp },
    Unresolved { document_id: String, reason: String, at: Timestamp },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStatus {
    pub collection: String,
    pub unresolved: usize,
    pub last_outcome: Option<ResolutionOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStatus {
    pub unresolved_total: usize,
    pub collections: Vec<CollectionStatus>,
}

impl ResolverStatus {
    pub fn collection(&self, name: &str) -> Option<&CollectionStatus> {
        self.collections.iter().find(|c| c.collection == name)
    }
}

/// Remembers the last outcome per collection
#[derive(Debug, Default)]
pub struct StatusTracker {
    last: Mutex<BTreeMap<String, ResolutionOutcome>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, collection: &str, outcome: ResolutionOutcome) {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.insert(collection.to_string(), outcome);
    }

    /// Combine recorded outcomes with the currently recorded conflicts
    pub fn build(&self, conflicts: &[ConflictSet]) -> ResolverStatus {
        let last = match self.last.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for set in conflicts {
            let collection = set.collection().unwrap_or_default().to_string();
            *counts.entry(collection).or_default() += 1;
        }

        let mut names: Vec<String> = counts.keys().chain(last.keys()).cloned().collect();
        names.sort();
        names.dedup();

        let collections = names
            .into_iter()
            .map(|name| CollectionStatus {
                unresolved: counts.get(&name).copied().unwrap_or(0),
                last_outcome: last.get(&name).cloned(),
                collection: name,
            })
            .collect();

        ResolverStatus { unresolved_total: conflicts.len(), collections }
    }
}
