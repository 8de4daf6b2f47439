/*
    detector.rs - Accept / reject / conflict decision for incoming versions

    Pure decision logic: looks at the incoming version and the local state
    of its document and says what should happen. Never touches storage or
    the conflict store itself.
*/

use super::change_vector::VectorOrdering;
use super::conflict_store::{ConflictSet, InsertOutcome};
use super::errors::{ReplicationError, ReplicationResult};
use super::item::VersionedItem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What is currently known locally about one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalState {
    /// No recorded conflict; the stored version, if any
    Clean(Option<VersionedItem>),
    /// Versions still awaiting resolution
    Conflicted(ConflictSet),
}

/// Why an incoming version was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A local version causally supersedes it
    Dominated,
    /// The exact same version is already present
    AlreadyApplied,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Dominated => write!(f, "dominated by local version"),
            RejectReason::AlreadyApplied => write!(f, "already applied"),
        }
    }
}

/// Detector verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Store this version; any recorded conflict is gone
    Accept(VersionedItem),
    /// Drop the incoming version, nothing changes
    Reject(RejectReason),
    /// Versions that must be kept side by side
    Conflict(ConflictSet),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        ConflictDetector
    }

    pub fn process(&self, incoming: VersionedItem, local: LocalState) -> ReplicationResult<Decision> {
        match local {
            LocalState::Clean(None) => Ok(Decision::Accept(incoming)),
            LocalState::Clean(Some(existing)) => match incoming.compare(&existing) {
                VectorOrdering::Dominates => Ok(Decision::Accept(incoming)),
                VectorOrdering::Dominated => Ok(Decision::Reject(RejectReason::Dominated)),
                VectorOrdering::Equal => Ok(Decision::Reject(RejectReason::AlreadyApplied)),
                VectorOrdering::Concurrent => Ok(Decision::Conflict(ConflictSet::pair(existing, incoming)?)),
            },
            LocalState::Conflicted(mut set) => {
                if let Some(reason) = rejection_against(&set, &incoming) {
                    return Ok(Decision::Reject(reason));
                }
                match set.insert(incoming) {
                    InsertOutcome::Covered => Ok(Decision::Reject(RejectReason::Dominated)),
                    InsertOutcome::Inserted { .. } if set.len() > 1 => Ok(Decision::Conflict(set)),
                    InsertOutcome::Inserted { .. } => {
                        let id = set.id().to_string();
                        set.into_members().pop().map(Decision::Accept).ok_or_else(|| {
                            ReplicationError::InvariantViolation(format!("conflict set for {} emptied", id))
                        })
                    }
                }
            }
        }
    }
}

fn rejection_against(set: &ConflictSet, incoming: &VersionedItem) -> Option<RejectReason> {
    let mut reason = None;
    for member in set.members() {
        match incoming.compare(member) {
            VectorOrdering::Equal => return Some(RejectReason::AlreadyApplied),
            VectorOrdering::Dominated => reason = Some(RejectReason::Dominated),
            _ => {}
        }
    }
    reason
}
