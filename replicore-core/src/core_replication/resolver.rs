/*
    resolver.rs - Turns a conflict set into one version, or reports why not

    Resolution is a pure function of (member set, policy) except for the
    script policy, whose determinism is the script author's job. Every
    resolved version carries the merge of all member vectors, so it
    dominates each member it replaces.

    Winner selection for latest-wins, in order:
    1. greatest last-modified timestamp
    2. greatest node id of each member's highest-counter entry
    3. greatest vector in canonical order
    4. tombstone over document
*/

use super::change_vector::ChangeVector;
use super::conflict_store::ConflictSet;
use super::errors::SandboxError;
use super::item::VersionedItem;
use super::policy::ResolutionPolicy;
use super::sandbox::{ScriptOutcome, ScriptRequest, ScriptSandbox};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a conflict set stays recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Manual resolution configured
    PolicyNone,
    /// Configuration error: no script mapped for the collection
    NoScriptForCollection { collection: String },
    /// Live members belong to different collections
    MixedCollections,
    /// Script ran and chose not to decide
    ScriptNoResult { script_id: String },
    /// Script raised an error or the sandbox refused the call
    ScriptFailed { script_id: String, error: String },
    /// Script exceeded its time budget
    ScriptTimedOut { script_id: String, timeout_ms: u64 },
}

impl UnresolvedReason {
    /// Script was invoked and did not produce a usable result
    pub fn is_script_failure(&self) -> bool {
        matches!(
            self,
            UnresolvedReason::ScriptFailed { .. } | UnresolvedReason::ScriptTimedOut { .. }
        )
    }
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::PolicyNone => write!(f, "manual resolution required"),
            UnresolvedReason::NoScriptForCollection { collection } => {
                write!(f, "no resolution script configured for collection {}", collection)
            }
            UnresolvedReason::MixedCollections => write!(f, "conflicting versions span several collections"),
            UnresolvedReason::ScriptNoResult { script_id } => write!(f, "script {} returned no result", script_id),
            UnresolvedReason::ScriptFailed { script_id, error } => write!(f, "script {} failed: {}", script_id, error),
            UnresolvedReason::ScriptTimedOut { script_id, timeout_ms } => {
                write!(f, "script {} timed out after {}ms", script_id, timeout_ms)
            }
        }
    }
}

/// Engine verdict for one conflict set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(VersionedItem),
    Unresolved(UnresolvedReason),
}

/// `Greater` when `a` beats `b` under latest-wins.
///
/// Every key survives restamping, so a winner carried forward from an
/// earlier resolution ranks exactly like the version it was taken from.
fn latest_cmp(a: &VersionedItem, b: &VersionedItem) -> Ordering {
    a.last_modified
        .cmp(&b.last_modified)
        .then_with(|| a.origin.cmp(&b.origin))
        .then_with(|| a.tombstone.cmp(&b.tombstone))
        .then_with(|| a.payload.cmp(&b.payload))
        .then_with(|| a.collection.cmp(&b.collection))
}

fn latest<'a>(members: impl Iterator<Item = &'a VersionedItem>) -> Option<&'a VersionedItem> {
    members.max_by(|a, b| latest_cmp(a, b))
}

/// Winner stamped with the merged vector of the whole set
fn restamp(winner: &VersionedItem, merged: ChangeVector) -> VersionedItem {
    VersionedItem { change_vector: merged, ..winner.clone() }
}

/// Pure latest-wins resolution
pub fn resolve_to_latest(set: &ConflictSet) -> Option<VersionedItem> {
    latest(set.members().iter()).map(|winner| restamp(winner, set.merged_vector()))
}

/// Pure tombstone-wins resolution, latest-wins among documents otherwise
pub fn resolve_to_tombstone(set: &ConflictSet) -> Option<VersionedItem> {
    let winner = latest(set.members().iter().filter(|m| m.is_tombstone()))
        .or_else(|| latest(set.members().iter()))?;
    Some(restamp(winner, set.merged_vector()))
}

/// Applies the configured policy to conflict sets
pub struct ResolutionPolicyEngine {
    policy: RwLock<ResolutionPolicy>,
    sandbox: Arc<dyn ScriptSandbox>,
    script_timeout: Duration,
}

impl fmt::Debug for ResolutionPolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionPolicyEngine")
            .field("policy", &self.policy())
            .field("script_timeout", &self.script_timeout)
            .finish()
    }
}

impl ResolutionPolicyEngine {
    pub fn new(policy: ResolutionPolicy, sandbox: Arc<dyn ScriptSandbox>, script_timeout: Duration) -> Self {
        Self { policy: RwLock::new(policy), sandbox, script_timeout }
    }

    /// Current policy
    pub fn policy(&self) -> ResolutionPolicy {
        match self.policy.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the policy. Existing conflicts are not revisited.
    pub fn set_policy(&self, policy: ResolutionPolicy) {
        info!(policy = policy.name(), "Resolution policy replaced");
        match self.policy.write() {
            Ok(mut guard) => *guard = policy,
            Err(poisoned) => *poisoned.into_inner() = policy,
        }
    }

    pub fn script_timeout(&self) -> Duration {
        self.script_timeout
    }

    /// Resolve under the current policy
    pub async fn resolve(&self, set: &ConflictSet) -> Resolution {
        let policy = self.policy();
        self.resolve_with(set, &policy).await
    }

    pub async fn resolve_with(&self, set: &ConflictSet, policy: &ResolutionPolicy) -> Resolution {
        let resolution = match policy {
            ResolutionPolicy::None => Resolution::Unresolved(UnresolvedReason::PolicyNone),
            ResolutionPolicy::ResolveToLatest => settle(resolve_to_latest(set)),
            ResolutionPolicy::ResolveToTombstone => settle(resolve_to_tombstone(set)),
            ResolutionPolicy::ScriptByCollection { .. } => self.run_script(set, policy).await,
        };

        debug!(
            doc_id = set.id(),
            policy = policy.name(),
            members = set.len(),
            resolved = matches!(resolution, Resolution::Resolved(_)),
            "Resolution attempted"
        );
        resolution
    }

    async fn run_script(&self, set: &ConflictSet, policy: &ResolutionPolicy) -> Resolution {
        if set.has_mixed_collections() {
            return Resolution::Unresolved(UnresolvedReason::MixedCollections);
        }
        let Some(collection) = set.collection().map(str::to_string) else {
            return Resolution::Unresolved(UnresolvedReason::PolicyNone);
        };
        let Some(script_id) = policy.script_for(&collection).map(str::to_string) else {
            warn!(doc_id = set.id(), collection = %collection, "No resolution script for collection");
            return Resolution::Unresolved(UnresolvedReason::NoScriptForCollection { collection });
        };

        let canonical = set.canonical_members();
        let request = ScriptRequest {
            script_id: script_id.clone(),
            document_id: set.id().to_string(),
            collection: collection.clone(),
            documents: canonical
                .iter()
                .filter(|m| !m.is_tombstone())
                .map(|m| m.payload.clone())
                .collect(),
            has_tombstone: set.contains_tombstone(),
        };

        let call = self.sandbox.execute(request, self.script_timeout);
        let outcome = match tokio::time::timeout(self.script_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::Timeout { script_id: script_id.clone(), timeout: self.script_timeout }),
        };

        let merged = set.merged_vector();
        let last_modified = set.latest_timestamp().unwrap_or_default();
        match outcome {
            Ok(ScriptOutcome::Document(body)) => Resolution::Resolved(VersionedItem::document(
                set.id(),
                collection,
                body,
                merged,
                last_modified,
            )),
            Ok(ScriptOutcome::Tombstone) => {
                Resolution::Resolved(VersionedItem::tombstone(set.id(), collection, merged, last_modified))
            }
            Ok(ScriptOutcome::NoResult) => {
                info!(doc_id = set.id(), script_id = %script_id, "Script left conflict unresolved");
                Resolution::Unresolved(UnresolvedReason::ScriptNoResult { script_id })
            }
            Err(SandboxError::Timeout { timeout, .. }) => {
                warn!(doc_id = set.id(), script_id = %script_id, ?timeout, "Resolution script timed out");
                Resolution::Unresolved(UnresolvedReason::ScriptTimedOut {
                    script_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(err) => {
                warn!(doc_id = set.id(), script_id = %script_id, error = %err, "Resolution script failed");
                Resolution::Unresolved(UnresolvedReason::ScriptFailed { script_id, error: err.to_string() })
            }
        }
    }
}

fn settle(winner: Option<VersionedItem>) -> Resolution {
    match winner {
        Some(item) => Resolution::Resolved(item),
        None => Resolution::Unresolved(UnresolvedReason::PolicyNone),
    }
}
