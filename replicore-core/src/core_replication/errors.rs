/*
    errors.rs - Error types for the replication core

    Defines all error types that can occur in:
    - Change vector decoding and arithmetic
    - Incoming item validation
    - Script sandbox calls
    - Storage writes
    - Readers hitting an unresolved conflict
*/

use super::change_vector::{ChangeVector, NodeId};
use super::item::{DocumentId, VersionedItem};
use std::time::Duration;
use thiserror::Error;

/// Malformed change vectors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeVectorError {
    /// No entry with a positive counter
    #[error("change vector is empty")]
    Empty,

    /// Same node listed twice
    #[error("duplicate entry for node {0}")]
    DuplicateNode(NodeId),

    /// Counter below zero
    #[error("negative counter {etag} for node {node}")]
    NegativeCounter { node: NodeId, etag: i64 },

    /// Counter cannot be advanced any further
    #[error("counter overflow for node {0}")]
    CounterOverflow(NodeId),
}

/// Reasons an incoming item is rejected before touching any state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("document id is empty")]
    EmptyId,

    #[error("tombstone for {0} carries a payload")]
    TombstoneWithPayload(DocumentId),

    #[error("invalid change vector: {0}")]
    ChangeVector(#[from] ChangeVectorError),
}

/// Failures of the external script sandbox
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("script {script_id} timed out after {timeout:?}")]
    Timeout { script_id: String, timeout: Duration },

    #[error("script {script_id} failed: {reason}")]
    Failed { script_id: String, reason: String },

    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
}

/// Storage collaborator failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("read of {id} failed: {reason}")]
    ReadFailed { id: DocumentId, reason: String },

    #[error("write of {id} failed: {reason}")]
    WriteFailed { id: DocumentId, reason: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Raised to readers of a document whose versions are still in conflict.
///
/// Carries every conflicting version so the caller can resolve by writing a
/// version that dominates all of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("document {id} has {} conflicting versions", members.len())]
pub struct ConflictError {
    pub id: DocumentId,
    pub members: Vec<VersionedItem>,
}

impl ConflictError {
    pub fn change_vectors(&self) -> Vec<ChangeVector> {
        self.members.iter().map(|m| m.change_vector.clone()).collect()
    }
}

/// Errors surfaced by the replication core
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Item failed validation
    #[error("Malformed item: {0}")]
    Malformed(#[from] ItemError),

    /// Document is conflicted
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Storage I/O error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Local write could not derive a new vector
    #[error("Change vector error: {0}")]
    ChangeVector(#[from] ChangeVectorError),

    /// A conflict set would stop being an antichain
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for replication operations
pub type ReplicationResult<T> = Result<T, ReplicationError>;
