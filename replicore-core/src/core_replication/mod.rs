/*
    core_replication - Conflict detection and resolution for replicated documents

    Layers, leaves first:
    - hashing / change_vector: causality algebra and fingerprints
    - item: versioned documents and tombstones
    - detector / conflict_store: accept, reject, or record concurrent versions
    - policy / resolver / sandbox: collapse conflicts into one version
    - processor: per-document serialised pipeline over storage
*/

pub mod change_vector;
pub mod conflict_store;
pub mod detector;
pub mod errors;
pub mod hashing;
pub mod item;
pub mod locks;
pub mod policy;
pub mod processor;
pub mod resolver;
pub mod sandbox;
pub mod status;
pub mod storage;

#[cfg(test)]
mod tests;

pub use change_vector::{ChangeVector, ChangeVectorEntry, NodeId, RawChangeVectorEntry, VectorOrdering};
pub use conflict_store::{ConflictSet, ConflictStore, InsertOutcome};
pub use detector::{ConflictDetector, Decision, LocalState, RejectReason};
pub use errors::{
    ChangeVectorError, ConflictError, ItemError, ReplicationError, ReplicationResult, SandboxError,
    StorageError,
};
pub use item::{DocumentId, ReplicatedItem, Timestamp, VersionedItem};
pub use locks::StripedLocks;
pub use policy::ResolutionPolicy;
pub use processor::{BatchReport, IncomingReplicationProcessor, ItemOutcome, ProcessorBuilder, Undecodable};
pub use resolver::{Resolution, ResolutionPolicyEngine, UnresolvedReason};
pub use sandbox::{NullSandbox, ScriptOutcome, ScriptRequest, ScriptSandbox};
pub use status::{CollectionStatus, ResolutionOutcome, ResolverStatus};
pub use storage::{DocumentStorage, MemoryStorage};
