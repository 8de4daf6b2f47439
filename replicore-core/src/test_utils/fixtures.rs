//! Test fixtures for creating common test objects
//!
//! Node ids are derived from a single byte so tests can talk about
//! "node 1" and "node 2" and still get a total order that matches.

use crate::core_replication::{
    ChangeVector, NodeId, RawChangeVectorEntry, ReplicatedItem, Timestamp, VersionedItem,
};
use uuid::Uuid;

/// Node id whose 16 bytes are all `n`
pub fn node(n: u8) -> NodeId {
    Uuid::from_bytes([n; 16])
}

/// Raw entries for `pairs` of (node byte, counter)
pub fn raw_entries(pairs: &[(u8, i64)]) -> Vec<RawChangeVectorEntry> {
    pairs.iter().map(|&(n, etag)| RawChangeVectorEntry::new(node(n), etag)).collect()
}

/// Validated change vector; panics on malformed input
pub fn vector(pairs: &[(u8, i64)]) -> ChangeVector {
    match ChangeVector::try_from_entries(raw_entries(pairs)) {
        Ok(cv) => cv,
        Err(e) => panic!("invalid fixture vector {:?}: {}", pairs, e),
    }
}

/// Payload unique to (id, vector) so winners can be told apart
pub fn payload_for(id: &str, pairs: &[(u8, i64)]) -> Vec<u8> {
    format!("{{\"id\":\"{}\",\"cv\":\"{}\"}}", id, vector(pairs)).into_bytes()
}

/// Live document
pub fn doc(id: &str, collection: &str, pairs: &[(u8, i64)], ts: u64) -> VersionedItem {
    VersionedItem::document(id, collection, payload_for(id, pairs), vector(pairs), Timestamp(ts))
}

/// Tombstone
pub fn tombstone(id: &str, collection: &str, pairs: &[(u8, i64)], ts: u64) -> VersionedItem {
    VersionedItem::tombstone(id, collection, vector(pairs), Timestamp(ts))
}

/// Transport item; the vector is passed through unvalidated
pub fn raw(id: &str, collection: &str, pairs: &[(u8, i64)], ts: u64) -> ReplicatedItem {
    ReplicatedItem {
        id: id.to_string(),
        collection: collection.to_string(),
        payload: format!("{{\"id\":\"{}\"}}", id).into_bytes(),
        tombstone: false,
        change_vector: raw_entries(pairs),
        last_modified: Timestamp(ts),
        origin: None,
    }
}

/// Transport tombstone
pub fn raw_tombstone(id: &str, collection: &str, pairs: &[(u8, i64)], ts: u64) -> ReplicatedItem {
    ReplicatedItem {
        payload: Vec::new(),
        tombstone: true,
        ..raw(id, collection, pairs, ts)
    }
}
