//! JSON shapes of the replay input and report output
//!
//! Payloads travel as base64 strings so batches stay readable.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use replicore_core::core_replication::{
    BatchReport, ConflictSet, NodeId, RawChangeVectorEntry, ReplicatedItem, ResolverStatus, Timestamp,
    Undecodable,
};
use replicore_core::metrics::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of a replay file: an item as delivered by `source`.
/// The item stays untyped until its own decode so one bad item cannot
/// sink the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub source: NodeId,
    #[serde(default)]
    pub item: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireItem {
    pub id: String,
    pub collection: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub tombstone: bool,
    pub change_vector: Vec<RawChangeVectorEntry>,
    pub last_modified: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<NodeId>,
}

impl WireItem {
    pub fn into_replicated(self) -> Result<ReplicatedItem> {
        let payload = STANDARD
            .decode(self.payload.as_bytes())
            .with_context(|| format!("payload of {} is not valid base64", self.id))?;
        Ok(ReplicatedItem {
            id: self.id,
            collection: self.collection,
            payload,
            tombstone: self.tombstone,
            change_vector: self.change_vector,
            last_modified: Timestamp(self.last_modified),
            origin: self.origin,
        })
    }
}

/// Decode one untyped item; failures keep whatever id could be read
pub fn decode_item(item: Value) -> std::result::Result<ReplicatedItem, Undecodable> {
    let id = item.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    serde_json::from_value::<WireItem>(item)
        .context("item does not match the wire shape")
        .and_then(WireItem::into_replicated)
        .map_err(|err| Undecodable { id, reason: format!("{:#}", err) })
}

/// One version held in a conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireVersion {
    pub change_vector: String,
    pub tombstone: bool,
    pub last_modified: u64,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireConflict {
    pub id: String,
    pub versions: Vec<WireVersion>,
}

impl From<&ConflictSet> for WireConflict {
    fn from(set: &ConflictSet) -> Self {
        let versions = set
            .canonical_members()
            .into_iter()
            .map(|member| WireVersion {
                change_vector: member.change_vector.to_string(),
                tombstone: member.tombstone,
                last_modified: member.last_modified.as_millis(),
                payload: STANDARD.encode(&member.payload),
            })
            .collect();
        WireConflict { id: set.id().to_string(), versions }
    }
}

/// Record that names no readable source, so it belongs to no batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadableRecord {
    /// Position in the replay file
    pub index: usize,
    pub reason: String,
}

/// Everything `replay` prints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub batches: Vec<BatchReport>,
    #[serde(default)]
    pub unreadable: Vec<UnreadableRecord>,
    pub conflicts: Vec<WireConflict>,
    pub tombstones: Vec<String>,
    pub status: ResolverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

pub type Deliveries = Vec<std::result::Result<ReplicatedItem, Undecodable>>;

/// Replay file split per source
#[derive(Debug, Default)]
pub struct GroupedRecords {
    /// Each group in file order; sources in order of first appearance
    pub groups: Vec<(NodeId, Deliveries)>,
    pub unreadable: Vec<UnreadableRecord>,
}

/// Decode records one at a time. Bad items stay in their source's group as
/// decode failures; records without a readable source are set aside.
pub fn group_by_source(records: Vec<Value>) -> GroupedRecords {
    let mut grouped = GroupedRecords::default();
    for (index, value) in records.into_iter().enumerate() {
        let record = match serde_json::from_value::<ReplayRecord>(value) {
            Ok(record) => record,
            Err(err) => {
                grouped.unreadable.push(UnreadableRecord { index, reason: err.to_string() });
                continue;
            }
        };
        let item = decode_item(record.item);
        match grouped.groups.iter_mut().find(|(source, _)| *source == record.source) {
            Some((_, items)) => items.push(item),
            None => grouped.groups.push((record.source, vec![item])),
        }
    }
    grouped
}
