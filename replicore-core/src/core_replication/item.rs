/*
    item.rs - Versioned documents and tombstones

    A live document and a tombstone share one shape; only the flag and the
    payload differ. Items coming from transport arrive as `ReplicatedItem`
    (raw, unvalidated change vector) and become `VersionedItem` only after
    validation.
*/

use super::change_vector::{ChangeVector, NodeId, RawChangeVectorEntry, VectorOrdering};
use super::errors::ItemError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Document identifier
pub type DocumentId = String;

/// Wall-clock last-modified time in milliseconds since epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current wall-clock time
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document version or a tombstone, stamped with its change vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedItem {
    pub id: DocumentId,
    pub collection: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub tombstone: bool,
    pub change_vector: ChangeVector,
    pub last_modified: Timestamp,
    /// Node credited with this version in latest-wins ties. Taken from the
    /// highest-counter entry when the version is authored and kept when a
    /// resolution restamps the vector.
    #[serde(default)]
    pub origin: NodeId,
}

/// Node of the highest-counter entry; nil for an empty vector
fn origin_of(change_vector: &ChangeVector) -> NodeId {
    change_vector.highest_entry().map(|e| e.node).unwrap_or_default()
}

impl VersionedItem {
    pub fn document(
        id: impl Into<DocumentId>,
        collection: impl Into<String>,
        payload: Vec<u8>,
        change_vector: ChangeVector,
        last_modified: Timestamp,
    ) -> Self {
        VersionedItem {
            id: id.into(),
            collection: collection.into(),
            payload,
            tombstone: false,
            origin: origin_of(&change_vector),
            change_vector,
            last_modified,
        }
    }

    pub fn tombstone(
        id: impl Into<DocumentId>,
        collection: impl Into<String>,
        change_vector: ChangeVector,
        last_modified: Timestamp,
    ) -> Self {
        VersionedItem {
            id: id.into(),
            collection: collection.into(),
            payload: Vec::new(),
            tombstone: true,
            origin: origin_of(&change_vector),
            change_vector,
            last_modified,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// Causal relation of this version to `other`
    pub fn compare(&self, other: &VersionedItem) -> VectorOrdering {
        self.change_vector.compare(&other.change_vector)
    }

    /// Structural checks the change vector type cannot express
    pub fn validate(&self) -> Result<(), ItemError> {
        if self.id.is_empty() {
            return Err(ItemError::EmptyId);
        }
        if self.tombstone && !self.payload.is_empty() {
            return Err(ItemError::TombstoneWithPayload(self.id.clone()));
        }
        if self.change_vector.is_empty() {
            return Err(super::errors::ChangeVectorError::Empty.into());
        }
        Ok(())
    }

    /// Stable total order used to sequence concurrent versions
    pub fn canonical_cmp(&self, other: &VersionedItem) -> Ordering {
        self.change_vector
            .canonical_cmp(&other.change_vector)
            .then_with(|| other.tombstone.cmp(&self.tombstone))
            .then_with(|| self.last_modified.cmp(&other.last_modified))
            .then_with(|| self.collection.cmp(&other.collection))
            .then_with(|| self.payload.cmp(&other.payload))
    }
}

/// Item as handed over by transport, before validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedItem {
    pub id: DocumentId,
    pub collection: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub tombstone: bool,
    pub change_vector: Vec<RawChangeVectorEntry>,
    pub last_modified: Timestamp,
    /// Tie-break node of a resolved version; derived from the vector when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<NodeId>,
}

impl TryFrom<ReplicatedItem> for VersionedItem {
    type Error = ItemError;

    fn try_from(raw: ReplicatedItem) -> Result<Self, Self::Error> {
        let change_vector = ChangeVector::try_from_entries(raw.change_vector)?;
        let item = VersionedItem {
            id: raw.id,
            collection: raw.collection,
            payload: raw.payload,
            tombstone: raw.tombstone,
            origin: raw.origin.unwrap_or_else(|| origin_of(&change_vector)),
            change_vector,
            last_modified: raw.last_modified,
        };
        item.validate()?;
        Ok(item)
    }
}

impl From<VersionedItem> for ReplicatedItem {
    fn from(item: VersionedItem) -> Self {
        ReplicatedItem {
            id: item.id,
            collection: item.collection,
            payload: item.payload,
            tombstone: item.tombstone,
            change_vector: item
                .change_vector
                .entries()
                .iter()
                .copied()
                .map(RawChangeVectorEntry::from)
                .collect(),
            last_modified: item.last_modified,
            origin: Some(item.origin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_replication::errors::ChangeVectorError;
    use uuid::Uuid;

    fn node(n: u8) -> NodeId {
        Uuid::from_bytes([n; 16])
    }

    fn raw(id: &str, entries: &[(u8, i64)]) -> ReplicatedItem {
        ReplicatedItem {
            id: id.to_string(),
            collection: "Users".to_string(),
            payload: b"{}".to_vec(),
            tombstone: false,
            change_vector: entries.iter().map(|&(n, e)| RawChangeVectorEntry::new(node(n), e)).collect(),
            last_modified: Timestamp(10),
            origin: None,
        }
    }

    #[test]
    fn test_valid_item_converts() {
        let item = VersionedItem::try_from(raw("users/1", &[(1, 1), (2, 3)])).unwrap();
        assert_eq!(item.id, "users/1");
        assert_eq!(item.change_vector.get(&node(2)), 3);
        assert!(!item.is_tombstone());
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let err = VersionedItem::try_from(raw("users/1", &[(1, 1), (1, 2)])).unwrap_err();
        assert_eq!(err, ItemError::ChangeVector(ChangeVectorError::DuplicateNode(node(1))));
    }

    #[test]
    fn test_empty_id_rejected() {
        let err = VersionedItem::try_from(raw("", &[(1, 1)])).unwrap_err();
        assert_eq!(err, ItemError::EmptyId);
    }

    #[test]
    fn test_tombstone_with_payload_rejected() {
        let mut item = raw("users/1", &[(1, 1)]);
        item.tombstone = true;
        let err = VersionedItem::try_from(item).unwrap_err();
        assert!(matches!(err, ItemError::TombstoneWithPayload(_)));
    }

    #[test]
    fn test_round_trip_to_wire_shape() {
        let item = VersionedItem::try_from(raw("users/1", &[(2, 5)])).unwrap();
        let back = VersionedItem::try_from(ReplicatedItem::from(item.clone())).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_origin_follows_highest_entry() {
        let item = VersionedItem::try_from(raw("users/1", &[(1, 5), (3, 1)])).unwrap();
        assert_eq!(item.origin, node(1));
    }

    #[test]
    fn test_origin_survives_restamp_over_wire() {
        // Goal: A restamped winner keeps its tie-break node on every hop
        let item = VersionedItem::try_from(raw("users/1", &[(1, 1)])).unwrap();
        let other = ChangeVector::try_from_entries(vec![RawChangeVectorEntry::new(node(3), 4)]).unwrap();
        let merged = item.change_vector.merge(&other);
        let restamped = VersionedItem { change_vector: merged, ..item };
        assert_eq!(restamped.change_vector.highest_entry().map(|e| e.node), Some(node(3)));

        let received = VersionedItem::try_from(ReplicatedItem::from(restamped.clone())).unwrap();
        assert_eq!(received.origin, node(1));
        assert_eq!(received, restamped);
    }

    #[test]
    fn test_canonical_order_puts_tombstone_first_on_equal_vectors() {
        let cv = ChangeVector::authored(node(1));
        let doc = VersionedItem::document("d", "c", b"x".to_vec(), cv.clone(), Timestamp(1));
        let tomb = VersionedItem::tombstone("d", "c", cv, Timestamp(1));
        assert_eq!(tomb.canonical_cmp(&doc), Ordering::Less);
    }
}
