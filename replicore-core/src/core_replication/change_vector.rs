/*
    change_vector.rs - Causality marker for replicated documents

    A change vector records, per node, the highest write counter (etag)
    observed from that node. Comparing two vectors tells whether one
    version causally supersedes the other or whether they are concurrent:
    - Equal
    - Dominates / Dominated
    - Concurrent (a real write conflict)

    Vectors are immutable values. New ones come from an authoring node
    bumping its own counter, from merging, or from validated decoding of
    a vector received over the wire.
*/

use super::errors::ChangeVectorError;
use super::hashing::{xxhash64, combine64};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Identifier of a replicating node
pub type NodeId = Uuid;

/// One (node, counter) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeVectorEntry {
    pub node: NodeId,
    pub etag: u64,
}

/// Entry as it arrives from the wire, before validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChangeVectorEntry {
    pub node: NodeId,
    pub etag: i64,
}

impl RawChangeVectorEntry {
    pub fn new(node: NodeId, etag: i64) -> Self {
        Self { node, etag }
    }
}

impl From<ChangeVectorEntry> for RawChangeVectorEntry {
    fn from(entry: ChangeVectorEntry) -> Self {
        // Wire counters are signed; saturate the (unreachable in practice) upper half
        let etag = i64::try_from(entry.etag).unwrap_or(i64::MAX);
        Self { node: entry.node, etag }
    }
}

/// Causal relation of one vector to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorOrdering {
    Equal,
    Dominates,
    Dominated,
    Concurrent,
}

impl VectorOrdering {
    /// The relation seen from the other operand
    pub fn reverse(self) -> Self {
        match self {
            VectorOrdering::Dominates => VectorOrdering::Dominated,
            VectorOrdering::Dominated => VectorOrdering::Dominates,
            other => other,
        }
    }
}

/// Change vector: entries sorted by node id, at most one per node,
/// zero counters omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<RawChangeVectorEntry>", into = "Vec<ChangeVectorEntry>")]
pub struct ChangeVector {
    entries: Vec<ChangeVectorEntry>,
}

/// Walk two sorted entry lists in lockstep, yielding (node, left, right)
/// with absent counters reported as 0.
fn walk(
    left: &[ChangeVectorEntry],
    right: &[ChangeVectorEntry],
    mut visit: impl FnMut(NodeId, u64, u64) -> bool,
) {
    let (mut i, mut j) = (0, 0);
    loop {
        let (node, a, b) = match (left.get(i), right.get(j)) {
            (Some(l), Some(r)) if l.node == r.node => {
                i += 1;
                j += 1;
                (l.node, l.etag, r.etag)
            }
            (Some(l), Some(r)) if l.node < r.node => {
                i += 1;
                (l.node, l.etag, 0)
            }
            (Some(l), None) => {
                i += 1;
                (l.node, l.etag, 0)
            }
            (_, Some(r)) => {
                j += 1;
                (r.node, 0, r.etag)
            }
            (None, None) => return,
        };
        if !visit(node, a, b) {
            return;
        }
    }
}

impl ChangeVector {
    /// Vector of the first write authored by `node`
    pub fn authored(node: NodeId) -> Self {
        ChangeVector { entries: vec![ChangeVectorEntry { node, etag: 1 }] }
    }

    /// Validate a vector received from another node.
    ///
    /// Rejects duplicate node ids, negative counters and vectors that carry
    /// no causal history at all.
    pub fn try_from_entries(
        raw: impl IntoIterator<Item = RawChangeVectorEntry>,
    ) -> Result<Self, ChangeVectorError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for entry in raw {
            if !seen.insert(entry.node) {
                return Err(ChangeVectorError::DuplicateNode(entry.node));
            }
            let etag = u64::try_from(entry.etag).map_err(|_| ChangeVectorError::NegativeCounter {
                node: entry.node,
                etag: entry.etag,
            })?;
            if etag > 0 {
                entries.push(ChangeVectorEntry { node: entry.node, etag });
            }
        }

        if entries.is_empty() {
            return Err(ChangeVectorError::Empty);
        }

        entries.sort_unstable_by_key(|e| e.node);
        Ok(ChangeVector { entries })
    }

    /// Counter recorded for `node` (0 when absent)
    pub fn get(&self, node: &NodeId) -> u64 {
        self.entries
            .binary_search_by(|e| e.node.cmp(node))
            .map(|idx| self.entries[idx].etag)
            .unwrap_or(0)
    }

    pub fn entries(&self) -> &[ChangeVectorEntry] {
        &self.entries
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.iter().map(|e| &e.node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Causal comparison of `self` against `other`
    pub fn compare(&self, other: &ChangeVector) -> VectorOrdering {
        let mut greater = false;
        let mut less = false;

        walk(&self.entries, &other.entries, |_, a, b| {
            match a.cmp(&b) {
                Ordering::Greater => greater = true,
                Ordering::Less => less = true,
                Ordering::Equal => {}
            }
            // Stop as soon as the answer is known to be Concurrent
            !(greater && less)
        });

        match (greater, less) {
            (false, false) => VectorOrdering::Equal,
            (true, false) => VectorOrdering::Dominates,
            (false, true) => VectorOrdering::Dominated,
            (true, true) => VectorOrdering::Concurrent,
        }
    }

    pub fn dominates(&self, other: &ChangeVector) -> bool {
        self.compare(other) == VectorOrdering::Dominates
    }

    pub fn is_concurrent_with(&self, other: &ChangeVector) -> bool {
        self.compare(other) == VectorOrdering::Concurrent
    }

    /// Per-node maximum of both vectors
    pub fn merge(&self, other: &ChangeVector) -> ChangeVector {
        let mut entries = Vec::with_capacity(self.entries.len().max(other.entries.len()));
        walk(&self.entries, &other.entries, |node, a, b| {
            entries.push(ChangeVectorEntry { node, etag: a.max(b) });
            true
        });
        ChangeVector { entries }
    }

    /// Merge of every vector yielded by `vectors`
    pub fn merge_all<'a>(vectors: impl IntoIterator<Item = &'a ChangeVector>) -> ChangeVector {
        vectors
            .into_iter()
            .fold(ChangeVector::default(), |acc, cv| acc.merge(cv))
    }

    /// New vector with `node`'s counter advanced by one
    pub fn increment(&self, node: NodeId) -> Result<ChangeVector, ChangeVectorError> {
        let mut entries = self.entries.clone();
        match entries.binary_search_by(|e| e.node.cmp(&node)) {
            Ok(idx) => {
                entries[idx].etag = entries[idx]
                    .etag
                    .checked_add(1)
                    .ok_or(ChangeVectorError::CounterOverflow(node))?;
            }
            Err(idx) => entries.insert(idx, ChangeVectorEntry { node, etag: 1 }),
        }
        Ok(ChangeVector { entries })
    }

    /// Entry with the highest counter; among equal counters the greatest node id
    pub fn highest_entry(&self) -> Option<&ChangeVectorEntry> {
        self.entries.iter().max_by(|a, b| a.etag.cmp(&b.etag).then(a.node.cmp(&b.node)))
    }

    /// Total order over vectors, independent of causality. Used only to put
    /// concurrent versions into a stable sequence.
    pub fn canonical_cmp(&self, other: &ChangeVector) -> Ordering {
        self.entries.cmp(&other.entries)
    }

    /// Canonical byte encoding: 16 node bytes then the little-endian counter,
    /// per entry in node order
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 24);
        for entry in &self.entries {
            out.extend_from_slice(entry.node.as_bytes());
            out.extend_from_slice(&entry.etag.to_le_bytes());
        }
        out
    }

    /// XXHash64 of the canonical encoding
    pub fn fingerprint(&self) -> u64 {
        xxhash64(&self.to_bytes(), 0)
    }

    /// Fingerprint folded with a seed, for combining several vectors
    pub fn fingerprint_with(&self, seed: u64) -> u64 {
        combine64(seed, self.fingerprint())
    }
}

impl TryFrom<Vec<RawChangeVectorEntry>> for ChangeVector {
    type Error = ChangeVectorError;

    fn try_from(raw: Vec<RawChangeVectorEntry>) -> Result<Self, Self::Error> {
        ChangeVector::try_from_entries(raw)
    }
}

impl From<ChangeVector> for Vec<ChangeVectorEntry> {
    fn from(cv: ChangeVector) -> Self {
        cv.entries
    }
}

impl fmt::Display for ChangeVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", entry.node, entry.etag)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> NodeId {
        Uuid::from_bytes([n; 16])
    }

    fn cv(pairs: &[(u8, i64)]) -> ChangeVector {
        ChangeVector::try_from_entries(pairs.iter().map(|&(n, e)| RawChangeVectorEntry::new(node(n), e)))
            .unwrap()
    }

    #[test]
    fn test_authored_vector() {
        let vc = ChangeVector::authored(node(1));
        assert_eq!(vc.get(&node(1)), 1);
        assert_eq!(vc.len(), 1);
    }

    #[test]
    fn test_get_nonexistent() {
        let vc = cv(&[(1, 3)]);
        assert_eq!(vc.get(&node(9)), 0);
    }

    #[test]
    fn test_entries_are_sorted() {
        let vc = cv(&[(3, 1), (1, 2), (2, 5)]);
        let nodes: Vec<_> = vc.nodes().copied().collect();
        assert_eq!(nodes, vec![node(1), node(2), node(3)]);
    }

    #[test]
    fn test_zero_counters_are_dropped() {
        let vc = cv(&[(1, 0), (2, 4)]);
        assert_eq!(vc.len(), 1);
        assert_eq!(vc, cv(&[(2, 4)]));
    }

    #[test]
    fn test_rejects_duplicate_node() {
        let raw = vec![RawChangeVectorEntry::new(node(1), 1), RawChangeVectorEntry::new(node(1), 2)];
        assert_eq!(
            ChangeVector::try_from_entries(raw),
            Err(ChangeVectorError::DuplicateNode(node(1)))
        );
    }

    #[test]
    fn test_rejects_negative_counter() {
        let raw = vec![RawChangeVectorEntry::new(node(1), -4)];
        assert!(matches!(
            ChangeVector::try_from_entries(raw),
            Err(ChangeVectorError::NegativeCounter { etag: -4, .. })
        ));
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(ChangeVector::try_from_entries(Vec::new()), Err(ChangeVectorError::Empty));
        let all_zero = vec![RawChangeVectorEntry::new(node(1), 0)];
        assert_eq!(ChangeVector::try_from_entries(all_zero), Err(ChangeVectorError::Empty));
    }

    #[test]
    fn test_compare() {
        let a = cv(&[(1, 1)]);
        let b = cv(&[(1, 2)]);
        assert_eq!(a.compare(&b), VectorOrdering::Dominated);
        assert_eq!(b.compare(&a), VectorOrdering::Dominates);
        assert_eq!(a.compare(&a.clone()), VectorOrdering::Equal);
    }

    #[test]
    fn test_compare_concurrent() {
        let a = cv(&[(1, 2), (2, 1)]);
        let b = cv(&[(1, 1), (2, 2)]);
        assert_eq!(a.compare(&b), VectorOrdering::Concurrent);
        assert!(a.is_concurrent_with(&b));
    }

    #[test]
    fn test_compare_with_missing_nodes() {
        let a = cv(&[(1, 1)]);
        let b = cv(&[(1, 1), (2, 1)]);
        assert_eq!(a.compare(&b), VectorOrdering::Dominated);
        assert!(b.dominates(&a));

        // Disjoint nodes never dominate each other
        let c = cv(&[(3, 1)]);
        assert_eq!(a.compare(&c), VectorOrdering::Concurrent);
    }

    #[test]
    fn test_merge() {
        let a = cv(&[(1, 3), (2, 1)]);
        let b = cv(&[(1, 2), (2, 4), (3, 1)]);
        let merged = a.merge(&b);
        assert_eq!(merged.get(&node(1)), 3);
        assert_eq!(merged.get(&node(2)), 4);
        assert_eq!(merged.get(&node(3)), 1);
    }

    #[test]
    fn test_merge_all() {
        let merged = ChangeVector::merge_all([&cv(&[(1, 1)]), &cv(&[(2, 2)]), &cv(&[(1, 5)])]);
        assert_eq!(merged, cv(&[(1, 5), (2, 2)]));
        assert!(ChangeVector::merge_all(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_increment() {
        let vc = cv(&[(2, 4)]);
        let bumped = vc.increment(node(2)).unwrap();
        assert_eq!(bumped.get(&node(2)), 5);
        assert!(bumped.dominates(&vc));

        let fresh = vc.increment(node(1)).unwrap();
        assert_eq!(fresh.get(&node(1)), 1);
        assert_eq!(fresh.entries()[0].node, node(1));
    }

    #[test]
    fn test_increment_overflow() {
        let vc = ChangeVector { entries: vec![ChangeVectorEntry { node: node(1), etag: u64::MAX }] };
        assert_eq!(vc.increment(node(1)), Err(ChangeVectorError::CounterOverflow(node(1))));
    }

    #[test]
    fn test_highest_entry_prefers_greatest_node_on_tie() {
        let vc = cv(&[(1, 7), (4, 7), (2, 3)]);
        assert_eq!(vc.highest_entry().map(|e| e.node), Some(node(4)));
    }

    #[test]
    fn test_fingerprint_depends_on_content() {
        let a = cv(&[(1, 1), (2, 2)]);
        let b = cv(&[(2, 2), (1, 1)]);
        let c = cv(&[(1, 1), (2, 3)]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let vc = cv(&[(1, 2), (2, 9)]);
        let json = serde_json::to_string(&vc).unwrap();
        let back: ChangeVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vc);

        let dup = format!(
            r#"[{{"node":"{0}","etag":1}},{{"node":"{0}","etag":2}}]"#,
            node(1)
        );
        assert!(serde_json::from_str::<ChangeVector>(&dup).is_err());
    }

    #[test]
    fn test_display() {
        let vc = cv(&[(1, 2)]);
        assert_eq!(vc.to_string(), format!("{}:2", node(1)));
    }
}
