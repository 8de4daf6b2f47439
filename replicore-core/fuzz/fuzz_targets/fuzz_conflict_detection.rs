#![no_main]

use libfuzzer_sys::fuzz_target;
use replicore_core::core_replication::{
    ChangeVector, ConflictDetector, Decision, LocalState, RawChangeVectorEntry, Timestamp, VersionedItem,
};
use uuid::Uuid;

/// Every two bytes are one (node, counter) entry of a version; a zero byte
/// ends the version
fn versions(data: &[u8]) -> Vec<VersionedItem> {
    data.split(|b| *b == 0)
        .filter_map(|chunk| {
            let raw = chunk
                .chunks_exact(2)
                .map(|pair| RawChangeVectorEntry::new(Uuid::from_bytes([pair[0] % 8; 16]), (pair[1] % 16) as i64 + 1));
            let cv = ChangeVector::try_from_entries(raw).ok()?;
            let tombstone = chunk.len() % 3 == 0;
            Some(if tombstone {
                VersionedItem::tombstone("d", "Fuzz", cv, Timestamp(chunk.len() as u64))
            } else {
                VersionedItem::document("d", "Fuzz", chunk.to_vec(), cv, Timestamp(chunk.len() as u64))
            })
        })
        .collect()
}

fuzz_target!(|data: &[u8]| {
    let detector = ConflictDetector::new();
    let mut local = LocalState::Clean(None);

    for incoming in versions(data) {
        match detector.process(incoming, local.clone()) {
            Ok(Decision::Accept(item)) => local = LocalState::Clean(Some(item)),
            Ok(Decision::Reject(_)) => {}
            Ok(Decision::Conflict(set)) => {
                assert!(set.len() >= 2);
                assert!(set.is_antichain());
                local = LocalState::Conflicted(set);
            }
            Err(_) => {}
        }
    }
});
