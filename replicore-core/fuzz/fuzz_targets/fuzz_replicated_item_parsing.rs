#![no_main]

use libfuzzer_sys::fuzz_target;
use replicore_core::core_replication::{ReplicatedItem, VersionedItem};

fuzz_target!(|data: &[u8]| {
    // Transport batches are JSON; anything that parses must either validate
    // or be rejected without panicking
    if let Ok(json_str) = std::str::from_utf8(data) {
        if let Ok(items) = serde_json::from_str::<Vec<ReplicatedItem>>(json_str) {
            for raw in items {
                if let Ok(item) = VersionedItem::try_from(raw) {
                    assert!(item.validate().is_ok());
                    let back = ReplicatedItem::from(item.clone());
                    assert_eq!(VersionedItem::try_from(back).ok(), Some(item));
                }
            }
        }
    }
});
