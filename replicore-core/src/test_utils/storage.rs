//! Storage doubles for error-path tests

use crate::core_replication::{DocumentId, DocumentStorage, MemoryStorage, StorageError, VersionedItem};
use async_trait::async_trait;
use std::collections::HashSet;

/// Memory storage whose writes fail for selected ids
#[derive(Debug, Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    failing: HashSet<DocumentId>,
}

impl FailingStorage {
    pub fn failing_writes_for<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DocumentId>,
    {
        Self { inner: MemoryStorage::new(), failing: ids.into_iter().map(Into::into).collect() }
    }

    fn check(&self, id: &str) -> Result<(), StorageError> {
        if self.failing.contains(id) {
            return Err(StorageError::WriteFailed { id: id.to_string(), reason: "disk full".to_string() });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStorage for FailingStorage {
    async fn get(&self, id: &str) -> Result<Option<VersionedItem>, StorageError> {
        self.inner.get(id).await
    }

    async fn put(&self, item: VersionedItem) -> Result<(), StorageError> {
        self.check(&item.id)?;
        self.inner.put(item).await
    }

    async fn delete(&self, tombstone: VersionedItem) -> Result<(), StorageError> {
        self.check(&tombstone.id)?;
        self.inner.delete(tombstone).await
    }

    async fn tombstones(&self) -> Result<Vec<DocumentId>, StorageError> {
        self.inner.tombstones().await
    }
}
