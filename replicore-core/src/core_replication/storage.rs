/*
    storage.rs - Document storage collaborator

    The core never persists data itself. It reads the current version of a
    document and hands accepted or resolved versions to an implementation
    of `DocumentStorage`. Writes are atomic per call.
*/

use super::errors::StorageError;
use super::item::{DocumentId, VersionedItem};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistence interface used by the replication processor
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Current version of `id`: a live document, a tombstone, or nothing
    async fn get(&self, id: &str) -> Result<Option<VersionedItem>, StorageError>;

    /// Store a live document, replacing whatever was there
    async fn put(&self, item: VersionedItem) -> Result<(), StorageError>;

    /// Remove the live document and keep `tombstone` with its vector
    async fn delete(&self, tombstone: VersionedItem) -> Result<(), StorageError>;

    /// Ids whose current version is a tombstone, sorted
    async fn tombstones(&self) -> Result<Vec<DocumentId>, StorageError>;
}

/// In-memory storage for tests and offline replay
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<DocumentId, VersionedItem>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Every stored version, sorted by id
    pub async fn dump(&self) -> Vec<VersionedItem> {
        let items = self.items.read().await;
        let mut all: Vec<VersionedItem> = items.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[async_trait]
impl DocumentStorage for MemoryStorage {
    async fn get(&self, id: &str) -> Result<Option<VersionedItem>, StorageError> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn put(&self, item: VersionedItem) -> Result<(), StorageError> {
        if item.is_tombstone() {
            return Err(StorageError::WriteFailed {
                id: item.id,
                reason: "tombstones are written through delete".to_string(),
            });
        }
        self.items.write().await.insert(item.id.clone(), item);
        Ok(())
    }

    async fn delete(&self, tombstone: VersionedItem) -> Result<(), StorageError> {
        if !tombstone.is_tombstone() {
            return Err(StorageError::WriteFailed {
                id: tombstone.id,
                reason: "delete requires a tombstone".to_string(),
            });
        }
        self.items.write().await.insert(tombstone.id.clone(), tombstone);
        Ok(())
    }

    async fn tombstones(&self) -> Result<Vec<DocumentId>, StorageError> {
        let items = self.items.read().await;
        let mut ids: Vec<DocumentId> = items
            .values()
            .filter(|item| item.is_tombstone())
            .map(|item| item.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::{doc, tombstone};

    #[tokio::test]
    async fn test_put_and_get() {
        let storage = MemoryStorage::new();
        assert!(storage.get("d").await.unwrap().is_none());

        let item = doc("d", "Users", &[(1, 1)], 1);
        storage.put(item.clone()).await.unwrap();
        assert_eq!(storage.get("d").await.unwrap(), Some(item));
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_keeps_tombstone() {
        let storage = MemoryStorage::new();
        storage.put(doc("d", "Users", &[(1, 1)], 1)).await.unwrap();
        storage.delete(tombstone("d", "Users", &[(1, 2)], 2)).await.unwrap();

        let current = storage.get("d").await.unwrap().unwrap();
        assert!(current.is_tombstone());
        assert_eq!(storage.tombstones().await.unwrap(), vec!["d".to_string()]);
    }

    #[tokio::test]
    async fn test_put_rejects_tombstone() {
        let storage = MemoryStorage::new();
        let result = storage.put(tombstone("d", "Users", &[(1, 1)], 1)).await;
        assert!(matches!(result, Err(StorageError::WriteFailed { .. })));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_after_delete_revives() {
        let storage = MemoryStorage::new();
        storage.delete(tombstone("d", "Users", &[(1, 1)], 1)).await.unwrap();
        storage.put(doc("d", "Users", &[(1, 2)], 2)).await.unwrap();
        assert!(storage.tombstones().await.unwrap().is_empty());
    }
}
