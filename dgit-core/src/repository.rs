//! In-memory repository implementation
//!
//! Keeps objects, refs and ref logs in memory. Used for tests and for
//! throw-away synchronizations.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::object::{ObjectId, ObjectKind};
use crate::storage::{ObjectStore, RefLogEntry, RefStore, Result, StorageError};

/// In-memory repository
#[derive(Default)]
pub struct MemoryRepository {
    /// Object storage
    objects: Arc<RwLock<HashMap<ObjectId, (ObjectKind, Bytes)>>>,

    /// Ref name -> target
    refs: Arc<RwLock<HashMap<String, ObjectId>>>,

    /// Ref name -> log, oldest first
    reflogs: Arc<RwLock<HashMap<String, Vec<RefLogEntry>>>>,
}

impl MemoryRepository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryRepository {
    async fn get(&self, id: ObjectId) -> Result<(ObjectKind, Bytes)> {
        self.objects
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    async fn exists(&self, id: ObjectId) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(&id))
    }

    async fn put(&self, kind: ObjectKind, data: Bytes) -> Result<ObjectId> {
        let id = ObjectId::for_object(kind, &data);
        self.objects.write().await.entry(id).or_insert((kind, data));
        Ok(id)
    }
}

#[async_trait]
impl RefStore for MemoryRepository {
    async fn read_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        Ok(self.refs.read().await.get(name).copied())
    }

    async fn update_ref(&self, name: &str, expected: Option<ObjectId>, new_id: ObjectId) -> Result<()> {
        let mut refs = self.refs.write().await;
        let actual = refs.get(name).copied();
        if actual != expected {
            return Err(StorageError::RefConflict {
                name: name.to_string(),
                expected,
                actual,
            });
        }
        refs.insert(name.to_string(), new_id);
        Ok(())
    }

    async fn force_update_ref(&self, name: &str, new_id: ObjectId, log: RefLogEntry) -> Result<()> {
        self.refs.write().await.insert(name.to_string(), new_id);
        self.reflogs
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .push(log);
        Ok(())
    }

    async fn reflog(&self, name: &str) -> Result<Vec<RefLogEntry>> {
        Ok(self.reflogs.read().await.get(name).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Signature, Tree};

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let repo = MemoryRepository::new();
        let id1 = repo.put(ObjectKind::Blob, Bytes::from_static(b"data")).await.unwrap();
        let id2 = repo.put(ObjectKind::Blob, Bytes::from_static(b"data")).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(repo.object_count().await, 1);
        assert_eq!(repo.read_blob(id1).await.unwrap().data, b"data");
    }

    #[tokio::test]
    async fn test_read_with_wrong_kind_fails() {
        let repo = MemoryRepository::new();
        let id = repo.put(ObjectKind::Tree, Bytes::from(Tree::new().encode())).await.unwrap();
        assert!(repo.read_tree(id).await.unwrap().is_empty());
        assert!(matches!(
            repo.read_commit(id).await,
            Err(StorageError::UnexpectedKind { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_ref_compare_and_swap() {
        let repo = MemoryRepository::new();
        let a = ObjectId::new([1u8; 20]);
        let b = ObjectId::new([2u8; 20]);

        repo.update_ref("refs/heads/main", None, a).await.unwrap();
        let err = repo.update_ref("refs/heads/main", None, b).await.unwrap_err();
        assert!(matches!(err, StorageError::RefConflict { actual: Some(id), .. } if id == a));

        repo.update_ref("refs/heads/main", Some(a), b).await.unwrap();
        assert_eq!(repo.read_ref("refs/heads/main").await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn test_force_update_appends_reflog() {
        let repo = MemoryRepository::new();
        let a = ObjectId::new([1u8; 20]);
        let who = Signature::new("user", "user@example.com", 0, 0);
        for message in ["one", "two"] {
            let log = RefLogEntry {
                old_id: repo.read_ref("refs/stash").await.unwrap(),
                new_id: a,
                who: who.clone(),
                message: message.to_string(),
            };
            repo.force_update_ref("refs/stash", a, log).await.unwrap();
        }
        let log = repo.reflog("refs/stash").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].old_id, Some(a));
    }
}
