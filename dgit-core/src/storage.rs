//! Storage abstraction layer for DGit
//!
//! An append-only object store plus a ref store. Implemented in memory by
//! [`crate::MemoryRepository`] and on disk by [`crate::DiskRepository`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::object::{Blob, Commit, Object, ObjectId, ObjectKind, Signature, Tree};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(ObjectId),

    #[error("Object {id} is a {actual:?}, expected a {expected:?}")]
    UnexpectedKind {
        id: ObjectId,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt object: {0}")]
    Corrupt(String),

    #[error("Ref {name} moved: expected {expected:?}, found {actual:?}")]
    RefConflict {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// One line of a ref log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefLogEntry {
    pub old_id: Option<ObjectId>,
    pub new_id: ObjectId,
    pub who: Signature,
    pub message: String,
}

/// Append-only object store
///
/// All storage backends must implement this trait
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get an object's kind and body by ID
    async fn get(&self, id: ObjectId) -> Result<(ObjectKind, Bytes)>;

    /// Check if object exists
    async fn exists(&self, id: ObjectId) -> Result<bool>;

    /// Put an object body (returns the object ID)
    async fn put(&self, kind: ObjectKind, data: Bytes) -> Result<ObjectId>;

    /// Put multiple objects in a batch
    async fn put_batch(&self, objects: Vec<(ObjectKind, Bytes)>) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::with_capacity(objects.len());
        for (kind, data) in objects {
            ids.push(self.put(kind, data).await?);
        }
        Ok(ids)
    }

    /// Read and decode an object
    async fn read(&self, id: ObjectId) -> Result<Object> {
        let (kind, data) = self.get(id).await?;
        Object::decode(kind, &data)
    }

    async fn read_blob(&self, id: ObjectId) -> Result<Blob> {
        match self.read(id).await? {
            Object::Blob(blob) => Ok(blob),
            other => Err(unexpected(id, ObjectKind::Blob, other.kind())),
        }
    }

    async fn read_tree(&self, id: ObjectId) -> Result<Tree> {
        match self.read(id).await? {
            Object::Tree(tree) => Ok(tree),
            other => Err(unexpected(id, ObjectKind::Tree, other.kind())),
        }
    }

    async fn read_commit(&self, id: ObjectId) -> Result<Commit> {
        match self.read(id).await? {
            Object::Commit(commit) => Ok(commit),
            other => Err(unexpected(id, ObjectKind::Commit, other.kind())),
        }
    }
}

fn unexpected(id: ObjectId, expected: ObjectKind, actual: ObjectKind) -> StorageError {
    StorageError::UnexpectedKind {
        id,
        expected,
        actual,
    }
}

/// Named references into the commit graph
#[async_trait]
pub trait RefStore: Send + Sync {
    /// Resolve a full ref name (e.g. `refs/heads/main`)
    async fn read_ref(&self, name: &str) -> Result<Option<ObjectId>>;

    /// Compare-and-swap update: succeeds only while the ref still points at
    /// `expected` (`None` meaning the ref does not exist yet).
    async fn update_ref(&self, name: &str, expected: Option<ObjectId>, new_id: ObjectId) -> Result<()>;

    /// Unconditional update that always appends `log` to the ref log
    async fn force_update_ref(&self, name: &str, new_id: ObjectId, log: RefLogEntry) -> Result<()>;

    /// Ref log entries, oldest first
    async fn reflog(&self, name: &str) -> Result<Vec<RefLogEntry>>;
}

/// A full repository: objects and refs
pub trait Repository: ObjectStore + RefStore {}

impl<T: ObjectStore + RefStore> Repository for T {}

/// Full name of a branch ref
pub fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

/// Ref that holds stashed work
pub const STASH_REF: &str = "refs/stash";
