//! Errors of the synchronization engine

use crate::object::ObjectId;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Repository schema version {found:?} is not supported, expected {expected}")]
    SchemaVersionMismatch { found: Option<u32>, expected: u32 },

    #[error("Object store error: {0}")]
    Storage(StorageError),

    #[error("Failed to serialize {path}: {source}")]
    Serialization {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Ref {name} was updated concurrently: expected {expected:?}, found {actual:?}")]
    RefUpdateConflict {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },

    #[error("Dataset store error: {0}")]
    DatasetStore(#[from] anyhow::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl SyncError {
    pub(crate) fn serialization(path: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        SyncError::Serialization {
            path: path.into(),
            source: source.into(),
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RefConflict {
                name,
                expected,
                actual,
            } => SyncError::RefUpdateConflict {
                name,
                expected,
                actual,
            },
            other => SyncError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_conflict_is_lifted() {
        let err: SyncError = StorageError::RefConflict {
            name: "refs/heads/main".into(),
            expected: None,
            actual: Some(ObjectId::new([3u8; 20])),
        }
        .into();
        assert!(matches!(err, SyncError::RefUpdateConflict { .. }));

        let err: SyncError = StorageError::Corrupt("x".into()).into();
        assert!(matches!(err, SyncError::Storage(_)));
    }
}
