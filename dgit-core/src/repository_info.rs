//! Repository metadata stored at the tree root
//!
//! Written into the first commit of a history and read back before every
//! synchronization to make sure the stored data uses a schema this engine
//! understands.

use serde::{Deserialize, Serialize};

use crate::object::{ObjectId, Tree};
use crate::path::REPOSITORY_INFO;
use crate::storage::{ObjectStore, Result};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;
pub const CURRENT_CLIENT_VERSION: u32 = 2;
pub const CURRENT_SERVER_VERSION: u32 = 2;
pub const SUPPORTED_CLIENT_VERSIONS: [u32; 2] = [1, 2];
pub const SUPPORTED_SERVER_VERSIONS: [u32; 2] = [1, 2];

fn fallback_version() -> u32 {
    1
}

/// A library mounted into the dataset, by id and optional download location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryLink {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfo {
    pub schema_version: u32,
    #[serde(default = "fallback_version")]
    pub repository_client_version: u32,
    #[serde(default = "fallback_version")]
    pub repository_server_version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<LibraryLink>,
}

impl Default for RepositoryInfo {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            repository_client_version: CURRENT_CLIENT_VERSION,
            repository_server_version: CURRENT_SERVER_VERSION,
            libraries: Vec::new(),
        }
    }
}

impl RepositoryInfo {
    pub fn with_libraries(mut self, libraries: Vec<LibraryLink>) -> Self {
        self.libraries = libraries;
        self
    }

    pub fn is_current_schema(&self) -> bool {
        self.schema_version == CURRENT_SCHEMA_VERSION
    }

    pub fn is_supported_client(&self) -> bool {
        SUPPORTED_CLIENT_VERSIONS.contains(&self.repository_client_version)
    }

    pub fn is_supported_server(&self) -> bool {
        SUPPORTED_SERVER_VERSIONS.contains(&self.repository_server_version)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // a struct of plain fields cannot fail to serialize
        let mut data = serde_json::to_vec_pretty(self).unwrap_or_default();
        data.push(b'\n');
        data
    }

    /// Parse a stored blob; `None` if it is not valid metadata
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }

    /// Metadata stored in a root tree, if any
    pub async fn read_from<S: ObjectStore + ?Sized>(store: &S, root: &Tree) -> Result<Option<Self>> {
        match root.get(REPOSITORY_INFO) {
            Some(entry) if !entry.mode.is_tree() => {
                let blob = store.read_blob(entry.id).await?;
                Ok(Self::from_bytes(&blob.data))
            }
            _ => Ok(None),
        }
    }

    /// Metadata of the tree of `commit_id`
    pub async fn read_at<S: ObjectStore + ?Sized>(store: &S, commit_id: ObjectId) -> Result<Option<Self>> {
        let commit = store.read_commit(commit_id).await?;
        let root = store.read_tree(commit.tree_id).await?;
        Self::read_from(store, &root).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_old_metadata() {
        let info = RepositoryInfo::from_bytes(br#"{"schemaVersion": 2}"#).unwrap();
        assert_eq!(info.repository_client_version, 1);
        assert!(info.is_current_schema());
        assert!(info.is_supported_client());
        assert!(info.libraries.is_empty());

        assert!(RepositoryInfo::from_bytes(b"not json").is_none());
        assert!(RepositoryInfo::from_bytes(br#"{"repositoryClientVersion": 2}"#).is_none());
    }

    #[test]
    fn test_written_form() {
        let info = RepositoryInfo::default().with_libraries(vec![LibraryLink {
            id: "ei_3.9".into(),
            url: None,
        }]);
        let text = String::from_utf8(info.to_bytes()).unwrap();
        assert!(text.contains("\"schemaVersion\": 2"));
        assert!(text.contains("\"repositoryServerVersion\": 2"));
        assert_eq!(RepositoryInfo::from_bytes(text.as_bytes()), Some(info));
    }
}
