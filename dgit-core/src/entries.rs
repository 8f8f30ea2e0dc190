//! Listing the content of a commit folder as typed entries

use serde::{Deserialize, Serialize};

use crate::commits::Commits;
use crate::error::{Result, SyncError};
use crate::model::ModelType;
use crate::object::ObjectId;
use crate::path;
use crate::storage::Repository;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    ModelType(ModelType),
    Category,
    Dataset { ref_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unescaped display name
    pub name: String,
    /// Escaped tree path
    pub path: String,
    pub kind: EntryKind,
    pub object_id: ObjectId,
}

pub struct Entries<'a, R: Repository + ?Sized> {
    repo: &'a R,
}

impl<'a, R: Repository + ?Sized> Entries<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    /// Entries of the escaped folder `folder` in `commit`; the root for an
    /// empty path. Metadata and attachment folders are not listed.
    pub async fn list(&self, commit: ObjectId, folder: &str) -> Result<Vec<Entry>> {
        let folder = folder.trim_matches('/');
        let Some(tree) = Commits::new(self.repo).tree_at(commit, folder).await? else {
            return Err(SyncError::InvalidPath(folder.to_string()));
        };

        let mut entries = Vec::new();
        for entry in tree.iter() {
            let entry_path = path::join(folder, &entry.name);
            let kind = if folder.is_empty() {
                match entry.name.parse::<ModelType>() {
                    Ok(model_type) if entry.mode.is_tree() => EntryKind::ModelType(model_type),
                    _ => continue,
                }
            } else if entry.mode.is_tree() {
                if entry.name.ends_with(path::BINARY_SUFFIX) {
                    continue;
                }
                EntryKind::Category
            } else {
                match path::ref_id_of(&entry.name) {
                    Some(ref_id) => EntryKind::Dataset {
                        ref_id: ref_id.to_string(),
                    },
                    None => continue,
                }
            };
            let name = match kind {
                EntryKind::Category => path::unescape_segment(&entry.name).unwrap_or_else(|| entry.name.clone()),
                _ => entry.name.clone(),
            };
            entries.push(Entry {
                name,
                path: entry_path,
                kind,
                object_id: entry.id,
            });
        }
        Ok(entries)
    }
}
