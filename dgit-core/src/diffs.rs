//! Differences between commits and the workspace
//!
//! Both sides are walked in lock-step, folder by folder. Folders with equal
//! ids on both sides are skipped without being opened. Workspace folders
//! never carry an id, so they are always compared entry by entry.

use anyhow::anyhow;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, SyncError};
use crate::model::{DiffEntry, DiffType, ModelType};
use crate::object::{EntryMode, ObjectId, TreeEntry};
use crate::path;
use crate::projection::{Node, ProjectedNode, Projection};
use crate::storage::Repository;
use crate::workspace_tree::WorkspaceTree;

/// One side of a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSide {
    Commit(ObjectId),
    /// The live dataset
    Workspace,
    Empty,
}

impl From<Option<ObjectId>> for DiffSide {
    fn from(commit: Option<ObjectId>) -> Self {
        commit.map_or(DiffSide::Empty, DiffSide::Commit)
    }
}

/// How to list the entries of a folder on one side
#[derive(Debug, Clone)]
enum Folder {
    Stored(ObjectId),
    Projected(Option<Node>),
    Absent,
}

#[derive(Debug, Clone)]
struct Item {
    name: String,
    mode: EntryMode,
    id: Option<ObjectId>,
    folder: Folder,
}

pub struct Diffs<'a, R: Repository + ?Sized> {
    repo: &'a R,
    workspace: Option<WorkspaceTree>,
}

impl<'a, R: Repository + ?Sized> Diffs<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        Self {
            repo,
            workspace: None,
        }
    }

    /// Allow [`DiffSide::Workspace`] in comparisons
    pub fn with_workspace(mut self, workspace: WorkspaceTree) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn find(&self) -> DiffQuery<'_, 'a, R> {
        DiffQuery {
            diffs: self,
            left: DiffSide::Empty,
            right: DiffSide::Workspace,
            path: None,
            model_type: None,
        }
    }

    async fn root(&self, side: DiffSide) -> Result<Folder> {
        match side {
            DiffSide::Commit(id) => Ok(Folder::Stored(self.repo.read_commit(id).await?.tree_id)),
            DiffSide::Workspace if self.workspace.is_some() => Ok(Folder::Projected(None)),
            DiffSide::Workspace => Err(SyncError::DatasetStore(anyhow!("no workspace to compare with"))),
            DiffSide::Empty => Ok(Folder::Absent),
        }
    }

    async fn list(&self, folder: &Folder) -> Result<Vec<Item>> {
        match folder {
            Folder::Stored(tree_id) => {
                let tree = self.repo.read_tree(*tree_id).await?;
                Ok(tree
                    .iter()
                    .map(|entry| Item {
                        name: entry.name.clone(),
                        mode: entry.mode,
                        id: Some(entry.id),
                        folder: if entry.mode.is_tree() {
                            Folder::Stored(entry.id)
                        } else {
                            Folder::Absent
                        },
                    })
                    .collect())
            }
            Folder::Projected(parent) => {
                let Some(workspace) = &self.workspace else {
                    return Ok(Vec::new());
                };
                let nodes = workspace.children(parent.as_ref())?;
                Ok(nodes
                    .into_iter()
                    .map(|node| {
                        let mode = node.mode();
                        Item {
                            name: node.name.clone(),
                            mode,
                            id: node.id.resolved(),
                            folder: if node.is_tree() {
                                Folder::Projected(Some(node))
                            } else {
                                Folder::Absent
                            },
                        }
                    })
                    .collect())
            }
            Folder::Absent => Ok(Vec::new()),
        }
    }
}

pub struct DiffQuery<'d, 'a, R: Repository + ?Sized> {
    diffs: &'d Diffs<'a, R>,
    left: DiffSide,
    right: DiffSide,
    path: Option<String>,
    model_type: Option<ModelType>,
}

impl<'d, 'a, R: Repository + ?Sized> DiffQuery<'d, 'a, R> {
    /// Compare `left` (older) with `right` (newer)
    pub fn between(mut self, left: impl Into<DiffSide>, right: impl Into<DiffSide>) -> Self {
        self.left = left.into();
        self.right = right.into();
        self
    }

    /// Only entries at or below this escaped path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into()).filter(|p: &String| !p.is_empty());
        self
    }

    pub fn model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = Some(model_type);
        self
    }

    pub async fn all(self) -> Result<Vec<DiffEntry>> {
        let left = self.diffs.root(self.left).await?;
        let right = self.diffs.root(self.right).await?;
        let mut found = Vec::new();
        self.walk(String::new(), left, right, &mut found).await?;
        Ok(detect_renames(found))
    }

    fn include(&self, entry_path: &str, is_tree: bool) -> bool {
        if !entry_path.contains('/') {
            if entry_path == path::REPOSITORY_INFO {
                return false;
            }
            if let Some(model_type) = self.model_type {
                if entry_path != model_type.as_str() {
                    return false;
                }
            }
        }
        if is_tree && entry_path.ends_with(path::BINARY_SUFFIX) {
            return false;
        }
        match &self.path {
            Some(filter) => path::overlaps(entry_path, filter),
            None => true,
        }
    }

    fn walk<'s>(
        &'s self,
        prefix: String,
        left: Folder,
        right: Folder,
        found: &'s mut Vec<DiffEntry>,
    ) -> BoxFuture<'s, Result<()>> {
        Box::pin(async move {
            let mut pairs: BTreeMap<Vec<u8>, (Option<Item>, Option<Item>)> = BTreeMap::new();
            for item in self.diffs.list(&left).await? {
                let key = TreeEntry::sort_key(&item.name, item.mode);
                pairs.entry(key).or_default().0 = Some(item);
            }
            for item in self.diffs.list(&right).await? {
                let key = TreeEntry::sort_key(&item.name, item.mode);
                pairs.entry(key).or_default().1 = Some(item);
            }

            for (key, (old, new)) in pairs {
                let is_tree = key.last() == Some(&b'/');
                let Some(name) = old.as_ref().or(new.as_ref()).map(|i| i.name.clone()) else {
                    continue;
                };
                let entry_path = path::join(&prefix, &name);
                if !self.include(&entry_path, is_tree) {
                    continue;
                }
                let old_id = old.as_ref().and_then(|i| i.id);
                let new_id = new.as_ref().and_then(|i| i.id);
                if is_tree {
                    if old_id.is_some() && old_id == new_id {
                        continue;
                    }
                    let old = old.map_or(Folder::Absent, |i| i.folder);
                    let new = new.map_or(Folder::Absent, |i| i.folder);
                    self.walk(entry_path, old, new, found).await?;
                    continue;
                }
                let diff_type = match (&old, &new) {
                    (Some(_), None) => DiffType::Deleted,
                    (None, Some(_)) => DiffType::Added,
                    _ if old_id.is_some() && old_id == new_id => continue,
                    _ => DiffType::Modified,
                };
                found.push(DiffEntry {
                    diff_type,
                    old_path: old.is_some().then(|| entry_path.clone()),
                    new_path: new.is_some().then(|| entry_path.clone()),
                    old_id,
                    new_id,
                });
            }
            Ok(())
        })
    }
}

/// Dataset file name and model type of a path, the identity of a dataset
/// across categories
fn rename_key(entry_path: &str) -> Option<(String, String)> {
    let file = path::file_name(entry_path);
    path::ref_id_of(file)?;
    let model_type = entry_path.split('/').next()?;
    Some((model_type.to_string(), file.to_string()))
}

/// Pair deletions with additions of the same dataset elsewhere
fn detect_renames(found: Vec<DiffEntry>) -> Vec<DiffEntry> {
    let mut deleted: HashMap<(String, String), usize> = HashMap::new();
    for (i, entry) in found.iter().enumerate() {
        if entry.diff_type == DiffType::Deleted {
            if let Some(key) = entry.old_path.as_deref().and_then(rename_key) {
                deleted.insert(key, i);
            }
        }
    }

    let mut renamed_from: HashMap<usize, usize> = HashMap::new();
    for (i, entry) in found.iter().enumerate() {
        if entry.diff_type != DiffType::Added {
            continue;
        }
        if let Some(key) = entry.new_path.as_deref().and_then(rename_key) {
            if let Some(from) = deleted.remove(&key) {
                renamed_from.insert(i, from);
            }
        }
    }
    let consumed: std::collections::HashSet<usize> = renamed_from.values().copied().collect();

    let mut result = Vec::with_capacity(found.len() - consumed.len());
    for (i, entry) in found.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        match renamed_from.get(&i) {
            Some(&from) => result.push(DiffEntry {
                diff_type: DiffType::Renamed,
                old_path: found[from].old_path.clone(),
                new_path: entry.new_path.clone(),
                old_id: found[from].old_id,
                new_id: entry.new_id,
            }),
            None => result.push(entry.clone()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(diff_type: DiffType, path: &str) -> DiffEntry {
        let id = Some(ObjectId::new([1u8; 20]));
        let (old_path, new_path) = match diff_type {
            DiffType::Added => (None, Some(path.to_string())),
            DiffType::Deleted => (Some(path.to_string()), None),
            _ => (Some(path.to_string()), Some(path.to_string())),
        };
        DiffEntry {
            diff_type,
            old_id: old_path.as_ref().and(id),
            new_id: new_path.as_ref().and(id),
            old_path,
            new_path,
        }
    }

    #[test]
    fn test_moves_become_renames() {
        let found = vec![
            entry(DiffType::Added, "Flow/cat2/rec1.json"),
            entry(DiffType::Deleted, "Flow/cat1/rec1.json"),
            entry(DiffType::Deleted, "Process/rec1.json"),
            entry(DiffType::Modified, "Flow/rec9.json"),
        ];
        let result = detect_renames(found);
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].diff_type, DiffType::Renamed);
        assert_eq!(result[0].old_path.as_deref(), Some("Flow/cat1/rec1.json"));
        assert_eq!(result[0].new_path.as_deref(), Some("Flow/cat2/rec1.json"));
        assert_eq!(result[1].diff_type, DiffType::Deleted);
        assert_eq!(result[1].path(), "Process/rec1.json");
    }

    #[test]
    fn test_side_from_option() {
        assert_eq!(DiffSide::from(None), DiffSide::Empty);
        let id = ObjectId::new([2u8; 20]);
        assert_eq!(DiffSide::from(Some(id)), DiffSide::Commit(id));
    }
}
