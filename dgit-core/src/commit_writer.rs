//! Commit synchronization
//!
//! Turns a list of pending changes into a new commit. The tree of the local
//! parent, the tree of the remote parent (merges only) and the change tree
//! are merged folder by folder in git order. Folders without changes keep
//! their existing ids and are never opened, so the cost of a commit depends
//! on the number of changes, not on the size of the dataset.
//!
//! Nothing becomes visible until the very end: objects are flushed first,
//! then the ref is moved, then the staged cache updates are applied.

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{CacheUpdates, ObjectIdCache};
use crate::change_tree::{ChangeNode, ChangeNodeKind, ChangeTree};
use crate::config::{MergePolicy, SyncConfig};
use crate::converter::Converter;
use crate::error::{Result, SyncError};
use crate::inserter::ObjectInserter;
use crate::model::{Change, ModelType};
use crate::object::{Commit, EntryMode, ObjectId, ObjectKind, Signature, Tree, TreeEntry};
use crate::path;
use crate::repository_info::{RepositoryInfo, CURRENT_SCHEMA_VERSION};
use crate::storage::{branch_ref, RefLogEntry, Repository, StorageError, STASH_REF};
use crate::store::{DatasetStore, JsonSerializer, RecordSerializer};

/// Everything a synchronization works with
pub struct SyncContext<R: Repository> {
    pub repo: Arc<R>,
    pub store: Arc<dyn DatasetStore>,
    pub serializer: Arc<dyn RecordSerializer>,
    pub cache: Option<ObjectIdCache>,
    pub config: SyncConfig,
}

impl<R: Repository> SyncContext<R> {
    pub fn new(repo: Arc<R>, store: Arc<dyn DatasetStore>) -> Self {
        Self {
            repo,
            store,
            serializer: Arc::new(JsonSerializer),
            cache: None,
            config: SyncConfig::default(),
        }
    }

    pub fn with_cache(mut self, cache: ObjectIdCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn RecordSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Branch,
    Stash,
}

pub struct CommitWriter<R: Repository> {
    ctx: SyncContext<R>,
    committer: Signature,
    author: Option<Signature>,
}

impl<R: Repository> CommitWriter<R> {
    pub fn new(ctx: SyncContext<R>, committer: Signature) -> Self {
        Self {
            ctx,
            committer,
            author: None,
        }
    }

    /// Record a different author than the committer
    pub fn with_author(mut self, author: Signature) -> Self {
        self.author = Some(author);
        self
    }

    pub fn context(&self) -> &SyncContext<R> {
        &self.ctx
    }

    /// Commit `changes` on top of the branch head
    pub async fn commit(&self, message: &str, changes: Vec<Change>) -> Result<Option<ObjectId>> {
        let head = self.branch_head().await?;
        self.write(message, changes, Target::Branch, head, None).await
    }

    /// Commit `changes` on top of the branch head, reachable only from the
    /// stash ref. The branch and the cache are left alone.
    pub async fn stash_commit(&self, message: &str, changes: Vec<Change>) -> Result<Option<ObjectId>> {
        let head = self.branch_head().await?;
        self.write(message, changes, Target::Stash, head, None).await
    }

    /// Merge `remote` into `local` and apply `changes` on top. The branch must
    /// still point at `local`.
    pub async fn merge_commit(
        &self,
        message: &str,
        changes: Vec<Change>,
        local: Option<ObjectId>,
        remote: Option<ObjectId>,
    ) -> Result<Option<ObjectId>> {
        self.write(message, changes, Target::Branch, local, remote).await
    }

    async fn branch_head(&self) -> Result<Option<ObjectId>> {
        Ok(self.ctx.repo.read_ref(&branch_ref(&self.ctx.config.branch)).await?)
    }

    /// Refuse to write into a history whose schema this engine does not know
    async fn check_schema(&self) -> Result<()> {
        let Some(head) = self.branch_head().await? else {
            return Ok(());
        };
        match RepositoryInfo::read_at(self.ctx.repo.as_ref(), head).await? {
            Some(info) if info.is_current_schema() => Ok(()),
            found => Err(SyncError::SchemaVersionMismatch {
                found: found.map(|info| info.schema_version),
                expected: CURRENT_SCHEMA_VERSION,
            }),
        }
    }

    async fn write(
        &self,
        message: &str,
        changes: Vec<Change>,
        target: Target,
        local: Option<ObjectId>,
        remote: Option<ObjectId>,
    ) -> Result<Option<ObjectId>> {
        self.check_schema().await?;
        if changes.is_empty() && !(local.is_some() && remote.is_some()) {
            tracing::info!("No changes to commit");
            return Ok(None);
        }
        for change in &changes {
            validate_path(&change.path)?;
        }

        let repo = self.ctx.repo.as_ref();
        let config = &self.ctx.config;
        let changes = ChangeTree::new(changes);
        tracing::info!(
            "Synchronizing {} changes (local: {:?}, remote: {:?})",
            changes.len(),
            local,
            remote
        );

        let mut walk = Walk {
            repo,
            changes: &changes,
            converter: Converter::start(
                changes.changes(),
                self.ctx.store.clone(),
                self.ctx.serializer.clone(),
                config.converter_workers,
            ),
            inserter: ObjectInserter::new(repo, config.insert_batch_size, config.check_existing),
            updates: CacheUpdates::new(),
            policy: config.merge_policy,
        };

        let built = self.build_commit(&mut walk, message, local, remote).await;
        let flushed = walk.inserter.flush().await;
        walk.converter.shutdown();
        let commit_id = built?;
        flushed?;

        match target {
            Target::Branch => {
                let name = branch_ref(&config.branch);
                repo.update_ref(&name, local, commit_id).await?;
                tracing::info!("Updated {} to {}", name, commit_id);
                if let Some(cache) = &self.ctx.cache {
                    let count = walk.updates.len();
                    // the ref already moved, so this is not a failed commit
                    match walk.updates.apply(cache) {
                        Ok(()) => tracing::debug!("Applied {} cache updates", count),
                        Err(err) => tracing::warn!("Failed to update object-id cache: {}", err),
                    }
                }
            }
            Target::Stash => {
                let log = RefLogEntry {
                    old_id: repo.read_ref(STASH_REF).await?,
                    new_id: commit_id,
                    who: self.committer.clone(),
                    message: message.to_string(),
                };
                repo.force_update_ref(STASH_REF, commit_id, log).await?;
                tracing::info!("Stashed changes as {}", commit_id);
            }
        }
        Ok(Some(commit_id))
    }

    async fn build_commit(
        &self,
        walk: &mut Walk<'_, R>,
        message: &str,
        local: Option<ObjectId>,
        remote: Option<ObjectId>,
    ) -> Result<ObjectId> {
        let local_tree = walk.commit_tree(local).await?;
        let remote_tree = walk.commit_tree(remote).await?;
        let fresh = local_tree.is_none() && remote_tree.is_none();

        let top = walk.changes.root();
        let mut root = walk.sync_tree(String::new(), local_tree, remote_tree, top).await?;
        if fresh {
            let info = RepositoryInfo::default();
            let id = walk.inserter.insert(ObjectKind::Blob, info.to_bytes()).await?;
            root.insert(TreeEntry::new(path::REPOSITORY_INFO, id, EntryMode::File));
        }
        let tree_id = walk.inserter.insert(ObjectKind::Tree, root.encode()).await?;

        let parents: Vec<ObjectId> = local.into_iter().chain(remote).collect();
        let author = self.author.clone().unwrap_or_else(|| self.committer.clone());
        let commit = Commit::new(tree_id, parents, author, self.committer.clone(), message.to_string());
        Ok(walk.inserter.insert(ObjectKind::Commit, commit.encode()).await?)
    }
}

/// Change paths must name something inside a model-type folder
fn validate_path(change_path: &str) -> Result<()> {
    let invalid = || SyncError::InvalidPath(change_path.to_string());
    let mut segments = change_path.split('/');
    let first = segments.next().ok_or_else(invalid)?;
    if first.parse::<ModelType>().is_err() {
        return Err(invalid());
    }
    let mut count = 1;
    for segment in segments {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
        count += 1;
    }
    if count < 2 {
        return Err(invalid());
    }
    Ok(())
}

/// One folder entry seen from the three inputs
#[derive(Default)]
struct Slot {
    name: String,
    local: Option<TreeEntry>,
    remote: Option<TreeEntry>,
    change: Option<ChangeNode>,
}

/// State of one synchronization walk
struct Walk<'a, R: Repository> {
    repo: &'a R,
    changes: &'a ChangeTree,
    converter: Converter,
    inserter: ObjectInserter<'a, R>,
    updates: CacheUpdates,
    policy: MergePolicy,
}

impl<'a, R: Repository> Walk<'a, R> {
    async fn commit_tree(&self, commit: Option<ObjectId>) -> Result<Option<Tree>> {
        let Some(commit) = commit else {
            return Ok(None);
        };
        let commit = self.repo.read_commit(commit).await?;
        Ok(Some(self.repo.read_tree(commit.tree_id).await?))
    }

    async fn subtree(&self, entry: Option<&TreeEntry>) -> Result<Option<Tree>> {
        match entry {
            Some(entry) if entry.mode.is_tree() => Ok(Some(self.repo.read_tree(entry.id).await?)),
            _ => Ok(None),
        }
    }

    /// Merge one folder. Returns the resulting tree, which may be empty.
    fn sync_tree(
        &mut self,
        prefix: String,
        local: Option<Tree>,
        remote: Option<Tree>,
        changes: Vec<ChangeNode>,
    ) -> BoxFuture<'_, Result<Tree>> {
        Box::pin(async move {
            let mut slots: BTreeMap<Vec<u8>, Slot> = BTreeMap::new();
            for entry in local.iter().flat_map(|tree| tree.iter()) {
                let slot = slots.entry(TreeEntry::sort_key(&entry.name, entry.mode)).or_default();
                slot.name = entry.name.clone();
                slot.local = Some(entry.clone());
            }
            for entry in remote.iter().flat_map(|tree| tree.iter()) {
                let slot = slots.entry(TreeEntry::sort_key(&entry.name, entry.mode)).or_default();
                slot.name = entry.name.clone();
                slot.remote = Some(entry.clone());
            }
            for node in changes {
                let mode = match node.kind {
                    ChangeNodeKind::Subtree => EntryMode::Tree,
                    ChangeNodeKind::File(_) => EntryMode::File,
                };
                let slot = slots.entry(TreeEntry::sort_key(&node.name, mode)).or_default();
                slot.name = node.name.clone();
                slot.change = Some(node);
            }

            let mut tree = Tree::new();
            for (key, slot) in slots {
                let is_tree = key.last() == Some(&b'/');
                let entry_path = path::join(&prefix, &slot.name);
                let id = if is_tree {
                    self.sync_folder(&entry_path, slot).await?
                } else {
                    self.sync_file(&entry_path, slot).await?
                };
                if let Some((name, id)) = id {
                    let mode = if is_tree { EntryMode::Tree } else { EntryMode::File };
                    tree.insert(TreeEntry::new(name, id, mode));
                }
            }
            Ok(tree)
        })
    }

    async fn sync_folder(&mut self, folder: &str, slot: Slot) -> Result<Option<(String, ObjectId)>> {
        let Some(node) = slot.change else {
            let id = match (&slot.local, &slot.remote) {
                (Some(local), Some(remote)) => match self.policy {
                    MergePolicy::PreferLocal => local.id,
                    MergePolicy::PreferRemote => remote.id,
                },
                (Some(entry), None) | (None, Some(entry)) => entry.id,
                (None, None) => return Ok(None),
            };
            return Ok(Some((slot.name, id)));
        };

        let local = self.subtree(slot.local.as_ref()).await?;
        let remote = self.subtree(slot.remote.as_ref()).await?;
        let children = self.changes.children_of(&node);
        let tree = self.sync_tree(folder.to_string(), local, remote, children).await?;
        if tree.is_empty() {
            self.updates.invalidate(folder);
            return Ok(None);
        }
        let id = self.inserter.insert(ObjectKind::Tree, tree.encode()).await?;
        Ok(Some((slot.name, id)))
    }

    async fn sync_file(&mut self, file: &str, slot: Slot) -> Result<Option<(String, ObjectId)>> {
        let local_id = slot.local.as_ref().map(|e| e.id);
        let Some(change) = slot.change.as_ref().and_then(|node| node.change()) else {
            let remote_id = slot.remote.as_ref().map(|e| e.id);
            let id = match self.policy {
                MergePolicy::PreferLocal => local_id.or(remote_id),
                MergePolicy::PreferRemote => remote_id.or(local_id),
            };
            return Ok(id.map(|id| (slot.name, id)));
        };

        if change.is_deletion() {
            if change.raw_file.is_none() {
                self.updates.invalidate(file);
            }
            return Ok(None);
        }

        if let Some(source) = &change.raw_file {
            let data = tokio::fs::read(source).await.map_err(StorageError::Io)?;
            let id = self.inserter.insert(ObjectKind::Blob, data).await?;
            return Ok(Some((slot.name, id)));
        }

        let converted = self.converter.take(file).await?;
        let id = ObjectId::for_object(ObjectKind::Blob, &converted.data);
        if local_id != Some(id) {
            self.inserter.insert(ObjectKind::Blob, converted.data).await?;
        }
        self.updates.put(file, id, converted.state);
        Ok(Some((slot.name, id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryDatasetStore;
    use crate::model::{CategoryPath, DatasetDescriptor, DatasetState};
    use crate::repository::MemoryRepository;
    use crate::storage::{ObjectStore, RefStore};
    use serde_json::json;

    fn committer() -> Signature {
        Signature::new("tester", "tester@example.com", 1_700_000_000, 0)
    }

    fn writer(store: Arc<MemoryDatasetStore>) -> CommitWriter<MemoryRepository> {
        let ctx = SyncContext::new(Arc::new(MemoryRepository::new()), store);
        CommitWriter::new(ctx, committer())
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("Process/rec1.json").is_ok());
        assert!(validate_path("Flow/cat%2F1/rec2.json").is_ok());
        assert!(validate_path("Process").is_err());
        assert!(validate_path("repository.json").is_err());
        assert!(validate_path("Nope/rec.json").is_err());
        assert!(validate_path("Flow//rec.json").is_err());
        assert!(validate_path("Flow/../rec.json").is_err());
    }

    #[tokio::test]
    async fn test_first_commit_has_metadata_and_no_parent() {
        let store = Arc::new(MemoryDatasetStore::new());
        let d = DatasetDescriptor::new(ModelType::Actor, "a1", CategoryPath::root(), DatasetState::new(1, 1));
        store.put_dataset(d.clone(), json!({"@id": "a1"}));
        let writer = writer(store);

        let id = writer.commit("init", vec![Change::added(&d)]).await.unwrap().unwrap();
        let repo = writer.context().repo.clone();
        let commit = repo.read_commit(id).await.unwrap();
        assert!(commit.is_initial());
        let root = repo.read_tree(commit.tree_id).await.unwrap();
        let names: Vec<&str> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Actor", "repository.json"]);
        assert_eq!(repo.read_ref("refs/heads/main").await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_invalid_change_path_writes_nothing() {
        let writer = writer(Arc::new(MemoryDatasetStore::new()));
        let err = writer
            .commit("bad", vec![Change::new("../escape.json", crate::model::ChangeKind::Added)])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidPath(_)));
        assert_eq!(writer.context().repo.object_count().await, 0);
    }
}
