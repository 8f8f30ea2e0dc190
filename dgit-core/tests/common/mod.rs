#![allow(dead_code)]

use std::sync::Arc;

use dgit_core::{
    CategoryPath, Commits, CommitWriter, DatasetDescriptor, DatasetState, MemoryDatasetStore, MemoryRepository,
    ModelType, ObjectId, ObjectIdCache, Signature, SyncConfig, SyncContext, Tree,
};
use serde_json::json;

/// Route library logs to the test output; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn committer() -> Signature {
    Signature::new("tester", "tester@example.com", 1_700_000_000, 0)
}

pub struct Fixture {
    pub store: Arc<MemoryDatasetStore>,
    pub repo: Arc<MemoryRepository>,
    pub cache: ObjectIdCache,
    pub writer: CommitWriter<MemoryRepository>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        init_tracing();
        let store = Arc::new(MemoryDatasetStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let cache = ObjectIdCache::temporary().unwrap();
        let writer = Self::writer_for(&store, &repo, &cache, config);
        Self {
            store,
            repo,
            cache,
            writer,
        }
    }

    /// Another writer over the same repository, store and cache
    pub fn writer(&self, config: SyncConfig) -> CommitWriter<MemoryRepository> {
        Self::writer_for(&self.store, &self.repo, &self.cache, config)
    }

    fn writer_for(
        store: &Arc<MemoryDatasetStore>,
        repo: &Arc<MemoryRepository>,
        cache: &ObjectIdCache,
        config: SyncConfig,
    ) -> CommitWriter<MemoryRepository> {
        let ctx = SyncContext::new(repo.clone(), store.clone())
            .with_cache(cache.clone())
            .with_config(config);
        CommitWriter::new(ctx, committer())
    }

    /// Put a dataset with version 1 into the store
    pub fn add(&self, model_type: ModelType, ref_id: &str, category: &[&str]) -> DatasetDescriptor {
        let descriptor =
            DatasetDescriptor::new(model_type, ref_id, CategoryPath::from(category), DatasetState::new(1, 1000));
        self.store
            .put_dataset(descriptor.clone(), json!({"@id": ref_id, "name": format!("dataset {}", ref_id)}));
        descriptor
    }

    /// Change the record content and bump its version
    pub fn edit(&self, descriptor: &DatasetDescriptor, name: &str) -> DatasetDescriptor {
        let last_change = descriptor.state.last_change + 1;
        self.store
            .update_record(
                descriptor.model_type,
                &descriptor.ref_id,
                json!({"@id": descriptor.ref_id, "name": name}),
                last_change,
            )
            .unwrap()
    }

    pub async fn head(&self) -> Option<ObjectId> {
        use dgit_core::RefStore;
        self.repo.read_ref("refs/heads/main").await.unwrap()
    }

    /// Tree of `commit` at an escaped folder path
    pub async fn tree(&self, commit: ObjectId, folder: &str) -> Option<Tree> {
        Commits::new(self.repo.as_ref()).tree_at(commit, folder).await.unwrap()
    }

    pub async fn names(&self, commit: ObjectId, folder: &str) -> Vec<String> {
        match self.tree(commit, folder).await {
            Some(tree) => tree.iter().map(|e| e.name.clone()).collect(),
            None => Vec::new(),
        }
    }
}
