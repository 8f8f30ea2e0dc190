//! In-memory dataset store
//!
//! Categories are implied by the datasets placed in them. Used for tests and
//! for hosts that stage a dataset before committing it.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::{CategoryInfo, CategoryPath, DatasetDescriptor, DatasetState, ModelType};
use crate::store::DatasetStore;

type Key = (ModelType, String);

#[derive(Default)]
pub struct MemoryDatasetStore {
    datasets: RwLock<BTreeMap<Key, (DatasetDescriptor, Value)>>,

    /// Categories that belong to a mounted library
    library_categories: RwLock<HashMap<(ModelType, CategoryPath), String>>,

    /// Ref ids whose record reads fail
    failing: RwLock<HashSet<String>>,

    /// Number of `record` calls served
    record_reads: AtomicUsize,
}

impl MemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Key, (DatasetDescriptor, Value)>> {
        self.datasets.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<Key, (DatasetDescriptor, Value)>> {
        self.datasets.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a dataset
    pub fn put_dataset(&self, descriptor: DatasetDescriptor, record: Value) {
        let key = (descriptor.model_type, descriptor.ref_id.clone());
        self.write().insert(key, (descriptor, record));
    }

    /// Replace the record and bump the version stamp
    pub fn update_record(&self, model_type: ModelType, ref_id: &str, record: Value, last_change: i64) -> Option<DatasetDescriptor> {
        let mut datasets = self.write();
        let (descriptor, stored) = datasets.get_mut(&(model_type, ref_id.to_string()))?;
        descriptor.state = DatasetState::new(descriptor.state.version + 1, last_change);
        *stored = record;
        Some(descriptor.clone())
    }

    pub fn remove_dataset(&self, model_type: ModelType, ref_id: &str) -> Option<DatasetDescriptor> {
        self.write()
            .remove(&(model_type, ref_id.to_string()))
            .map(|(descriptor, _)| descriptor)
    }

    pub fn descriptor(&self, model_type: ModelType, ref_id: &str) -> Option<DatasetDescriptor> {
        self.read()
            .get(&(model_type, ref_id.to_string()))
            .map(|(descriptor, _)| descriptor.clone())
    }

    /// Report `category` as part of `library`
    pub fn mark_library_category(&self, model_type: ModelType, category: CategoryPath, library: &str) {
        self.library_categories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((model_type, category), library.to_string());
    }

    /// Make every future record read of `ref_id` fail
    pub fn fail_reads_of(&self, ref_id: &str) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ref_id.to_string());
    }

    pub fn record_reads(&self) -> usize {
        self.record_reads.load(Ordering::SeqCst)
    }
}

impl DatasetStore for MemoryDatasetStore {
    fn model_types(&self) -> anyhow::Result<Vec<ModelType>> {
        let types: BTreeSet<ModelType> = self.read().keys().map(|(t, _)| *t).collect();
        Ok(types.into_iter().collect())
    }

    fn child_categories(&self, model_type: ModelType, parent: &CategoryPath) -> anyhow::Result<Vec<CategoryInfo>> {
        let depth = parent.segments().len();
        let names: BTreeSet<String> = self
            .read()
            .values()
            .filter(|(d, _)| d.model_type == model_type)
            .map(|(d, _)| d.category.segments())
            .filter(|segments| segments.len() > depth && segments[..depth] == *parent.segments())
            .map(|segments| segments[depth].clone())
            .collect();
        let libraries = self.library_categories.read().unwrap_or_else(|e| e.into_inner());
        Ok(names
            .into_iter()
            .map(|name| {
                let library = libraries.get(&(model_type, parent.child(name.as_str()))).cloned();
                CategoryInfo { name, library }
            })
            .collect())
    }

    fn datasets(&self, model_type: ModelType, category: &CategoryPath) -> anyhow::Result<Vec<DatasetDescriptor>> {
        Ok(self
            .read()
            .values()
            .filter(|(d, _)| d.model_type == model_type && d.category == *category)
            .map(|(d, _)| d.clone())
            .collect())
    }

    fn record(&self, model_type: ModelType, ref_id: &str) -> anyhow::Result<Option<(DatasetState, Value)>> {
        self.record_reads.fetch_add(1, Ordering::SeqCst);
        if self
            .failing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(ref_id)
        {
            anyhow::bail!("record {} could not be loaded", ref_id);
        }
        Ok(self
            .read()
            .get(&(model_type, ref_id.to_string()))
            .map(|(d, record)| (d.state, record.clone())))
    }
}
