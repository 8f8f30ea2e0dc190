//! Concurrent conversion of changed records into blob content
//!
//! Every added or modified dataset is fetched from the dataset store and
//! serialized on a blocking task. A semaphore bounds the number of tasks in
//! flight. Each result travels through its own oneshot channel, so the tree
//! walk can pick results up in any order while later conversions still run.

use anyhow::anyhow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{Result, SyncError};
use crate::model::{Change, DatasetState};
use crate::path::DatasetPath;
use crate::store::{DatasetStore, RecordSerializer};

/// Serialized record and the version stamp it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub data: Vec<u8>,
    pub state: DatasetState,
}

type Outcome = anyhow::Result<Converted>;

pub struct Converter {
    pending: HashMap<String, oneshot::Receiver<Outcome>>,
    taken: HashSet<String>,
    semaphore: Arc<Semaphore>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Converter {
    /// Start converting every change that needs serialized content.
    ///
    /// Deletions and changes backed by a raw file are skipped. Must be called
    /// from within a tokio runtime.
    pub fn start(
        changes: &[Change],
        store: Arc<dyn DatasetStore>,
        serializer: Arc<dyn RecordSerializer>,
        workers: usize,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut pending = HashMap::new();
        let mut jobs = Vec::new();
        for change in changes {
            if change.is_deletion() || change.raw_file.is_some() {
                continue;
            }
            let (tx, rx) = oneshot::channel();
            pending.insert(change.path.clone(), rx);
            jobs.push((change.path.clone(), tx));
        }
        tracing::debug!("Converting {} records with {} workers", jobs.len(), workers.max(1));

        let dispatcher = {
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                for (path, tx) in jobs {
                    // a closed semaphore means shutdown; the remaining
                    // senders are dropped with `jobs`
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let store = store.clone();
                    let serializer = serializer.clone();
                    tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        let outcome = convert(store.as_ref(), serializer.as_ref(), &path);
                        if let Err(err) = &outcome {
                            tracing::warn!("Conversion of {} failed: {:#}", path, err);
                        }
                        let _ = tx.send(outcome);
                    });
                }
            })
        };

        Self {
            pending,
            taken: HashSet::new(),
            semaphore,
            dispatcher: Some(dispatcher),
        }
    }

    /// Content of `path`. Each path can be taken exactly once.
    pub async fn take(&mut self, path: &str) -> Result<Converted> {
        let Some(rx) = self.pending.remove(path) else {
            let reason = if self.taken.contains(path) {
                anyhow!("content was already taken")
            } else {
                anyhow!("no conversion was requested")
            };
            return Err(SyncError::serialization(path, reason));
        };
        self.taken.insert(path.to_string());
        match rx.await {
            Ok(Ok(converted)) => Ok(converted),
            Ok(Err(err)) => Err(SyncError::serialization(path, err)),
            Err(_) => Err(SyncError::serialization(path, anyhow!("conversion was cancelled"))),
        }
    }

    /// Number of results not taken yet
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Stop dispatching. Conversions already running finish on their own;
    /// results not dispatched yet report as cancelled.
    pub fn shutdown(&mut self) {
        self.semaphore.close();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

impl Drop for Converter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn convert(store: &dyn DatasetStore, serializer: &dyn RecordSerializer, path: &str) -> Outcome {
    let dataset = DatasetPath::parse(path).ok_or_else(|| anyhow!("not a dataset path"))?;
    let (state, record) = store
        .record(dataset.model_type, &dataset.ref_id)?
        .ok_or_else(|| anyhow!("dataset {} not found in the store", dataset.ref_id))?;
    let data = serializer.serialize(dataset.model_type, &record)?;
    Ok(Converted { data, state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryDatasetStore;
    use crate::model::{CategoryPath, ChangeKind, DatasetDescriptor, ModelType};
    use crate::store::JsonSerializer;
    use serde_json::json;
    use std::time::Duration;

    fn setup(count: usize) -> (Arc<MemoryDatasetStore>, Vec<Change>) {
        let store = Arc::new(MemoryDatasetStore::new());
        let mut changes = Vec::new();
        for i in 0..count {
            let d = DatasetDescriptor::new(
                ModelType::Flow,
                format!("rec{}", i),
                CategoryPath::root(),
                DatasetState::new(1, i as i64),
            );
            changes.push(Change::added(&d));
            store.put_dataset(d, json!({"@id": format!("rec{}", i)}));
        }
        (store, changes)
    }

    #[tokio::test]
    async fn test_take_returns_each_result_once() {
        let (store, changes) = setup(8);
        let mut converter = Converter::start(&changes, store.clone(), Arc::new(JsonSerializer), 3);

        // out of submission order
        for change in changes.iter().rev() {
            let converted = converter.take(&change.path).await.unwrap();
            assert!(!converted.data.is_empty());
        }
        assert_eq!(converter.outstanding(), 0);
        assert_eq!(store.record_reads(), 8);

        let err = converter.take(&changes[0].path).await.unwrap_err();
        assert!(matches!(err, SyncError::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_deletions_and_raw_files_are_not_converted() {
        let (store, mut changes) = setup(2);
        changes[0].kind = ChangeKind::Deleted;
        changes[1].raw_file = Some("/tmp/file.bin".into());
        let mut converter = Converter::start(&changes, store.clone(), Arc::new(JsonSerializer), 2);
        assert_eq!(converter.outstanding(), 0);
        assert!(converter.take(&changes[0].path).await.is_err());
        assert_eq!(store.record_reads(), 0);
    }

    #[tokio::test]
    async fn test_failure_surfaces_through_take() {
        let (store, changes) = setup(3);
        store.fail_reads_of("rec1");
        let mut converter = Converter::start(&changes, store, Arc::new(JsonSerializer), 2);

        assert!(converter.take(&changes[0].path).await.is_ok());
        let err = converter.take(&changes[1].path).await.unwrap_err();
        match err {
            SyncError::Serialization { path, .. } => assert_eq!(path, changes[1].path),
            other => panic!("unexpected error: {other}"),
        }
        assert!(converter.take(&changes[2].path).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_never_hangs() {
        let (store, changes) = setup(50);
        let mut converter = Converter::start(&changes, store, Arc::new(JsonSerializer), 1);
        converter.shutdown();
        for change in &changes {
            let taken = tokio::time::timeout(Duration::from_secs(5), converter.take(&change.path)).await;
            assert!(taken.is_ok(), "take of {} did not finish", change.path);
        }
    }
}
