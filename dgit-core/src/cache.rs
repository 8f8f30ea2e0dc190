//! Object-id cache
//!
//! Remembers, per tree path, the object id that was last written for it and
//! the dataset version stamp it was computed from. An entry is only trusted
//! while the stamp still equals the dataset's current state, so unchanged
//! datasets never have to be serialized again.
//!
//! Entries live in a sled tree with bincode-encoded values. sled gives
//! lock-free readers next to a single writer, and every value is replaced
//! atomically.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::model::DatasetState;
use crate::object::ObjectId;
use crate::storage::{Result, StorageError};

/// Cached id of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: ObjectId,
    pub version: u64,
    pub last_change: i64,
}

impl CacheEntry {
    pub fn new(id: ObjectId, state: DatasetState) -> Self {
        Self {
            id,
            version: state.version,
            last_change: state.last_change,
        }
    }

    /// Whether the entry was computed from `state`
    pub fn is_valid_for(&self, state: DatasetState) -> bool {
        self.version == state.version && self.last_change == state.last_change
    }
}

fn backend(err: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(format!("object-id cache: {}", err))
}

#[derive(Clone)]
pub struct ObjectIdCache {
    db: sled::Db,
}

impl ObjectIdCache {
    /// Open (or create) a cache at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(backend)?;
        tracing::debug!("Opened object-id cache at {:?} ({} entries)", path, db.len());
        Ok(Self { db })
    }

    /// A cache that lives only as long as this handle
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open().map_err(backend)?;
        Ok(Self { db })
    }

    pub fn lookup(&self, path: &str) -> Result<Option<CacheEntry>> {
        match self.db.get(path.as_bytes()).map_err(backend)? {
            Some(value) => bincode::deserialize(&value).map(Some).map_err(backend),
            None => Ok(None),
        }
    }

    /// Id of `path` if the entry was computed from `state`
    pub fn lookup_valid(&self, path: &str, state: DatasetState) -> Result<Option<ObjectId>> {
        Ok(self
            .lookup(path)?
            .filter(|entry| entry.is_valid_for(state))
            .map(|entry| entry.id))
    }

    pub fn put(&self, path: &str, id: ObjectId, state: DatasetState) -> Result<()> {
        let value = bincode::serialize(&CacheEntry::new(id, state)).map_err(backend)?;
        self.db.insert(path.as_bytes(), value).map_err(backend)?;
        Ok(())
    }

    /// Drop `path` and everything below it
    pub fn invalidate(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return self.db.clear().map_err(backend);
        }
        self.db.remove(path.as_bytes()).map_err(backend)?;
        let prefix = format!("{}/", path);
        let mut removed = 0usize;
        for key in self.db.scan_prefix(prefix.as_bytes()).keys() {
            self.db.remove(key.map_err(backend)?).map_err(backend)?;
            removed += 1;
        }
        if removed > 0 {
            tracing::debug!("Invalidated {} cache entries below {}", removed, path);
        }
        Ok(())
    }

    /// Flush to disk
    pub fn persist(&self) -> Result<()> {
        let bytes = self.db.flush().map_err(backend)?;
        tracing::debug!("Persisted object-id cache ({} bytes flushed)", bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CacheUpdate {
    Put {
        path: String,
        id: ObjectId,
        state: DatasetState,
    },
    Invalidate(String),
}

/// Cache mutations collected during one synchronization.
///
/// They are applied in recording order once the commit is in place, so a
/// failed synchronization leaves the cache as it was.
#[derive(Debug, Default)]
pub struct CacheUpdates {
    updates: Vec<CacheUpdate>,
}

impl CacheUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, path: impl Into<String>, id: ObjectId, state: DatasetState) {
        self.updates.push(CacheUpdate::Put {
            path: path.into(),
            id,
            state,
        });
    }

    pub fn invalidate(&mut self, path: impl Into<String>) {
        self.updates.push(CacheUpdate::Invalidate(path.into()));
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Apply every update, then persist
    pub fn apply(self, cache: &ObjectIdCache) -> Result<()> {
        for update in self.updates {
            match update {
                CacheUpdate::Put { path, id, state } => cache.put(&path, id, state)?,
                CacheUpdate::Invalidate(path) => cache.invalidate(&path)?,
            }
        }
        cache.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ObjectId {
        ObjectId::new([byte; 20])
    }

    #[test]
    fn test_lookup_checks_state() {
        let cache = ObjectIdCache::temporary().unwrap();
        let state = DatasetState::new(3, 1000);
        cache.put("Flow/rec.json", id(1), state).unwrap();

        assert_eq!(cache.lookup_valid("Flow/rec.json", state).unwrap(), Some(id(1)));
        assert_eq!(cache.lookup_valid("Flow/rec.json", DatasetState::new(4, 1000)).unwrap(), None);
        assert_eq!(cache.lookup_valid("Flow/rec.json", DatasetState::new(3, 1001)).unwrap(), None);
        assert_eq!(cache.lookup("Flow/other.json").unwrap(), None);
    }

    #[test]
    fn test_invalidate_respects_segment_boundaries() {
        let cache = ObjectIdCache::temporary().unwrap();
        let state = DatasetState::default();
        cache.put("Flow/cat1", id(1), state).unwrap();
        cache.put("Flow/cat1/a.json", id(2), state).unwrap();
        cache.put("Flow/cat1/sub/b.json", id(3), state).unwrap();
        cache.put("Flow/cat10/c.json", id(4), state).unwrap();

        cache.invalidate("Flow/cat1").unwrap();
        assert!(cache.lookup("Flow/cat1").unwrap().is_none());
        assert!(cache.lookup("Flow/cat1/sub/b.json").unwrap().is_none());
        assert!(cache.lookup("Flow/cat10/c.json").unwrap().is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_staged_updates_apply_in_order() {
        let cache = ObjectIdCache::temporary().unwrap();
        let mut updates = CacheUpdates::new();
        updates.put("Process/a.json", id(1), DatasetState::new(1, 1));
        updates.invalidate("Process");
        updates.put("Process/b.json", id(2), DatasetState::new(1, 1));
        assert!(cache.is_empty());

        updates.apply(&cache).unwrap();
        assert!(cache.lookup("Process/a.json").unwrap().is_none());
        assert!(cache.lookup("Process/b.json").unwrap().is_some());
    }

    #[test]
    fn test_on_disk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ObjectIdCache::open(&dir.path().join("cache.db")).unwrap();
        cache.put("Actor/x.json", id(9), DatasetState::new(2, 5)).unwrap();
        cache.persist().unwrap();
        assert_eq!(
            cache.lookup("Actor/x.json").unwrap(),
            Some(CacheEntry::new(id(9), DatasetState::new(2, 5)))
        );
        assert!(dir.path().join("cache.db").exists());
    }
}
