//! Buffered object insertion
//!
//! Objects are hashed immediately and written in batches. Everything
//! buffered must be flushed before a ref may point at a commit that
//! references it.

use bytes::Bytes;
use std::collections::HashSet;

use crate::object::{ObjectId, ObjectKind};
use crate::storage::{ObjectStore, Result};

pub struct ObjectInserter<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    buffer: Vec<(ObjectKind, Bytes)>,
    buffered: HashSet<ObjectId>,
    batch_size: usize,
    check_existing: bool,
    written: usize,
}

impl<'a, S: ObjectStore + ?Sized> ObjectInserter<'a, S> {
    pub fn new(store: &'a S, batch_size: usize, check_existing: bool) -> Self {
        Self {
            store,
            buffer: Vec::new(),
            buffered: HashSet::new(),
            batch_size: batch_size.max(1),
            check_existing,
            written: 0,
        }
    }

    /// Queue an object and return its id
    pub async fn insert(&mut self, kind: ObjectKind, data: impl Into<Bytes>) -> Result<ObjectId> {
        let data = data.into();
        let id = ObjectId::for_object(kind, &data);
        if self.buffered.contains(&id) {
            return Ok(id);
        }
        if self.check_existing && self.store.exists(id).await? {
            return Ok(id);
        }
        self.buffered.insert(id);
        self.buffer.push((kind, data));
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(id)
    }

    /// Write everything buffered
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffer);
        let count = batch.len();
        self.store.put_batch(batch).await?;
        self.written += count;
        tracing::debug!("Flushed {} objects", count);
        Ok(())
    }

    /// Objects written to the store so far
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;

    #[tokio::test]
    async fn test_batches_and_dedup() {
        let repo = MemoryRepository::new();
        let mut inserter = ObjectInserter::new(&repo, 2, true);

        let a = inserter.insert(ObjectKind::Blob, &b"a"[..]).await.unwrap();
        let again = inserter.insert(ObjectKind::Blob, &b"a"[..]).await.unwrap();
        assert_eq!(a, again);
        assert_eq!(inserter.pending(), 1);
        assert!(!repo.exists(a).await.unwrap());

        inserter.insert(ObjectKind::Blob, &b"b"[..]).await.unwrap();
        assert_eq!(inserter.pending(), 0);
        assert_eq!(repo.object_count().await, 2);

        inserter.insert(ObjectKind::Blob, &b"c"[..]).await.unwrap();
        inserter.flush().await.unwrap();
        assert_eq!(inserter.written(), 3);
    }

    #[tokio::test]
    async fn test_existing_objects_are_skipped() {
        let repo = MemoryRepository::new();
        repo.put(ObjectKind::Blob, Bytes::from_static(b"x")).await.unwrap();

        let mut inserter = ObjectInserter::new(&repo, 10, true);
        inserter.insert(ObjectKind::Blob, &b"x"[..]).await.unwrap();
        inserter.flush().await.unwrap();
        assert_eq!(inserter.written(), 0);
    }
}
