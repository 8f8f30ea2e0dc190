//! Disk-persistent repository implementation
//!
//! Stores objects on disk using the git repository layout, so the directory
//! can be opened by git itself (as a bare repository).

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::object::{ObjectId, ObjectKind, Signature};
use crate::storage::{branch_ref, ObjectStore, RefLogEntry, RefStore, Result, StorageError};

const NULL_ID: &str = "0000000000000000000000000000000000000000";

/// Disk-persistent repository
///
/// Layout on disk:
/// ```text
/// {root}/
///   HEAD                               — symbolic ref to the default branch
///   objects/{hash[0..2]}/{hash[2..]}   — zlib-compressed loose objects
///   refs/heads/{branch}                — branch tips (hex + newline)
///   refs/stash                         — stash tip
///   logs/refs/stash                    — stash ref log
/// ```
pub struct DiskRepository {
    root: PathBuf,
    /// Serializes ref writers inside this process; `.lock` files guard
    /// against other processes.
    ref_lock: Mutex<()>,
}

impl DiskRepository {
    /// Open or create a repository at the given path
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_branch(path, "main")
    }

    /// Open or create a repository whose HEAD points at `branch`
    pub fn open_with_branch(path: &Path, branch: &str) -> Result<Self> {
        let root = path.to_path_buf();

        // Ensure directories exist
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("refs").join("heads"))?;
        fs::create_dir_all(root.join("logs").join("refs"))?;

        let head_path = root.join("HEAD");
        if !head_path.exists() {
            fs::write(&head_path, format!("ref: {}\n", branch_ref(branch)))?;
            tracing::info!("Initialized repository at {:?}", root);
        }

        Ok(Self {
            root,
            ref_lock: Mutex::new(()),
        })
    }

    /// Repository root directory
    pub fn path(&self) -> &Path {
        &self.root
    }

    // ==================== Object Store ====================

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn store_object(&self, id: &ObjectId, kind: ObjectKind, data: &[u8]) -> Result<()> {
        let path = self.object_path(id);
        if path.exists() {
            return Ok(()); // Already stored (content-addressed = idempotent)
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(format!("{} {}\0", kind.as_str(), data.len()).as_bytes())?;
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        // Write atomically via temp file
        let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp_path, compressed)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn load_object(&self, id: &ObjectId) -> Result<(ObjectKind, Bytes)> {
        let path = self.object_path(id);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StorageError::NotFound(*id)),
            Err(e) => return Err(e.into()),
        };

        let mut raw = Vec::new();
        ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;

        let nul = raw
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| StorageError::Corrupt(format!("object {} has no header", id)))?;
        let header = std::str::from_utf8(&raw[..nul])
            .map_err(|_| StorageError::Corrupt(format!("object {} header is not UTF-8", id)))?;
        let (kind, len) = header
            .split_once(' ')
            .and_then(|(kind, len)| Some((ObjectKind::parse(kind)?, len.parse::<usize>().ok()?)))
            .ok_or_else(|| StorageError::Corrupt(format!("object {} has invalid header", id)))?;

        let body = raw.split_off(nul + 1);
        if body.len() != len {
            return Err(StorageError::Corrupt(format!(
                "object {} declares {} bytes but holds {}",
                id,
                len,
                body.len()
            )));
        }
        Ok((kind, Bytes::from(body)))
    }

    // ==================== Refs ====================

    fn ref_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn reflog_path(&self, name: &str) -> PathBuf {
        self.root.join("logs").join(name)
    }

    fn load_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        match fs::read_to_string(self.ref_path(name)) {
            Ok(content) => content
                .parse()
                .map(Some)
                .map_err(|_| StorageError::Corrupt(format!("ref {} holds an invalid id", name))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a ref through its `.lock` file, like git does
    fn write_ref(&self, name: &str, check: impl FnOnce(Option<ObjectId>) -> Result<()>, new_id: ObjectId) -> Result<()> {
        let path = self.ref_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut lock_name = path.clone().into_os_string();
        lock_name.push(".lock");
        let lock_path = PathBuf::from(lock_name);
        let mut lock = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::Backend(format!("ref {} is locked", name)),
                _ => e.into(),
            })?;

        let result = self.load_ref(name).and_then(check).and_then(|_| {
            lock.write_all(format!("{}\n", new_id).as_bytes())?;
            lock.sync_all()?;
            fs::rename(&lock_path, &path)?;
            Ok(())
        });
        if result.is_err() {
            let _ = fs::remove_file(&lock_path);
        }
        result
    }

    fn append_reflog(&self, name: &str, log: &RefLogEntry) -> Result<()> {
        let path = self.reflog_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let old = log.old_id.map(|id| id.to_hex()).unwrap_or_else(|| NULL_ID.to_string());
        let message = log.message.lines().next().unwrap_or_default();
        let line = format!("{} {} {}\t{}\n", old, log.new_id, log.who.encode(), message);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn parse_reflog_line(line: &str) -> Option<RefLogEntry> {
        let (head, message) = line.split_once('\t').unwrap_or((line, ""));
        let mut parts = head.splitn(3, ' ');
        let old = parts.next()?;
        let new_id = parts.next()?.parse().ok()?;
        let who = Signature::decode(parts.next()?)?;
        let old_id = if old == NULL_ID { None } else { Some(old.parse().ok()?) };
        Some(RefLogEntry {
            old_id,
            new_id,
            who,
            message: message.to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for DiskRepository {
    async fn get(&self, id: ObjectId) -> Result<(ObjectKind, Bytes)> {
        self.load_object(&id)
    }

    async fn exists(&self, id: ObjectId) -> Result<bool> {
        Ok(self.object_path(&id).exists())
    }

    async fn put(&self, kind: ObjectKind, data: Bytes) -> Result<ObjectId> {
        let id = ObjectId::for_object(kind, &data);
        self.store_object(&id, kind, &data)?;
        Ok(id)
    }
}

#[async_trait]
impl RefStore for DiskRepository {
    async fn read_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        self.load_ref(name)
    }

    async fn update_ref(&self, name: &str, expected: Option<ObjectId>, new_id: ObjectId) -> Result<()> {
        let _guard = self.ref_lock.lock().await;
        self.write_ref(
            name,
            |actual| {
                if actual == expected {
                    Ok(())
                } else {
                    Err(StorageError::RefConflict {
                        name: name.to_string(),
                        expected,
                        actual,
                    })
                }
            },
            new_id,
        )
    }

    async fn force_update_ref(&self, name: &str, new_id: ObjectId, log: RefLogEntry) -> Result<()> {
        let _guard = self.ref_lock.lock().await;
        self.write_ref(name, |_| Ok(()), new_id)?;
        self.append_reflog(name, &log)
    }

    async fn reflog(&self, name: &str) -> Result<Vec<RefLogEntry>> {
        let content = match fs::read_to_string(self.reflog_path(name)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                Self::parse_reflog_line(line)
                    .ok_or_else(|| StorageError::Corrupt(format!("invalid reflog line for {}", name)))
            })
            .collect()
    }
}
