//! Core object model for DGit
//!
//! Implements content-addressable storage with Blob, Tree, and Commit objects
//! using git's object framing, so every id matches the id git computes for
//! the same content.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::storage::StorageError;

/// Length of a raw object id in bytes
pub const OBJECT_ID_LEN: usize = 20;

/// Unique identifier for any stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Compute the id of an object of `kind` whose body is `data`
    pub fn for_object(kind: ObjectKind, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    /// Build from a raw byte slice of exactly [`OBJECT_ID_LEN`] bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; OBJECT_ID_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s.trim())
    }
}

/// Object type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    /// Name used in the object header
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "blob" => Some(ObjectKind::Blob),
            "tree" => Some(ObjectKind::Tree),
            "commit" => Some(ObjectKind::Commit),
            _ => None,
        }
    }
}

/// File content object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Raw content data
    pub data: Vec<u8>,
}

impl Blob {
    /// Create a new blob from data
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(ObjectKind::Blob, &self.data)
    }
}

/// Mode of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryMode {
    /// Sub-directory (`40000`)
    Tree,
    /// Regular, non-executable file (`100644`)
    File,
}

impl EntryMode {
    pub fn as_octal(&self) -> &'static str {
        match self {
            EntryMode::Tree => "40000",
            EntryMode::File => "100644",
        }
    }

    fn parse(mode: &str) -> Option<Self> {
        match mode {
            "40000" | "040000" => Some(EntryMode::Tree),
            "100644" | "100755" | "100664" => Some(EntryMode::File),
            _ => None,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, EntryMode::Tree)
    }
}

/// Directory tree entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Name of the entry (already escaped, never contains `/`)
    pub name: String,
    /// Object ID (points to Blob or Tree)
    pub id: ObjectId,
    /// Entry type
    pub mode: EntryMode,
}

impl TreeEntry {
    /// Create a new tree entry
    pub fn new(name: impl Into<String>, id: ObjectId, mode: EntryMode) -> Self {
        Self {
            name: name.into(),
            id,
            mode,
        }
    }

    /// Key under which git orders tree entries: sub-trees sort as if their
    /// name ended with `/`.
    pub fn sort_key(name: &str, mode: EntryMode) -> Vec<u8> {
        let mut key = name.as_bytes().to_vec();
        if mode.is_tree() {
            key.push(b'/');
        }
        key
    }
}

/// Directory object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    /// Entries in git order for deterministic hashing
    entries: BTreeMap<Vec<u8>, TreeEntry>,
}

impl Tree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update an entry
    pub fn insert(&mut self, entry: TreeEntry) {
        self.entries
            .insert(TreeEntry::sort_key(&entry.name, entry.mode), entry);
    }

    /// Get an entry, either a file or a sub-tree of that name
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .get(&TreeEntry::sort_key(name, EntryMode::File))
            .or_else(|| self.entries.get(&TreeEntry::sort_key(name, EntryMode::Tree)))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over entries in git order
    pub fn iter(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }

    /// Encode into the git tree body
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in self.entries.values() {
            out.extend_from_slice(entry.mode.as_octal().as_bytes());
            out.push(b' ');
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }

    /// Decode a git tree body
    pub fn decode(data: &[u8]) -> Result<Self, StorageError> {
        let corrupt = |msg: &str| StorageError::Corrupt(format!("tree: {}", msg));
        let mut tree = Tree::new();
        let mut pos = 0;
        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|b| *b == b' ')
                .ok_or_else(|| corrupt("missing mode separator"))?;
            let mode = std::str::from_utf8(&data[pos..pos + space])
                .ok()
                .and_then(EntryMode::parse)
                .ok_or_else(|| corrupt("unknown entry mode"))?;
            pos += space + 1;
            let nul = data[pos..]
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| corrupt("missing name terminator"))?;
            let name = String::from_utf8(data[pos..pos + nul].to_vec())
                .map_err(|_| corrupt("entry name is not UTF-8"))?;
            pos += nul + 1;
            let id = data
                .get(pos..pos + OBJECT_ID_LEN)
                .and_then(ObjectId::from_slice)
                .ok_or_else(|| corrupt("truncated object id"))?;
            pos += OBJECT_ID_LEN;
            tree.insert(TreeEntry::new(name, id, mode));
        }
        Ok(tree)
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(ObjectKind::Tree, &self.encode())
    }
}

/// Author or committer identity with a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Unix seconds
    pub timestamp: i64,
    /// Timezone offset in minutes
    pub tz_offset: i32,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, timestamp: i64, tz_offset: i32) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp,
            tz_offset,
        }
    }

    /// Signature stamped with the current UTC time
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::new(name, email, chrono::Utc::now().timestamp(), 0)
    }

    pub(crate) fn encode(&self) -> String {
        let sign = if self.tz_offset < 0 { '-' } else { '+' };
        let offset = self.tz_offset.abs();
        format!(
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.timestamp,
            sign,
            offset / 60,
            offset % 60
        )
    }

    pub(crate) fn decode(line: &str) -> Option<Self> {
        let open = line.rfind('<')?;
        let close = line.rfind('>')?;
        if close < open {
            return None;
        }
        let name = line[..open].trim_end().to_string();
        let email = line[open + 1..close].to_string();
        let mut rest = line[close + 1..].split_whitespace();
        let timestamp = rest.next()?.parse().ok()?;
        let tz = rest.next().unwrap_or("+0000");
        let (negative, digits) = match tz.strip_prefix('-') {
            Some(digits) => (true, digits),
            None => (false, tz.strip_prefix('+')?),
        };
        let hours: i32 = digits.get(..2)?.parse().ok()?;
        let minutes: i32 = digits.get(2..4)?.parse().ok()?;
        let mut tz_offset = hours * 60 + minutes;
        if negative {
            tz_offset = -tz_offset;
        }
        Some(Self {
            name,
            email,
            timestamp,
            tz_offset,
        })
    }
}

/// Commit object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Tree object ID for this commit
    pub tree_id: ObjectId,
    /// Parent commit IDs (empty for initial commit, two for merges)
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    /// Commit message
    pub message: String,
}

impl Commit {
    /// Create a new commit
    pub fn new(
        tree_id: ObjectId,
        parents: Vec<ObjectId>,
        author: Signature,
        committer: Signature,
        message: String,
    ) -> Self {
        Self {
            tree_id,
            parents,
            author,
            committer,
            message,
        }
    }

    /// Encode into the git commit body
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("tree {}\n", self.tree_id);
        for parent in &self.parents {
            out.push_str(&format!("parent {}\n", parent));
        }
        out.push_str(&format!("author {}\n", self.author.encode()));
        out.push_str(&format!("committer {}\n", self.committer.encode()));
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    /// Decode a git commit body
    pub fn decode(data: &[u8]) -> Result<Self, StorageError> {
        let corrupt = |msg: &str| StorageError::Corrupt(format!("commit: {}", msg));
        let text = std::str::from_utf8(data).map_err(|_| corrupt("not UTF-8"))?;
        let (header, message) = text.split_once("\n\n").unwrap_or((text, ""));

        let mut tree_id = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        for line in header.lines() {
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "tree" => {
                    tree_id = Some(value.parse().map_err(|_| corrupt("invalid tree id"))?);
                }
                "parent" => {
                    parents.push(value.parse().map_err(|_| corrupt("invalid parent id"))?);
                }
                "author" => author = Signature::decode(value),
                "committer" => committer = Signature::decode(value),
                // encoding, gpgsig and friends carry nothing we need
                _ => {}
            }
        }

        Ok(Self {
            tree_id: tree_id.ok_or_else(|| corrupt("missing tree"))?,
            parents,
            author: author.ok_or_else(|| corrupt("missing author"))?,
            committer: committer.ok_or_else(|| corrupt("missing committer"))?,
            message: message.to_string(),
        })
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(ObjectKind::Commit, &self.encode())
    }

    /// Check if this is an initial commit (no parents)
    pub fn is_initial(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Generic object that can be any type
#[derive(Debug, Clone)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
}

impl Object {
    /// Get the object kind
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Blob(_) => ObjectKind::Blob,
            Object::Tree(_) => ObjectKind::Tree,
            Object::Commit(_) => ObjectKind::Commit,
        }
    }

    /// Encode the object body (without header)
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Object::Blob(blob) => blob.data.clone(),
            Object::Tree(tree) => tree.encode(),
            Object::Commit(commit) => commit.encode(),
        }
    }

    pub fn decode(kind: ObjectKind, data: &[u8]) -> Result<Self, StorageError> {
        Ok(match kind {
            ObjectKind::Blob => Object::Blob(Blob::new(data.to_vec())),
            ObjectKind::Tree => Object::Tree(Tree::decode(data)?),
            ObjectKind::Commit => Object::Commit(Commit::decode(data)?),
        })
    }

    /// Get the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(self.kind(), &self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_roundtrip() {
        let id = ObjectId::new([42u8; OBJECT_ID_LEN]);
        let id2 = ObjectId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, id2);
        assert!(ObjectId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_ids_match_git() {
        assert_eq!(
            Blob::new(Vec::new()).id().to_hex(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
        assert_eq!(
            Blob::new(b"hello world\n".to_vec()).id().to_hex(),
            "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
        );
        assert_eq!(Tree::new().id().to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn test_tree_orders_subtrees_like_git() {
        let id = Blob::new(b"x".to_vec()).id();
        let mut tree = Tree::new();
        tree.insert(TreeEntry::new("a.json", id, EntryMode::File));
        tree.insert(TreeEntry::new("a", id, EntryMode::Tree));
        tree.insert(TreeEntry::new("a-b", id, EntryMode::File));
        let names: Vec<_> = tree.iter().map(|e| e.name.as_str()).collect();
        // "a/" sorts after "a-b" and "a.json" because '/' > '-' and '/' > '.'
        assert_eq!(names, vec!["a-b", "a.json", "a"]);

        let decoded = Tree::decode(&tree.encode()).unwrap();
        assert_eq!(decoded, tree);
        assert!(decoded.get("a").unwrap().mode.is_tree());
    }

    #[test]
    fn test_commit_encoding() {
        let commit = Commit::new(
            ObjectId::new([1u8; OBJECT_ID_LEN]),
            vec![ObjectId::new([2u8; OBJECT_ID_LEN]), ObjectId::new([3u8; OBJECT_ID_LEN])],
            Signature::new("Test Author", "author@example.com", 1234567890, 120),
            Signature::new("Test Committer", "committer@example.com", 1234567891, -90),
            "Test message\n".to_string(),
        );
        let decoded = Commit::decode(&commit.encode()).unwrap();
        assert_eq!(decoded, commit);
        assert!(decoded.is_merge());
        assert_eq!(decoded.id(), commit.id());
    }

    #[test]
    fn test_corrupt_tree_is_rejected() {
        assert!(Tree::decode(b"100644 name").is_err());
    }

    #[test]
    fn test_signature_time_zone() {
        let sig = Signature::decode("A <a@example.com> 100 -0130").unwrap();
        assert_eq!(sig.tz_offset, -90);
        assert_eq!(Signature::decode("A <a@example.com> 100").unwrap().tz_offset, 0);
        assert!(Signature::decode("A <a@example.com> 100 é100").is_none());
        assert!(Signature::decode("A <a@example.com> 100 0100").is_none());
        assert!(Signature::decode("A <a@example.com> 100 +1").is_none());
    }
}
