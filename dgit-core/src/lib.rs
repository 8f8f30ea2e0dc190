//! DGit Core Library
//!
//! Version control for structured datasets over a git object model:
//! - Object model (Blob, Tree, Commit) with git-compatible ids
//! - Object and ref stores (in memory and on disk)
//! - Object-id cache that skips serialization of unchanged datasets
//! - Working-tree and change-set projections
//! - Commit synchronization (plain, merge and stash commits)
//! - History navigation (commits, diffs, references, entries)

pub mod object;
pub mod storage;
pub mod repository;
pub mod disk_repository;
pub mod error;
pub mod model;
pub mod path;
pub mod store;
pub mod memory_store;
pub mod cache;
pub mod config;
pub mod repository_info;
pub mod projection;
pub mod workspace_tree;
pub mod change_tree;
pub mod converter;
pub mod inserter;
pub mod commit_writer;
pub mod commits;
pub mod diffs;
pub mod references;
pub mod entries;

pub use object::{Blob, Commit, EntryMode, Object, ObjectId, ObjectKind, Signature, Tree, TreeEntry};
pub use storage::{branch_ref, ObjectStore, RefLogEntry, RefStore, Repository, StorageError, STASH_REF};
pub use repository::MemoryRepository;
pub use disk_repository::DiskRepository;
pub use error::{Result, SyncError};
pub use model::{
    CategoryInfo, CategoryPath, Change, ChangeKind, DatasetDescriptor, DatasetState, DiffEntry, DiffType, ModelType, Reference,
};
pub use store::{DatasetStore, JsonSerializer, RecordSerializer};
pub use memory_store::MemoryDatasetStore;
pub use cache::{CacheEntry, ObjectIdCache};
pub use config::{MergePolicy, SyncConfig};
pub use repository_info::{LibraryLink, RepositoryInfo};
pub use projection::{DepthFirst, Node, NodeId, NodeKind, Projection};
pub use workspace_tree::WorkspaceTree;
pub use change_tree::ChangeTree;
pub use converter::Converter;
pub use commit_writer::{CommitWriter, SyncContext};
pub use commits::{CommitInfo, Commits};
pub use diffs::{DiffSide, Diffs};
pub use references::References;
pub use entries::{Entries, Entry, EntryKind};
