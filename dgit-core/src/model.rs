//! Dataset model as seen by the version-control layer
//!
//! The record model itself belongs to the dataset store; this module only
//! carries what is needed to place a record in a tree and to decide whether
//! its stored object id is still current.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::object::ObjectId;
use crate::path::{self, DatasetPath};

/// Root folders of a repository tree, in their fixed enumeration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelType {
    Project,
    ImpactMethod,
    ImpactCategory,
    ProductSystem,
    Process,
    Flow,
    FlowProperty,
    UnitGroup,
    Actor,
    Source,
    Currency,
    Location,
    SocialIndicator,
    DqSystem,
    Parameter,
    Result,
    Epd,
}

impl ModelType {
    pub const ALL: [ModelType; 17] = [
        ModelType::Project,
        ModelType::ImpactMethod,
        ModelType::ImpactCategory,
        ModelType::ProductSystem,
        ModelType::Process,
        ModelType::Flow,
        ModelType::FlowProperty,
        ModelType::UnitGroup,
        ModelType::Actor,
        ModelType::Source,
        ModelType::Currency,
        ModelType::Location,
        ModelType::SocialIndicator,
        ModelType::DqSystem,
        ModelType::Parameter,
        ModelType::Result,
        ModelType::Epd,
    ];

    /// Folder name in the tree
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Project => "Project",
            ModelType::ImpactMethod => "ImpactMethod",
            ModelType::ImpactCategory => "ImpactCategory",
            ModelType::ProductSystem => "ProductSystem",
            ModelType::Process => "Process",
            ModelType::Flow => "Flow",
            ModelType::FlowProperty => "FlowProperty",
            ModelType::UnitGroup => "UnitGroup",
            ModelType::Actor => "Actor",
            ModelType::Source => "Source",
            ModelType::Currency => "Currency",
            ModelType::Location => "Location",
            ModelType::SocialIndicator => "SocialIndicator",
            ModelType::DqSystem => "DqSystem",
            ModelType::Parameter => "Parameter",
            ModelType::Result => "Result",
            ModelType::Epd => "Epd",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown model type: {}", s))
    }
}

/// Unescaped category names from the model-type root downwards
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryPath(Vec<String>);

impl CategoryPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Path of a direct child category
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }
}

impl From<&[&str]> for CategoryPath {
    fn from(segments: &[&str]) -> Self {
        Self(segments.iter().map(|s| s.to_string()).collect())
    }
}

/// A category folder as reported by the dataset store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryInfo {
    /// Unescaped name
    pub name: String,
    /// Set when the category was brought in by a mounted library
    pub library: Option<String>,
}

impl CategoryInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            library: None,
        }
    }

    pub fn from_library(mut self, library: impl Into<String>) -> Self {
        self.library = Some(library.into());
        self
    }
}

/// Version stamp of a dataset, maintained by the dataset store.
///
/// Two datasets with the same identity and equal stamps serialize to the
/// same bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetState {
    pub version: u64,
    /// Milliseconds since the epoch
    pub last_change: i64,
}

impl DatasetState {
    pub fn new(version: u64, last_change: i64) -> Self {
        Self {
            version,
            last_change,
        }
    }
}

/// Current state of one dataset in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub model_type: ModelType,
    pub ref_id: String,
    pub category: CategoryPath,
    pub state: DatasetState,
    /// Set when the dataset belongs to a mounted library; such datasets are
    /// not versioned in the repository.
    pub library: Option<String>,
}

impl DatasetDescriptor {
    pub fn new(model_type: ModelType, ref_id: impl Into<String>, category: CategoryPath, state: DatasetState) -> Self {
        Self {
            model_type,
            ref_id: ref_id.into(),
            category,
            state,
            library: None,
        }
    }

    pub fn from_library(mut self, library: impl Into<String>) -> Self {
        self.library = Some(library.into());
        self
    }

    pub fn dataset_path(&self) -> DatasetPath {
        DatasetPath::new(self.model_type, self.category.clone(), self.ref_id.clone())
    }

    /// Escaped tree path
    pub fn path(&self) -> String {
        self.dataset_path().to_path()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One pending edit, owned by the caller of a single synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Escaped tree path
    pub path: String,
    pub kind: ChangeKind,
    /// Read the content from this file instead of serializing a record
    pub raw_file: Option<PathBuf>,
}

impl Change {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            raw_file: None,
        }
    }

    pub fn added(dataset: &DatasetDescriptor) -> Self {
        Self::new(dataset.path(), ChangeKind::Added)
    }

    pub fn modified(dataset: &DatasetDescriptor) -> Self {
        Self::new(dataset.path(), ChangeKind::Modified)
    }

    pub fn deleted(dataset: &DatasetDescriptor) -> Self {
        Self::new(dataset.path(), ChangeKind::Deleted)
    }

    /// A binary attachment of `dataset`, stored as `<refId>_bin/<name>`
    pub fn attachment(dataset: &DatasetDescriptor, name: &str, kind: ChangeKind, source: impl Into<PathBuf>) -> Self {
        let folder = format!("{}{}", dataset.ref_id, path::BINARY_SUFFIX);
        let prefix = path::join(&path::category_path(dataset.model_type, &dataset.category), &folder);
        Self {
            path: path::join(&prefix, &path::escape_segment(name)),
            kind,
            raw_file: Some(source.into()),
        }
    }

    pub fn is_deletion(&self) -> bool {
        self.kind == ChangeKind::Deleted
    }
}

/// A dataset located in a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub model_type: ModelType,
    pub ref_id: String,
    pub commit_id: ObjectId,
    /// Escaped tree path
    pub path: String,
    /// Blob id; `None` when the dataset was deleted in `commit_id`
    pub object_id: Option<ObjectId>,
}

impl Reference {
    /// Build from a dataset tree path; `None` for non-dataset paths
    pub fn from_path(path: &str, commit_id: ObjectId, object_id: Option<ObjectId>) -> Option<Self> {
        let dataset = DatasetPath::parse(path)?;
        Some(Self {
            model_type: dataset.model_type,
            ref_id: dataset.ref_id,
            commit_id,
            path: path.to_string(),
            object_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffType {
    Added,
    Modified,
    Deleted,
    /// Same dataset moved to another category
    Renamed,
}

/// One file-level difference between two trees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub diff_type: DiffType,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub old_id: Option<ObjectId>,
    /// `None` on the workspace side when the content was not computed yet
    pub new_id: Option<ObjectId>,
}

impl DiffEntry {
    /// The path on the newer side, or the old path for deletions
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_type_names_roundtrip() {
        for t in ModelType::ALL {
            assert_eq!(t.as_str().parse::<ModelType>().unwrap(), t);
        }
        assert!("Unknown".parse::<ModelType>().is_err());
    }

    #[test]
    fn test_attachment_path() {
        let dataset = DatasetDescriptor::new(
            ModelType::Process,
            "rec1",
            CategoryPath::from(&["energy"][..]),
            DatasetState::new(1, 10),
        );
        let change = Change::attachment(&dataset, "report.pdf", ChangeKind::Added, "/tmp/report.pdf");
        assert_eq!(change.path, "Process/energy/rec1_bin/report.pdf");
        assert!(change.raw_file.is_some());
        assert_eq!(Change::deleted(&dataset).path, "Process/energy/rec1.json");
    }
}
