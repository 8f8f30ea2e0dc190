//! Synchronization settings
//!
//! Stored as `dgit-config.json` next to the repository. A missing file means
//! defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "dgit-config.json";

/// Which side wins when an untouched subtree differs between the local and
/// the remote parent of a merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    #[default]
    PreferLocal,
    PreferRemote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Branch that commits and merges advance
    pub branch: String,
    /// Concurrent record serializations
    pub converter_workers: usize,
    pub merge_policy: MergePolicy,
    /// Objects buffered by the inserter before they are written
    pub insert_batch_size: usize,
    /// Skip writing objects the store already holds
    pub check_existing: bool,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            converter_workers: default_workers(),
            merge_policy: MergePolicy::default(),
            insert_batch_size: 256,
            check_existing: true,
        }
    }
}

impl SyncConfig {
    /// Load the config of a repository directory
    pub fn load(repo_path: &Path) -> Result<Self> {
        let config_path = repo_path.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read sync config from {:?}", config_path))?;
        let config: SyncConfig =
            serde_json::from_str(&data).with_context(|| "Failed to parse sync config JSON")?;
        Ok(config.normalized())
    }

    /// Save the config into a repository directory
    pub fn save(&self, repo_path: &Path) -> Result<()> {
        let config_path = repo_path.join(CONFIG_FILE);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }

    /// Zero sizes mean "one"
    fn normalized(mut self) -> Self {
        self.converter_workers = self.converter_workers.max(1);
        self.insert_batch_size = self.insert_batch_size.max(1);
        self
    }
}
