//! Loader configuration

use crate::block_spec::DEFAULT_BLOCKS_SPEC;
use crate::error::{LoraError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Loader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Directories searched for LoRA files, in priority order
    pub search_paths: Vec<PathBuf>,
    /// Spec used when the caller does not provide one
    pub default_blocks_spec: String,
    /// Maximum tensor file size in bytes
    pub max_file_size: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            default_blocks_spec: DEFAULT_BLOCKS_SPEC.to_string(),
            max_file_size: 16 * 1024 * 1024 * 1024, // 16GB
        }
    }
}

impl LoaderConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| LoraError::Config(format!("{}: {e}", path.display())))
    }

    /// Replace the search paths
    pub fn with_search_paths(
        mut self,
        paths: impl IntoIterator<Item = impl Into<PathBuf>>,
    ) -> Self {
        self.search_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }
}

fn default_search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("models").join("loras"),
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hannibal")
            .join("loras"),
    ]
}
