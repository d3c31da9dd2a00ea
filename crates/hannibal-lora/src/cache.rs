//! Single-slot cache of the last loaded LoRA file
//!
//! Re-running a node with the same file skips the disk read. Loading a
//! different file evicts the previous one, so at most one raw dict is held.

use crate::error::Result;
use crate::WeightDict;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Raw weights together with the file they came from
#[derive(Debug, Clone)]
pub struct CachedLora {
    pub source: PathBuf,
    pub weights: WeightDict,
}

/// Cache holding the most recently loaded LoRA.
///
/// Not synchronized; each loader owns its own cache.
#[derive(Debug, Default)]
pub struct LoraCache {
    entry: Option<CachedLora>,
}

impl LoraCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached weights for `path`, loading them with `load` on a miss
    pub fn get_or_load<F>(&mut self, path: &Path, load: F) -> Result<&WeightDict>
    where
        F: FnOnce(&Path) -> Result<WeightDict>,
    {
        let entry = match self.entry.take() {
            Some(entry) if entry.source == path => {
                debug!(path = %path.display(), "LoRA cache hit");
                entry
            }
            _ => {
                debug!(path = %path.display(), "LoRA cache miss");
                CachedLora {
                    source: path.to_path_buf(),
                    weights: load(path)?,
                }
            }
        };

        Ok(&self.entry.insert(entry).weights)
    }

    /// Check whether the cached entry came from `path`
    pub fn holds(&self, path: &Path) -> bool {
        self.entry.as_ref().is_some_and(|e| e.source == path)
    }

    /// Drop the cached entry
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Path of the cached file, if any
    pub fn source(&self) -> Option<&Path> {
        self.entry.as_ref().map(|e| e.source.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}
