//! LoRA registry
//!
//! Finds LoRA files in a list of search directories.

use crate::host::PathResolver;
use crate::loader::FileFormat;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// LoRA file registry backed by search directories
#[derive(Debug, Clone)]
pub struct LoraRegistry {
    /// Search paths, highest priority first
    search_paths: Vec<PathBuf>,
}

impl LoraRegistry {
    /// Create a registry over the given directories
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Add a search path with the lowest priority
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    /// Get search paths
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Scan search paths for LoRA files.
    ///
    /// Returns names relative to their search directory with `/` separators,
    /// sorted, with duplicates across directories removed.
    pub fn scan(&self) -> Vec<String> {
        let mut found = BTreeSet::new();
        for search_path in &self.search_paths {
            collect_files(search_path, search_path, &mut found);
        }
        debug!(count = found.len(), "scanned LoRA search paths");
        found.into_iter().collect()
    }

    /// Full path of a LoRA by name, from the first directory containing it
    pub fn full_path(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return None;
        }

        self.search_paths
            .iter()
            .map(|dir| dir.join(relative))
            .find(|path| path.is_file())
    }
}

impl PathResolver for LoraRegistry {
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.full_path(name)
    }

    fn available(&self) -> Vec<String> {
        self.scan()
    }
}

/// Check whether a path has a LoRA file extension
pub fn is_lora_file(path: &Path) -> bool {
    FileFormat::from_path(path).is_some()
}

fn collect_files(root: &Path, dir: &Path, found: &mut BTreeSet<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, found);
        } else if is_lora_file(&path) {
            if let Ok(relative) = path.strip_prefix(root) {
                let name: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                found.insert(name.join("/"));
            }
        }
    }
}
