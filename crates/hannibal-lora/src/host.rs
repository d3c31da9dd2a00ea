//! Services provided by the node host
//!
//! The loader never touches a model directly. It asks the host to find the
//! LoRA file, to read tensors from it and to merge the result into a model.

use crate::error::Result;
use crate::WeightDict;
use std::path::{Path, PathBuf};

/// Maps a LoRA name from the node's dropdown to a file on disk
pub trait PathResolver {
    /// Full path for `name`, or `None` when the host does not know it
    fn resolve(&self, name: &str) -> Option<PathBuf>;

    /// Names offered to the user
    fn available(&self) -> Vec<String>;
}

/// Reads a tensor file into a weight dict
pub trait TensorLoader {
    fn load(&self, path: &Path) -> Result<WeightDict>;
}

impl<F> TensorLoader for F
where
    F: Fn(&Path) -> Result<WeightDict>,
{
    fn load(&self, path: &Path) -> Result<WeightDict> {
        self(path)
    }
}

/// Applies LoRA weights to a model
pub trait ModelMerger {
    /// Model handle; opaque to the loader
    type Model;

    /// Merge `weights` into `model` scaled by `strength`.
    ///
    /// `Ok(None)` means the merge was a no-op and the input model stays in use.
    fn merge(&self, model: &Self::Model, weights: &WeightDict, strength: f32)
        -> Result<Option<Self::Model>>;
}
