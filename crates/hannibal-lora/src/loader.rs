//! LoRA tensor file loading from disk

use crate::config::LoaderConfig;
use crate::error::{LoraError, Result};
use crate::host::TensorLoader;
use crate::WeightDict;
use candle_core::{safetensors, Device};
use std::path::Path;
use tracing::info;

/// On-disk layout of a tensor file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Safetensors,
    /// PyTorch pickle checkpoint
    Pickle,
}

impl FileFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "safetensors" => Some(Self::Safetensors),
            "pt" | "pth" | "ckpt" | "bin" => Some(Self::Pickle),
            _ => None,
        }
    }
}

/// Loads LoRA tensors onto the CPU
#[derive(Debug, Clone)]
pub struct FileLoader {
    max_file_size: u64,
}

impl FileLoader {
    /// Create a new loader
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
        }
    }

    /// Load every tensor in `path`
    pub fn load_file(&self, path: &Path) -> Result<WeightDict> {
        let format = FileFormat::from_path(path)
            .ok_or_else(|| LoraError::UnsupportedFormat(path.to_path_buf()))?;

        let size = std::fs::metadata(path)?.len();
        if size > self.max_file_size {
            return Err(LoraError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit: self.max_file_size,
            });
        }

        let weights: WeightDict = match format {
            FileFormat::Safetensors => safetensors::load(path, &Device::Cpu)?,
            FileFormat::Pickle => candle_core::pickle::read_all(path)?.into_iter().collect(),
        };

        info!(
            path = %path.display(),
            tensors = weights.len(),
            bytes = size,
            "Loaded LoRA file"
        );
        Ok(weights)
    }
}

impl Default for FileLoader {
    fn default() -> Self {
        Self::new(&LoaderConfig::default())
    }
}

impl TensorLoader for FileLoader {
    fn load(&self, path: &Path) -> Result<WeightDict> {
        self.load_file(path)
    }
}
