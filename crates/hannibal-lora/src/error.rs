//! Error types for LoRA loading

use std::path::PathBuf;
use thiserror::Error;

/// Loader errors
#[derive(Debug, Error)]
pub enum LoraError {
    /// A `blocks_spec` token could not be parsed
    #[error("Invalid blocks_spec token '{token}': {reason}")]
    InvalidSpec { token: String, reason: String },

    /// The LoRA file could not be found
    #[error("LoRA '{name}' not found at {}", .path.display())]
    NotFound { name: String, path: PathBuf },

    /// The file extension is not a known tensor format
    #[error("Unsupported tensor file format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// The file exceeds the configured size limit
    #[error("File too large: {size} > {limit} ({})", .path.display())]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    /// Tensor operation or tensor IO failed
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The host merge service failed
    #[error("Merge failed: {0}")]
    Merge(String),
}

impl LoraError {
    pub(crate) fn invalid_spec(token: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            token: token.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for LoRA operations
pub type Result<T> = std::result::Result<T, LoraError>;
