//! Hannibal LoRA - block-selective LoRA loading
//!
//! Loads a LoRA file, translates Musubi Tuner keys into the canonical
//! Diffusers layout and keeps only the transformer blocks named in a
//! compact spec such as `double:0-19,single:0-39`. The filtered weights are
//! handed to a host-provided merge service.
//!
//! # Pipeline
//!
//! ```text
//! lora_name → PathResolver → LoraCache/TensorLoader → convert → filter_blocks → ModelMerger
//! ```
//!
//! # Block specs
//!
//! - Tokens are `type:start-end`, comma-separated, ranges inclusive
//! - `double` matches `double_blocks.N`, `single` matches `single_blocks.N`
//! - Other types parse but select nothing
//! - An empty spec keeps every tensor

pub mod block_spec;
pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod format;
pub mod host;
pub mod keys;
pub mod loader;
pub mod node;
pub mod registry;
pub mod schema;

use candle_core::Tensor;
use std::collections::HashMap;

/// LoRA tensors by key
pub type WeightDict = HashMap<String, Tensor>;

pub use block_spec::{BlockRange, BlockSelection, BlockSpec, BlockType, DEFAULT_BLOCKS_SPEC};
pub use cache::{CachedLora, LoraCache};
pub use config::LoaderConfig;
pub use error::{LoraError, Result};
pub use filter::{filter_blocks, filter_lora_keys, key_block};
pub use format::{convert, detect_format, Conversion, ConversionReport, LoraFormat};
pub use host::{ModelMerger, PathResolver, TensorLoader};
pub use keys::normalize_key;
pub use loader::{FileFormat, FileLoader};
pub use node::{HannibalLoraLoader, NodeInputs};
pub use registry::LoraRegistry;
pub use schema::NodeDefinition;
