//! Per-block LoRA filtering

use crate::block_spec::{BlockSelection, BlockSpec, BlockType};
use crate::error::Result;
use crate::keys::{block_index, normalize_key};
use crate::WeightDict;
use std::borrow::Cow;
use tracing::debug;

/// Keep only the tensors that belong to blocks selected by `spec`.
///
/// An empty spec disables filtering and hands back the input as-is.
pub fn filter_blocks<'a>(weights: &'a WeightDict, spec: &BlockSpec) -> Cow<'a, WeightDict> {
    if spec.is_empty() {
        return Cow::Borrowed(weights);
    }

    let filtered: WeightDict = weights
        .iter()
        .filter(|(key, _)| spec.entries().iter().any(|entry| matches_entry(key, entry)))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    debug!(
        kept = filtered.len(),
        total = weights.len(),
        spec = %spec,
        "filtered LoRA blocks"
    );
    Cow::Owned(filtered)
}

/// Parse `blocks_spec` and filter in one step
pub fn filter_lora_keys<'a>(
    weights: &'a WeightDict,
    blocks_spec: &str,
) -> Result<Cow<'a, WeightDict>> {
    let spec = BlockSpec::parse(blocks_spec)?;
    Ok(filter_blocks(weights, &spec))
}

/// Block a key belongs to, if it carries a block marker and a numeric index
pub fn key_block(key: &str) -> Option<(BlockType, usize)> {
    let base_key = normalize_key(key);
    let block_type = [BlockType::Double, BlockType::Single]
        .into_iter()
        .find(|t| t.key_marker().is_some_and(|marker| base_key.contains(marker)))?;
    Some((block_type, block_index(base_key)?))
}

fn matches_entry(key: &str, entry: &BlockSelection) -> bool {
    let Some(marker) = entry.block_type.key_marker() else {
        return false;
    };

    let base_key = normalize_key(key);
    if !base_key.contains(marker) {
        return false;
    }

    match block_index(base_key) {
        Some(index) => entry.range.contains(index),
        None => {
            debug!(key, "no block index in key, skipping for {}", entry);
            false
        }
    }
}
