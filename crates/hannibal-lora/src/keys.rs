//! Tensor key helpers

/// Structural prefixes stripped before block matching, checked in order
pub const CANONICAL_PREFIXES: [&str; 2] = ["diffusion_model.", "transformer."];

/// Remove the first matching structural prefix from a key.
///
/// At most one prefix is removed; keys without a known prefix are returned
/// unchanged.
pub fn normalize_key(key: &str) -> &str {
    CANONICAL_PREFIXES
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix))
        .unwrap_or(key)
}

/// Block index of a normalized key: the second dot-separated segment
/// (`double_blocks.7.img_attn...` -> 7). `None` when that segment is missing
/// or not a number.
pub fn block_index(base_key: &str) -> Option<usize> {
    base_key.split('.').nth(1)?.parse().ok()
}
