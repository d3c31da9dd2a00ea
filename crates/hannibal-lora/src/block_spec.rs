//! Block selection specs
//!
//! Parses the compact range syntax used to pick transformer blocks, e.g.
//! `double:0-19,single:0-39`. Each comma-separated token names a block type
//! and an inclusive index range.

use crate::error::{LoraError, Result};
use std::fmt;
use std::str::FromStr;

/// Default spec offered by the node: every Flux double and single block
pub const DEFAULT_BLOCKS_SPEC: &str = "double:0-19,single:0-39";

/// Transformer block family
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockType {
    /// Dual-stream blocks (`double_blocks.N`)
    Double,
    /// Single-stream blocks (`single_blocks.N`)
    Single,
    /// Any other tag; accepted by the parser but never matches a key
    Unknown(String),
}

impl BlockType {
    /// Key fragment identifying tensors of this block type
    pub fn key_marker(&self) -> Option<&'static str> {
        match self {
            Self::Double => Some("double_blocks"),
            Self::Single => Some("single_blocks"),
            Self::Unknown(_) => None,
        }
    }

    /// Tag as written in a spec
    pub fn as_str(&self) -> &str {
        match self {
            Self::Double => "double",
            Self::Single => "single",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<&str> for BlockType {
    fn from(tag: &str) -> Self {
        match tag {
            "double" => Self::Double,
            "single" => Self::Single,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Inclusive range of block indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: usize,
    pub end: usize,
}

impl BlockRange {
    /// Check whether an index falls inside the range
    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }

    /// Iterate over every index in the range
    pub fn indices(&self) -> impl Iterator<Item = usize> {
        self.start..=self.end
    }

    /// Number of indices covered, saturating at `usize::MAX`
    pub fn len(&self) -> usize {
        (self.end - self.start).saturating_add(1)
    }

    /// Always false; a parsed range holds at least one index
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// One `type:start-end` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSelection {
    pub block_type: BlockType,
    pub range: BlockRange,
}

impl BlockSelection {
    /// Check whether this selection covers the given block
    pub fn selects(&self, block_type: &BlockType, index: usize) -> bool {
        &self.block_type == block_type && self.range.contains(index)
    }
}

impl fmt::Display for BlockSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.block_type, self.range.start, self.range.end)
    }
}

/// Parsed block spec
///
/// Entries keep their input order and are never merged: two entries of the
/// same type are independent alternatives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSpec {
    entries: Vec<BlockSelection>,
}

impl BlockSpec {
    /// Parse a spec string. The empty string yields an empty spec, which
    /// disables filtering.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Ok(Self::default());
        }

        let entries = input
            .split(',')
            .map(parse_token)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries })
    }

    /// Parsed entries in input order
    pub fn entries(&self) -> &[BlockSelection] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl FromStr for BlockSpec {
    type Err = LoraError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for BlockSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

fn parse_token(token: &str) -> Result<BlockSelection> {
    let parts: Vec<&str> = token.split(':').collect();
    let [block_type, range] = parts.as_slice() else {
        return Err(LoraError::invalid_spec(token, "expected exactly one ':'"));
    };

    let bounds: Vec<&str> = range.split('-').collect();
    let [start, end] = bounds.as_slice() else {
        return Err(LoraError::invalid_spec(token, "expected a 'start-end' range"));
    };

    let start = parse_bound(token, start)?;
    let end = parse_bound(token, end)?;
    if start > end {
        return Err(LoraError::invalid_spec(
            token,
            format!("invalid range: {start} > {end}"),
        ));
    }

    Ok(BlockSelection {
        block_type: BlockType::from(block_type.trim()),
        range: BlockRange { start, end },
    })
}

fn parse_bound(token: &str, bound: &str) -> Result<usize> {
    bound
        .trim()
        .parse()
        .map_err(|_| LoraError::invalid_spec(token, format!("'{bound}' is not a block index")))
}
