//! Blocks spec command

use hannibal_lora::{BlockSpec, LoraError};

pub fn run(spec: &str) -> Result<(), LoraError> {
    let parsed = BlockSpec::parse(spec)?;

    if parsed.is_empty() {
        println!("Empty spec: every tensor is kept.");
        return Ok(());
    }

    println!("Blocks spec: {}", parsed);
    println!();
    for entry in parsed.entries() {
        match entry.block_type.key_marker() {
            Some(marker) => println!(
                "  {:<8} {:>3}-{:<3} ({} blocks, matches {}.N)",
                entry.block_type,
                entry.range.start,
                entry.range.end,
                entry.range.len(),
                marker
            ),
            None => println!(
                "  {:<8} {:>3}-{:<3} (unknown type, selects nothing)",
                entry.block_type, entry.range.start, entry.range.end
            ),
        }
    }

    Ok(())
}
