//! LoRA file commands

use hannibal_lora::{
    convert, filter_lora_keys, key_block, BlockType, FileLoader, LoaderConfig, LoraRegistry,
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub fn list(config: &LoaderConfig) {
    let registry = LoraRegistry::new(config.search_paths.clone());

    println!("LoRA Search Paths:");
    for path in registry.search_paths() {
        println!("  - {}", path.display());
    }

    println!();

    let found = registry.scan();
    if found.is_empty() {
        println!("No LoRAs found.");
        return;
    }

    println!("Found {} LoRA(s):", found.len());
    for name in found {
        println!("  - {}", name);
    }
}

pub fn inspect(config: &LoaderConfig, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let raw = FileLoader::new(config).load_file(path)?;
    let conversion = convert(&raw)?;
    let report = &conversion.report;

    let mut double: BTreeMap<usize, usize> = BTreeMap::new();
    let mut single: BTreeMap<usize, usize> = BTreeMap::new();
    let mut other = 0usize;
    for key in conversion.weights.keys() {
        match key_block(key) {
            Some((BlockType::Double, index)) => *double.entry(index).or_default() += 1,
            Some((BlockType::Single, index)) => *single.entry(index).or_default() += 1,
            _ => other += 1,
        }
    }

    println!("LoRA: {}", path.display());
    println!("==============================");
    println!("Format:      {}", report.format);
    println!("Raw tensors: {}", raw.len());
    println!("Converted:   {}", report.converted);
    println!();
    print_blocks("Double blocks", &double);
    print_blocks("Single blocks", &single);
    println!("Other tensors: {}", other);

    if !report.missing_alpha.is_empty() {
        println!();
        println!("Missing alpha (applied unscaled):");
        for module in &report.missing_alpha {
            println!("  - {}", module);
        }
    }

    if !report.unexpected_keys.is_empty() {
        println!();
        println!("Skipped keys:");
        for key in &report.unexpected_keys {
            println!("  - {}", key);
        }
    }

    if report.ignored_keys > 0 {
        println!();
        println!("Ignored {} non-UNet keys", report.ignored_keys);
    }

    Ok(())
}

pub fn extract(
    config: &LoaderConfig,
    path: &Path,
    blocks_spec: &str,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = FileLoader::new(config).load_file(path)?;
    let conversion = convert(&raw)?;
    let filtered = filter_lora_keys(&conversion.weights, blocks_spec)?;

    candle_core::safetensors::save(&*filtered, output)?;

    info!(
        output = %output.display(),
        tensors = filtered.len(),
        "Wrote filtered LoRA"
    );
    println!(
        "Wrote {} of {} tensors to {}",
        filtered.len(),
        conversion.weights.len(),
        output.display()
    );
    Ok(())
}

fn print_blocks(label: &str, counts: &BTreeMap<usize, usize>) {
    if counts.is_empty() {
        println!("{}: none", label);
        return;
    }

    let indices: Vec<String> = counts.keys().map(|i| i.to_string()).collect();
    let tensors: usize = counts.values().sum();
    println!("{}: {} blocks, {} tensors", label, counts.len(), tensors);
    println!("  indices: {}", indices.join(","));
}
