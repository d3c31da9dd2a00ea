//! Node definition command

use hannibal_lora::{HannibalLoraLoader, LoaderConfig};

pub fn run(config: &LoaderConfig) -> Result<(), Box<dyn std::error::Error>> {
    let loader = HannibalLoraLoader::from_config(config);
    println!("{}", loader.definition().to_json()?);
    Ok(())
}
