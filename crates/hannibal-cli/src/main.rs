//! Hannibal CLI - block-selective LoRA tooling
//!
//! Inspect, filter and extract LoRA files outside of a node host.

use clap::{Parser, Subcommand};
use hannibal_lora::LoaderConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

/// Hannibal - LoRA loader with per-block selection
#[derive(Parser)]
#[command(name = "hannibal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Loader configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a blocks spec and show the selected blocks
    Blocks {
        /// Spec such as "double:0-19,single:0-39"
        spec: String,
    },

    /// List LoRA files in the search paths
    List,

    /// Show format and block layout of a LoRA file
    Inspect {
        /// LoRA file path
        path: PathBuf,
    },

    /// Convert and filter a LoRA, writing the result as safetensors
    Extract {
        /// LoRA file path
        path: PathBuf,

        /// Blocks to keep (empty keeps everything)
        #[arg(short, long)]
        blocks: Option<String>,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the node definition as JSON
    Node,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(!cli.no_color)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };

    match cli.command {
        Commands::Blocks { spec } => commands::blocks::run(&spec)?,
        Commands::List => commands::lora::list(&config),
        Commands::Inspect { path } => commands::lora::inspect(&config, &path)?,
        Commands::Extract {
            path,
            blocks,
            output,
        } => {
            let spec = blocks.unwrap_or_else(|| config.default_blocks_spec.clone());
            commands::lora::extract(&config, &path, &spec, &output)?;
        }
        Commands::Node => commands::node::run(&config)?,
    }

    Ok(())
}
