// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use spectral_indices::batch::{execute_run, process_batch, GlobalParams};
use spectral_indices::cli::{Cli, Commands};
use spectral_indices::logger;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match cli.command {
        Commands::Run(args) => {
            let spec = args.into_spec();
            let summary = execute_run(&spec, &GlobalParams::default())
                .with_context(|| format!("processing scene {}", spec.scene))?;
            info!(
                "Processing complete: {} product(s), {} windows",
                summary.bands_written.len(),
                summary.windows
            );
        }
        Commands::Batch { config } => {
            process_batch(&config)?;
        }
    }

    Ok(())
}
