//! Township simulation runner.
//!
//! # Usage
//!
//! ```bash
//! township run --world town.json [--ticks 144] [--stream] [--config township.toml]
//! township check --world town.toml
//! ```
//!
//! # Configuration
//!
//! Built-in defaults, overridden by the `--config` TOML file, overridden by
//! `--log-level` / `RUST_LOG` for logging.

use anyhow::Result;
use clap::Parser;

use township_sim::commands::{check_world, run_world};
use township_sim::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { world, ticks, stream } => {
            run_world(cli.config.as_deref(), &world, ticks, stream, cli.log_level.as_deref()).await?;
        }
        Commands::Check { world } => {
            check_world(cli.config.as_deref(), &world, cli.log_level.as_deref())?;
        }
    }

    Ok(())
}
