//! CLI argument parsing for the `township` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Township simulation runner
///
/// Loads a world definition and runs the tick loop headless.
#[derive(Parser, Debug)]
#[command(name = "township")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML config file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Set log level (trace, debug, info, warn, error); overrides the config
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Township commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the simulation and print the final snapshot as JSON
    Run {
        /// World definition (JSON, or TOML by extension)
        #[arg(short, long)]
        world: PathBuf,

        /// Number of ticks to run
        #[arg(short, long, default_value_t = 144)]
        ticks: u64,

        /// Print one JSON line per completed tick as well
        #[arg(long)]
        stream: bool,
    },

    /// Validate a world definition and config without running
    Check {
        /// World definition (JSON, or TOML by extension)
        #[arg(short, long)]
        world: PathBuf,
    },
}
