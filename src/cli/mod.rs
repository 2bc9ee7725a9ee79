//! CLI interface
//!
//! Single `start` command; every engine option can come from the config
//! file or be overridden on the command line.

mod start;

pub use start::StartArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "kalshi-momentum")]
#[command(about = "Momentum-convergence trading engine for Kalshi binary markets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the trading engine
    Start(StartArgs),
}
