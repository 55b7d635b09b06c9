//! Parses the command line arguments.
//!
//! Basic usage for running a worker with logging on and a non-default
//! config path:
//!
//! ```text
//! engine --log --config /etc/engine/client.conf
//! ```

use clap::Parser;

use crate::config::{Config, ConfigError};
use crate::logging::init_events;

/// Stores the different command line arguments.
#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    log: bool,

    #[arg(short, long, default_value = "client.conf")]
    config: String,
}

/// Parses command line arguments, turns on logging if requested, and loads
/// the configuration file. Returns the loaded [`Config`] so the caller can
/// hand it to the worker(s) it spawns.
pub fn parse_cli() -> Result<Config, ConfigError> {
    let cli = Cli::parse();
    if cli.log {
        init_events();
    }
    Config::load(&cli.config)
}
