//! CLI argument definitions using clap
//!
//! Commands:
//! - kvquery explain --config <path>
//! - kvquery query --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// kvquery - compile and run queries over an ordered key-value datastore
#[derive(Parser, Debug)]
#[command(name = "kvquery")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a query read from stdin and print its plan
    Explain {
        /// Path to configuration file
        #[arg(long, default_value = "./kvquery.json")]
        config: PathBuf,
    },

    /// Execute a query read from stdin against the configured dataset
    Query {
        /// Path to configuration file
        #[arg(long, default_value = "./kvquery.json")]
        config: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
