//! CLI argument surface: exposes the configured workload and its knobs,
//! exiting 0 on normal termination.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rowcc")]
#[command(author, version, about = "In-memory row-level concurrency-control kernel", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Spin up the worker pool and run the configured workload until
    /// termination.
    Run {
        /// Configuration file path (TOML or JSON). Omit to run with
        /// defaults.
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Load and validate a configuration file without running anything.
    Check {
        #[arg(short, long)]
        config: String,
    },

    /// Show version information.
    Version,
}
