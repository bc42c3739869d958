//! Sluice CLI Library
//!
//! Operator tooling for sluice partition coordination:
//!
//! - **Simulation**: run several coordinators against one store (`sluice simulate`)
//! - **Schema**: apply the PostgreSQL migrations (`sluice migrate`)
//! - **Inspection**: show the lease records of a source (`sluice inspect`)

pub mod commands;
pub mod error;

pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::inspect::InspectArgs;
use commands::simulate::SimulateArgs;

/// Sluice - lease-based partition coordination
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Coordinator config file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run several coordinators in-process until every partition completes
    Simulate(SimulateArgs),

    /// Apply database migrations
    Migrate {
        /// PostgreSQL connection URL
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },

    /// Show the partition records of a source
    Inspect(InspectArgs),
}
