//! Sluice CLI - Main entry point

use clap::Parser;
use sluice_cli::{Cli, Commands};
use sluice_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Verbose mode logs debug to the console, otherwise only warnings
    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("sluice-cli")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let _ = init_logging(&log_config);

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> sluice_cli::Result<()> {
    let config_path = cli.config.as_deref();

    match &cli.command {
        Commands::Simulate(args) => sluice_cli::commands::simulate::run(config_path, args).await,
        Commands::Migrate { database_url } => {
            sluice_cli::commands::migrate::run(database_url.as_deref()).await
        }
        Commands::Inspect(args) => sluice_cli::commands::inspect::run(config_path, args).await,
    }
}
