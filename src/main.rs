//! sandboxd - supervisor for a disposable, remotely viewable browser sandbox.
//!
//! Main entry point for the sandboxd CLI.

mod cli;
mod cmd_control;
mod server;

use clap::Parser;

use sandboxd_config::{ConfigLoader, LoggingConfig};

use crate::cli::{Cli, Commands};
use crate::cmd_control::{check_config, print_default_config, show_status, stop_sandbox};
use crate::server::{init_tracing, run_sandbox};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or_default();

    match command {
        Commands::Run { pid_file } => {
            let config = ConfigLoader::discover(cli.config.as_deref())?;
            init_tracing(&config.logging)?;
            run_sandbox(config, pid_file).await
        }
        Commands::Stop { pid_file, force } => {
            init_tracing(&quiet_logging())?;
            let config = ConfigLoader::discover(cli.config.as_deref())?;
            stop_sandbox(&config, pid_file, force).await
        }
        Commands::Status { json } => {
            init_tracing(&quiet_logging())?;
            let config = ConfigLoader::discover(cli.config.as_deref())?;
            show_status(&config, json).await
        }
        Commands::CheckConfig => check_config(cli.config.as_deref()),
        Commands::PrintDefaultConfig => print_default_config(),
    }
}

/// Console-only warnings for the short-lived client commands.
fn quiet_logging() -> LoggingConfig {
    LoggingConfig {
        level: "warn".to_string(),
        ..Default::default()
    }
}
