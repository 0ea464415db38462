//! CLI definitions for sandboxd.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// sandboxd CLI.
#[derive(Parser)]
#[command(name = "sandboxd")]
#[command(about = "Supervisor for a disposable, remotely viewable browser sandbox")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.config/sandboxd/sandbox.toml if
    /// present, else the built-in sandbox)
    #[arg(short, long, env = "SANDBOXD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start the sandbox and supervise it until shutdown (default)
    Run {
        /// PID file path (overrides `sandbox.pid_file`)
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },

    /// Ask a running supervisor to tear the sandbox down
    Stop {
        /// PID file path (overrides `sandbox.pid_file`)
        #[arg(long)]
        pid_file: Option<PathBuf>,

        /// Kill the supervisor instead of requesting a graceful stop
        #[arg(long)]
        force: bool,
    },

    /// Query the control API of a running supervisor
    Status {
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the configuration, then print the startup levels
    CheckConfig,

    /// Print the built-in configuration as TOML
    PrintDefaultConfig,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run { pid_file: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["sandboxd"]).unwrap();
        assert!(cli.command.is_none());
        assert!(matches!(
            cli.command.unwrap_or_default(),
            Commands::Run { pid_file: None }
        ));
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["sandboxd", "stop", "--force", "--config", "/etc/sandbox.toml"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/sandbox.toml")));
        assert!(matches!(cli.command, Some(Commands::Stop { force: true, .. })));
    }

    #[test]
    fn test_check_config_subcommand() {
        let cli = Cli::try_parse_from(["sandboxd", "check-config"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
