use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "plugkeeper")]
#[command(about = "Unattended update, backup and console agent for game servers", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to $PLUGKEEPER_CONFIG or config/plugkeeper.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the agent until stopped (default)
    Run,
    /// Run one update cohort and exit
    Check,
    /// Run one backup cohort and exit
    Backup,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::try_parse_from(["plugkeeper"]).unwrap();
        assert_eq!(cli.command(), Commands::Run);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["plugkeeper", "check", "--config", "/etc/plugkeeper.toml"]).unwrap();
        assert_eq!(cli.command(), Commands::Check);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/plugkeeper.toml")));
    }
}
