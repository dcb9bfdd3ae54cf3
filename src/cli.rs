//! CLI argument parsing for the leadline-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "leadline-worker", about = "Leadline CRM import worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Mark orphaned `importing` runs as failed and exit
    Reconcile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["leadline-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_reconcile_command_parses() {
        let cli = Cli::parse_from(["leadline-worker", "reconcile"]);
        assert!(matches!(cli.command, Some(Command::Reconcile)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["leadline-worker"]);
        assert!(cli.command.is_none());
    }
}
