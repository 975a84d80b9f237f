//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// polarctl - Declarative PolarDB cluster provisioning.
#[derive(Parser, Debug)]
#[command(name = "polarctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the manifest.
    #[arg(short, long, global = true, env = "POLARDB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the manifest.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compare the manifest with the clusters and show the plan.
    Plan {
        /// Show field level differences.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Apply the plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Keep going after a failed action.
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Show the tracked clusters and their remote status.
    Status,

    /// Report clusters whose remote state differs from the manifest.
    Drift,

    /// Delete every tracked cluster.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// List clusters in the region.
    List {
        /// Regular expression matched against the description.
        #[arg(long)]
        name_regex: Option<String>,

        /// Status filter, e.g. `Running`.
        #[arg(long)]
        status: Option<String>,

        /// Engine filter, e.g. `MySQL`.
        #[arg(long)]
        db_type: Option<String>,

        /// Cluster ids to include.
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
    },

    /// Manage the state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_list_ids_are_comma_separated() {
        let cli = Cli::try_parse_from(["polarctl", "list", "--ids", "pc-1,pc-2", "--status", "Running"])
            .expect("arguments parse");

        let Commands::List { ids, status, .. } = cli.command else {
            panic!("expected list command");
        };
        assert_eq!(ids, vec![String::from("pc-1"), String::from("pc-2")]);
        assert_eq!(status.as_deref(), Some("Running"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["polarctl", "apply", "--yes", "--output", "json", "-v"])
            .expect("arguments parse");

        assert!(cli.verbose);
        assert!(matches!(cli.output, OutputFormat::Json));
        assert!(matches!(
            cli.command,
            Commands::Apply {
                yes: true,
                continue_on_error: false
            }
        ));
    }
}
