// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// testagent: chaos injection and self-verifying workloads for a database cluster.
#[derive(Parser)]
#[command(name = "testagent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run chaos and workloads until interrupted.
    Run(RunArgs),
    /// List the chaos action catalog.
    Actions(ActionsArgs),
    /// Print version information.
    Version,
}

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Path to the configuration file.
    #[arg(short, long, env = "TESTAGENT_CONFIG")]
    pub config: PathBuf,

    /// Override the configured chaos level (0 disables chaos).
    #[arg(long)]
    pub chaos_level: Option<u8>,

    /// Override the configured workload plans.
    #[arg(long = "plan", value_name = "NAME")]
    pub plans: Vec<String>,

    /// Seconds between status reports.
    #[arg(long, default_value = "60")]
    pub status_interval: u64,

    /// Output format of the final report.
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the actions command.
#[derive(Args)]
pub struct ActionsArgs {
    /// Show which actions this chaos level enables.
    #[arg(long)]
    pub level: Option<u8>,

    /// Output format.
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for CLI commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::parse_from([
            "testagent",
            "run",
            "--config",
            "agent.toml",
            "--chaos-level",
            "2",
            "--plan",
            "doc-col",
            "--plan",
            "graph",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("agent.toml"));
                assert_eq!(args.chaos_level, Some(2));
                assert_eq!(args.plans, vec!["doc-col", "graph"]);
                assert_eq!(args.format, OutputFormat::Text);
            }
            _ => panic!("expected run"),
        }
    }
}
