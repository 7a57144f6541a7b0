// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::FailurePolicy;

/// Command-line arguments for `shepherd`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "shepherd",
    version,
    about = "Plan and drive staged cluster operations and rolling upgrades.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the server config file (TOML).
    ///
    /// Default: `Shepherd.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Shepherd.toml", global = true)]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SHEPHERD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Validate the config and stack definitions, print each stack's role
    /// command order.
    Check,

    /// Plan an operations file and print the staged Request without
    /// running it.
    Plan(PlanArgs),

    /// Plan an upgrade (or downgrade) and print it without running it.
    PlanUpgrade(UpgradeArgs),

    /// Submit Requests and drive them with local agents.
    Run(RunArgs),

    /// Print stored Requests (file storage only).
    Status(StatusArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    /// Operations file (TOML, `[[operation]]` tables).
    #[arg(value_name = "FILE")]
    pub operations: PathBuf,

    /// Cluster to plan for; overrides the file's `cluster`.
    #[arg(long)]
    pub cluster: Option<String>,

    /// abort, continue or continue_on_skippable; overrides the file.
    #[arg(long, value_name = "POLICY")]
    pub failure_policy: Option<FailurePolicy>,
}

#[derive(Debug, Clone, Args)]
pub struct UpgradeArgs {
    /// Upgrade pack (TOML).
    #[arg(value_name = "PACK")]
    pub pack: PathBuf,

    #[arg(long)]
    pub cluster: String,

    /// Walk the pack backwards, from its target stack to its source stack.
    #[arg(long)]
    pub downgrade: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Operations files to submit at startup, in order.
    #[arg(long = "submit", value_name = "FILE")]
    pub submit: Vec<PathBuf>,

    /// Upgrade pack to submit at startup, ahead of any `--submit` file
    /// (requires `--cluster`).
    #[arg(long, value_name = "PACK", requires = "cluster")]
    pub upgrade: Option<PathBuf>,

    /// Cluster for `--upgrade`, and for operations files that name none.
    #[arg(long)]
    pub cluster: Option<String>,

    #[arg(long, requires = "upgrade")]
    pub downgrade: bool,

    /// Exit once no Request is active instead of running until Ctrl-C.
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Show one Request in detail instead of listing all of them.
    #[arg(long, value_name = "ID")]
    pub request: Option<u64>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
