//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// schema_apply - apply ordered SQL migration files and verify the schema
#[derive(Parser, Debug)]
#[command(name = "schema_apply")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (default: schema_apply.toml if present)
    #[arg(short, long, global = true, env = "SCHEMA_APPLY_CONFIG")]
    pub config: Option<String>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply migration files in order
    Apply(ApplyArgs),

    /// Check expected tables and column types
    Verify(VerifyArgs),

    /// Show which migrations the history table records as applied
    Status(StatusArgs),
}

/// Arguments for the apply command
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Migration files, applied in the order given (default: from config)
    pub files: Vec<PathBuf>,

    /// Split and list statements without connecting to the database
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Verify the schema after applying, when `[verify]` is configured
    #[arg(long)]
    pub verify: bool,
}

/// Arguments for the verify command
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Migration files to report on (default: from config)
    pub files: Vec<PathBuf>,
}
