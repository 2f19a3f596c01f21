//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand, ValueEnum};
use keel_core::{Token, Version};
use std::path::PathBuf;

/// Keel - versioned database migrations from a directory of SQL scripts
#[derive(Parser, Debug)]
#[command(name = "keel")]
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

    /// Config file to use instead of keel.yml in the project directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending versions
    Run(RunArgs),

    /// List versions recorded in the ledger
    List(ListArgs),
}

/// Where to find scripts and how to reach the database
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Project directory holding keel.yml and the version directories
    #[arg(short = 'p', long = "path", default_value = ".")]
    pub path: PathBuf,

    /// Connection string for the target database
    #[arg(short = 'c', long = "connection-string", env = "KEEL_CONNECTION_STRING")]
    pub connection_string: Option<String>,

    /// Platform name (duckdb, snowflake, or a plugin)
    #[arg(long)]
    pub platform: Option<String>,

    /// Schema holding the version ledger
    #[arg(long)]
    pub schema: Option<String>,

    /// Version ledger table name
    #[arg(long)]
    pub table: Option<String>,

    /// Directory containing one subdirectory per plugin platform
    #[arg(long)]
    pub plugins_dir: Option<PathBuf>,

    /// Per-statement timeout in seconds
    #[arg(long = "command-timeout")]
    pub command_timeout: Option<u64>,
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Highest version to apply (default: latest)
    #[arg(short = 't', long = "target-version")]
    pub target_version: Option<Version>,

    /// Skip failing scripts on backends without transactional DDL
    #[arg(long)]
    pub continue_after_failure: bool,

    /// Run each version in autocommit mode
    #[arg(long)]
    pub no_transaction: bool,

    /// Create the target database if it does not exist
    #[arg(long = "auto-create-db")]
    pub auto_create_db: bool,

    /// Token substituted into scripts as ${KEY} (repeatable)
    #[arg(short = 'k', long = "token", value_name = "KEY=VALUE")]
    pub tokens: Vec<Token>,

    /// Fail when a script references a token with no value
    #[arg(long)]
    pub strict_tokens: bool,

    /// Rows per insert during bulk import
    #[arg(long)]
    pub bulk_batch_size: Option<usize>,
}

/// Arguments for the list command
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: ListOutput,
}

/// List output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOutput {
    /// Aligned table
    Table,
    /// JSON array
    Json,
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
