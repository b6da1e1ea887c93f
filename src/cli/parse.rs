//! CLI parse: clap types for Strata. No behavior; definitions only.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Strata CLI - Layered, token-budgeted context assembly
#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Assemble layered prompt context under a token budget")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (for config/config.toml)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long)]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assemble context for one request and print it
    Assemble(AssembleArgs),
    /// Validate the loaded configuration
    Validate,
}

#[derive(Args, Debug, Clone)]
pub struct AssembleArgs {
    /// System prompt file (Static layer)
    #[arg(long)]
    pub system: Option<PathBuf>,

    /// Reference document directory (SemiStatic layer)
    #[arg(long)]
    pub docs: Option<PathBuf>,

    /// Current user input (Ephemeral layer)
    #[arg(long)]
    pub input: String,

    /// Global token budget (overrides configuration)
    #[arg(long, allow_negative_numbers = true)]
    pub budget: Option<i64>,

    /// Session scope id
    #[arg(long, default_value = "cli")]
    pub scope: String,

    /// Output format (text or json)
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,

    /// Also print the per-layer cache description
    #[arg(long)]
    pub describe: bool,
}
