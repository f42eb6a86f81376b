//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Fleetwatch -- fleet device log anomaly detection.
///
/// Use `fleetwatch <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "fleetwatch", version, about, long_about = None)]
pub struct Cli {
    /// Path to the fleetwatch.toml configuration file.
    ///
    /// When omitted, built-in defaults plus `FLEETWATCH_*` variables are used.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a stored log file onto the bus.
    Ingest(IngestArgs),

    /// Receive UDP syslog and publish it until Ctrl-C.
    Listen(ListenArgs),

    /// Inspect rule tables.
    Rules(RulesArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- ingest ----

/// Replay a log file line by line.
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Log file to replay (the year is taken from a YYYYMMDD token in its name).
    pub file: PathBuf,

    /// Parse and classify only, without connecting to the bus.
    #[arg(long)]
    pub dry_run: bool,

    /// Year for timestamps, overriding the filename.
    #[arg(long)]
    pub year: Option<i32>,
}

// ---- listen ----

/// Receive syslog datagrams.
#[derive(Args, Debug)]
pub struct ListenArgs {
    /// UDP address to bind.
    #[arg(long, default_value = "0.0.0.0:514")]
    pub bind: String,

    /// Parse and classify only, without connecting to the bus.
    #[arg(long)]
    pub dry_run: bool,

    /// Seconds between progress summaries in the log.
    #[arg(long, default_value_t = 60)]
    pub summary_interval: u64,
}

// ---- rules ----

/// Inspect rule tables.
#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub action: RulesAction,
}

#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// List rules with their compile status.
    List {
        /// Rule table file or directory of YAML files.
        path: PathBuf,
        /// Only show rules for this domain.
        #[arg(long)]
        domain: Option<String>,
    },
    /// Validate a rule table and fail if any entry is unusable.
    Validate {
        /// Rule table file or directory of YAML files.
        path: PathBuf,
    },
}

// ---- config ----

/// Manage fleetwatch configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, bus, agent, orchestrator, parser, metrics).
        #[arg(long)]
        section: Option<String>,
    },
}
