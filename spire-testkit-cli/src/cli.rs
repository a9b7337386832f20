//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// spire-testkit -- SPIRE integration test harness.
///
/// Use `spire-testkit <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "spire-testkit", version, about, long_about = None)]
pub struct Cli {
    /// Path to the spire-testkit.toml configuration file.
    #[arg(short, long, default_value = "spire-testkit.toml")]
    pub config: PathBuf,

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
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a SPIRE server or agent configuration.
    Render(RenderArgs),

    /// Run the end-to-end scenario against the local Docker daemon.
    Run(RunArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- render ----

/// Render a SPIRE configuration file from the typed model.
#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Trust domain (default: `spire.trust_domain`).
    #[arg(long)]
    pub trust_domain: Option<String>,

    /// SPIRE log level written into the config (DEBUG, INFO, WARN, ERROR).
    #[arg(long)]
    pub spire_log_level: Option<String>,

    /// Additional federation entry as TRUST_DOMAIN=HOST (repeatable).
    #[arg(long = "federate", value_name = "TD=HOST")]
    pub federate: Vec<String>,

    /// Render this template file instead of the built-in one.
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Render the agent configuration instead of the server configuration.
    #[arg(long)]
    pub agent: bool,

    /// Write the result to a file instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

// ---- run ----

/// Run server -> agent -> entry -> workload SVID fetch.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Trust domain (default: `spire.trust_domain`).
    #[arg(long)]
    pub trust_domain: Option<String>,

    /// Directory holding the x509pop certificates (default: `spire.certs_dir`).
    #[arg(long)]
    pub certs_dir: Option<PathBuf>,

    /// Forward container output to the log.
    #[arg(long)]
    pub follow: bool,
}

// ---- config ----

/// Manage spire-testkit configuration.
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
        /// Show only a specific section (general, runtime, spire).
        #[arg(long)]
        section: Option<String>,
    },
}
