//! CLI argument definitions and shared statics.

use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "dosemath", version, about = "Insulin dose recommendation CLI")]
pub struct Cli {
    /// Path to settings TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/dosemath.toml")]
    pub config: PathBuf,

    /// Print results and errors as JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG takes precedence
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Inputs shared by the commands that evaluate a loop snapshot.
#[derive(Args, Debug, Clone)]
pub struct SnapshotArgs {
    /// Loop snapshot JSON (glucose, doses, carbs, discrepancies, pump state)
    #[arg(long, value_name = "FILE")]
    pub snapshot: PathBuf,

    /// Glucose CSV with headers 'date,glucose'; replaces the snapshot's glucose
    #[arg(
        long,
        value_name = "FILE",
        long_help = "Glucose history as CSV with the exact header 'date,glucose'. Dates are RFC 3339, values are in the configured glucose_unit. When given, these samples replace the snapshot's glucose array."
    )]
    pub glucose: Option<PathBuf>,

    /// Evaluation time (RFC 3339); overrides the snapshot's `at` and the system clock
    #[arg(long, value_name = "RFC3339")]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Forecast glucose and recommend temp basal / automatic / manual doses
    Recommend {
        #[command(flatten)]
        input: SnapshotArgs,
    },
    /// Recommend a manual correction bolus only
    Bolus {
        #[command(flatten)]
        input: SnapshotArgs,
    },
    /// Validate the settings file and exit
    CheckConfig,
}
