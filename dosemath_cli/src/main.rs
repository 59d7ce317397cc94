#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod recommend;

use std::path::Path;

use clap::Parser;
use dosemath_config::Logging;
use eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if !cli.json {
        let _ = color_eyre::install();
    }

    if let Err(err) = run(&cli) {
        tracing::error!(error = %err, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let settings = recommend::load_settings(&cli.config)?;
    init_tracing(cli.json, cli.log_level.as_deref(), &settings.logging);
    tracing::info!(config = %cli.config.display(), "settings loaded");

    match &cli.cmd {
        Commands::CheckConfig => {
            // Schedules are only checked when the engine is assembled.
            dosemath_core::DoseEngine::from_settings(&settings)?;
            if cli.json {
                println!("{}", serde_json::json!({ "status": "ok" }));
            } else {
                println!("config OK");
            }
        }
        Commands::Recommend { input } => {
            let out = recommend::evaluate(&settings, input)?;
            if cli.json {
                println!("{}", serde_json::to_string(&out)?);
            } else {
                println!("{}", recommend::render_output(&out, settings.glucose_unit));
            }
        }
        Commands::Bolus { input } => {
            let out = recommend::evaluate(&settings, input)?;
            if cli.json {
                println!("{}", serde_json::to_string(&out.manual_bolus)?);
            } else {
                println!(
                    "{}",
                    recommend::render_bolus(&out.manual_bolus, settings.glucose_unit)
                );
            }
        }
    }
    Ok(())
}

/// Console logs go to stderr so stdout stays machine-readable.
///
/// Precedence for the level: RUST_LOG, then `--log-level`, then `[logging].level`.
fn init_tracing(json: bool, cli_level: Option<&str>, logging: &Logging) {
    let level = cli_level
        .or(logging.level.as_deref())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_json = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let console_pretty = (!json).then(|| fmt::layer().compact().with_writer(std::io::stderr));

    let file_layer = logging.file.as_deref().map(|file| {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .map_or_else(|| "dosemath.log".into(), |n| n.to_string_lossy().into_owned());
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        fmt::layer().json().with_ansi(false).with_writer(writer)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_pretty)
        .with(file_layer)
        .try_init();
}
