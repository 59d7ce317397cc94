//! Human-readable error descriptions and structured JSON error formatting.

use dosemath_core::error::{BuildError, DoseMathError};

/// Exit code for configuration, settings and snapshot input errors.
pub const EXIT_INVALID: i32 = 1;
/// Exit code when an input file cannot be read at all.
pub const EXIT_IO: i32 = 3;

fn is_io(err: &eyre::Report) -> bool {
    err.chain()
        .any(|c| c.downcast_ref::<std::io::Error>().is_some())
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingBasalSchedule
            | BuildError::MissingSensitivitySchedule
            | BuildError::MissingTargetSchedule => format!(
                "What happened: The dose engine could not be built ({be}).\nLikely causes: A required schedule was not wired into the builder.\nHow to fix: Provide basal_rate, insulin_sensitivity and target_range under [schedules]."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `dosemath check-config`."
            ),
        };
    }

    if let Some(de) = err.downcast_ref::<DoseMathError>() {
        return match de {
            DoseMathError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: A schedule or time zone offset is malformed.\nHow to fix: Fix the [schedules] section of the config file."
            ),
            DoseMathError::Input(msg) => format!(
                "What happened: The loop snapshot was rejected ({msg}).\nLikely causes: Unsorted samples, negative doses or non-finite values in the snapshot or glucose CSV.\nHow to fix: Correct the input data and rerun."
            ),
        };
    }

    // String-based heuristics for errors coming from loading or validation
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("glucose csv must have headers") {
        return "Invalid headers in glucose CSV. Expected 'date,glucose'.".to_string();
    }

    if is_io(err) {
        return format!(
            "What happened: {msg}.\nLikely causes: The path is wrong or the file is not readable.\nHow to fix: Check the --config, --snapshot and --glucose paths."
        );
    }

    if lower.starts_with("parse config") {
        return format!(
            "What happened: The settings file is not valid TOML for this schema.\nLikely causes: A typo in a key, a missing [limits] or [schedules] section, or a wrong value type.\nHow to fix: Compare with etc/dosemath.toml. Original: {msg}"
        );
    }

    if lower.starts_with("parse snapshot") {
        let cause = err
            .source()
            .map(|s| format!(" Cause: {s}"))
            .unwrap_or_default();
        return format!(
            "What happened: The snapshot is not valid JSON for a loop snapshot.{cause}\nHow to fix: Check field names and RFC 3339 dates in the snapshot file."
        );
    }

    if lower.contains("must be") || lower.contains("must start") || lower.contains("must have") {
        return format!(
            "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `dosemath check-config`."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Unreadable files map to `EXIT_IO`; everything else is invalid configuration or input.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if is_io(err) { EXIT_IO } else { EXIT_INVALID }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(_) => "InvalidConfig",
            _ => "MissingSchedule",
        };
    }
    if let Some(de) = err.downcast_ref::<DoseMathError>() {
        return match de {
            DoseMathError::Config(_) => "InvalidConfig",
            DoseMathError::Input(_) => "InvalidInput",
        };
    }
    if is_io(err) {
        return "Io";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
