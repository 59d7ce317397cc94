//! Settings and snapshot loading, engine evaluation and output rendering.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use dosemath_config::{GlucoseUnit, Settings};
use dosemath_core::{
    BolusRecommendation, BolusRecommendationNotice, CorrectionStatus, DoseEngine, GlucoseValue,
    LoopOutput, LoopSnapshot, TempBasalAction,
};
use eyre::{Result, WrapErr};

use crate::cli::SnapshotArgs;

pub fn load_settings(path: &Path) -> Result<Settings> {
    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let settings = dosemath_config::load_toml(&text)
        .map_err(|e| eyre::eyre!("parse config {}: {e}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Read the snapshot and, when given, swap in glucose from CSV.
pub fn load_snapshot(args: &SnapshotArgs, unit: GlucoseUnit) -> Result<LoopSnapshot> {
    let text = fs::read_to_string(&args.snapshot)
        .wrap_err_with(|| format!("read snapshot {}", args.snapshot.display()))?;
    let mut snap: LoopSnapshot = serde_json::from_str(&text)
        .wrap_err_with(|| format!("parse snapshot {}", args.snapshot.display()))?;

    if let Some(csv) = &args.glucose {
        let rows = dosemath_config::load_glucose_csv(csv)?;
        tracing::debug!(rows = rows.len(), unit = unit.label(), "glucose loaded from CSV");
        snap.glucose = rows
            .iter()
            .map(|r| GlucoseValue::new(r.date, unit.to_mgdl(r.glucose)))
            .collect();
    }
    Ok(snap)
}

/// Run one loop iteration for the command's inputs.
pub fn evaluate(settings: &Settings, args: &SnapshotArgs) -> Result<LoopOutput> {
    let engine = DoseEngine::from_settings(settings)?;
    let snap = load_snapshot(args, settings.glucose_unit)?;
    tracing::debug!(?engine, samples = snap.glucose.len(), "evaluating snapshot");
    match args.at {
        Some(at) => engine.recommend_at(&snap, at),
        None => engine.recommend(&snap),
    }
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn display_glucose(value: f64, unit: GlucoseUnit) -> String {
    match unit {
        GlucoseUnit::MgPerDeciliter => format!("{value:.0} {}", unit.label()),
        GlucoseUnit::MillimolesPerLiter => {
            format!("{:.1} {}", value / GlucoseUnit::MGDL_PER_MMOLL, unit.label())
        }
    }
}

fn describe_action(action: &TempBasalAction) -> String {
    match action {
        TempBasalAction::NoChange => "no change".to_string(),
        TempBasalAction::Cancel => "cancel temp basal".to_string(),
        TempBasalAction::Adjust(rec) => format!(
            "{:.3} U/h for {} min",
            rec.units_per_hour,
            rec.duration.num_minutes()
        ),
    }
}

fn describe_notice(notice: &BolusRecommendationNotice, unit: GlucoseUnit) -> String {
    match notice {
        BolusRecommendationNotice::CurrentGlucoseBelowTarget(g) => format!(
            "current glucose {} is below target",
            display_glucose(g.quantity, unit)
        ),
        BolusRecommendationNotice::GlucoseBelowSuspendThreshold(g) => format!(
            "predicted glucose {} at {} is below the suspend threshold",
            display_glucose(g.quantity, unit),
            g.start_date.to_rfc3339()
        ),
        BolusRecommendationNotice::PredictedGlucoseBelowTarget(g) => format!(
            "predicted glucose {} at {} is below target",
            display_glucose(g.quantity, unit),
            g.start_date.to_rfc3339()
        ),
        BolusRecommendationNotice::GlucoseTooOld(g) => format!(
            "latest glucose {} at {} is too old to dose from",
            display_glucose(g.quantity, unit),
            g.start_date.to_rfc3339()
        ),
    }
}

pub fn render_bolus(bolus: &BolusRecommendation, unit: GlucoseUnit) -> String {
    let mut out = format!("manual bolus: {:.3} U", bolus.amount);
    if bolus.pending_insulin > 0.0 {
        let _ = write!(out, " (pending {:.3} U)", bolus.pending_insulin);
    }
    if let Some(notice) = &bolus.notice {
        let _ = write!(out, "\nnotice: {}", describe_notice(notice, unit));
    }
    out
}

pub fn render_output(out: &LoopOutput, unit: GlucoseUnit) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "at: {}", out.at.to_rfc3339());

    match (out.forecast.eventual(), out.forecast.minimum()) {
        (Some(eventual), Some(min)) => {
            let _ = writeln!(
                s,
                "forecast: {} points, eventual {} at {}, minimum {} at {}",
                out.forecast.len(),
                display_glucose(eventual.quantity, unit),
                eventual.start_date.to_rfc3339(),
                display_glucose(min.quantity, unit),
                min.start_date.to_rfc3339()
            );
        }
        _ => {
            let _ = writeln!(s, "forecast: unavailable");
        }
    }
    let _ = writeln!(s, "insulin on board: {:.3} U", out.insulin_on_board);

    let rc = &out.retrospective_correction;
    let status = match rc.status {
        CorrectionStatus::Computed => "computed",
        CorrectionStatus::DefaultedToStandard => "defaulted to standard",
        CorrectionStatus::NotComputed => "not computed",
    };
    match rc.total_glucose_correction_effect {
        Some(total) => {
            let _ = writeln!(s, "retrospective correction: {status}, total {total:.1} mg/dL");
        }
        None => {
            let _ = writeln!(s, "retrospective correction: {status}");
        }
    }

    if let Some(action) = &out.temp_basal {
        let _ = writeln!(s, "temp basal: {}", describe_action(action));
    }
    if let Some(auto) = &out.automatic_dose {
        let _ = writeln!(
            s,
            "automatic dose: {:.3} U bolus, basal {}",
            auto.bolus_units,
            describe_action(&auto.basal_adjustment)
        );
    }
    let _ = writeln!(s, "{}", render_bolus(&out.manual_bolus, unit));
    for w in &out.warnings {
        let _ = writeln!(s, "warning: {w}");
    }
    s.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use dosemath_core::TempBasalRecommendation;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2015-07-13T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn glucose_is_shown_in_configured_unit() {
        assert_eq!(display_glucose(180.0, GlucoseUnit::MgPerDeciliter), "180 mg/dL");
        assert_eq!(
            display_glucose(180.0, GlucoseUnit::MillimolesPerLiter),
            "10.0 mmol/L"
        );
    }

    #[test]
    fn actions_are_described() {
        let adjust = TempBasalAction::Adjust(TempBasalRecommendation::new(1.5, Duration::minutes(30)));
        assert_eq!(describe_action(&adjust), "1.500 U/h for 30 min");
        assert_eq!(describe_action(&TempBasalAction::Cancel), "cancel temp basal");
    }

    #[test]
    fn bolus_notice_is_rendered() {
        let bolus = BolusRecommendation {
            amount: 0.0,
            pending_insulin: 0.0,
            notice: Some(BolusRecommendationNotice::CurrentGlucoseBelowTarget(
                GlucoseValue::new(t0(), 85.0),
            )),
        };
        let text = render_bolus(&bolus, GlucoseUnit::MgPerDeciliter);
        assert!(text.starts_with("manual bolus: 0.000 U"));
        assert!(text.contains("current glucose 85 mg/dL is below target"));
    }

    #[test]
    fn stale_glucose_notice_is_rendered() {
        let bolus = BolusRecommendation::none(
            0.0,
            Some(BolusRecommendationNotice::GlucoseTooOld(GlucoseValue::new(
                t0(),
                180.0,
            ))),
        );
        let text = render_bolus(&bolus, GlucoseUnit::MillimolesPerLiter);
        assert!(text.contains("latest glucose 10.0 mmol/L"));
        assert!(text.ends_with("is too old to dose from"));
    }
}
