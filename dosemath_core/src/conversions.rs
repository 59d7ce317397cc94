//! Conversions bridging `dosemath_config` settings to `dosemath_core` types.
//!
//! Glucose-valued settings are converted to mg/dL here; everything past this
//! module works in mg/dL only.

use chrono::{Duration, FixedOffset};
use dosemath_config::GlucoseUnit;
use dosemath_traits::StrokeRounder;

use crate::config::{CorrectionCfg, CorrectionKind, DosingCfg, DosingLimits, DosingStrategy};
use crate::engine::DoseEngine;
use crate::error::{DoseMathError, Result};
use crate::insulin::{
    ExponentialInsulinModel, InsulinModelKind, LinearInsulinModel, WalshInsulinModel,
};
use crate::retrospective::IntegralCorrectionCfg;
use crate::schedule::{
    DailyValueSchedule, GlucoseRange, GlucoseRangeSchedule, RangeOverride, RepeatingScheduleValue,
};
use crate::util;

/// Action duration used by the Walsh and linear models when none is configured.
const DEFAULT_ACTION_DURATION_MIN: f64 = 360.0;

// ── Model ────────────────────────────────────────────────────────────────────

impl From<&dosemath_config::InsulinModelCfg> for InsulinModelKind {
    fn from(c: &dosemath_config::InsulinModelCfg) -> Self {
        use dosemath_config::{ExponentialPreset, InsulinModelKind as Kind};

        match c.kind {
            Kind::Exponential => {
                let preset = match c.preset {
                    ExponentialPreset::Adult => ExponentialInsulinModel::adult(),
                    ExponentialPreset::Child => ExponentialInsulinModel::child(),
                    ExponentialPreset::Fiasp => ExponentialInsulinModel::fiasp(),
                };
                let action = c
                    .action_duration_min
                    .map_or(preset.action_duration(), util::minutes);
                let peak = c
                    .peak_activity_min
                    .map_or(preset.peak_activity_time(), util::minutes);
                Self::Exponential(ExponentialInsulinModel::new(
                    action,
                    peak,
                    util::minutes(c.delay_min),
                ))
            }
            Kind::Walsh => Self::Walsh(WalshInsulinModel::new(util::minutes(
                c.action_duration_min.unwrap_or(DEFAULT_ACTION_DURATION_MIN),
            ))),
            Kind::Linear => Self::Linear(LinearInsulinModel::new(util::minutes(
                c.action_duration_min.unwrap_or(DEFAULT_ACTION_DURATION_MIN),
            ))),
        }
    }
}

// ── DosingCfg ────────────────────────────────────────────────────────────────

impl From<&dosemath_config::DosingCfg> for DosingCfg {
    fn from(c: &dosemath_config::DosingCfg) -> Self {
        Self {
            strategy: match c.strategy {
                dosemath_config::DosingStrategy::TempBasalOnly => DosingStrategy::TempBasalOnly,
                dosemath_config::DosingStrategy::AutomaticBolus => DosingStrategy::AutomaticBolus,
            },
            partial_application_factor: c.partial_application_factor,
            temp_basal_duration: util::minutes(c.temp_basal_duration_min),
            continuation_interval: util::minutes(c.continuation_interval_min),
            rounder: StrokeRounder {
                strokes_per_unit: c.strokes_per_unit,
            },
        }
    }
}

// ── Retrospective correction ─────────────────────────────────────────────────

impl From<&dosemath_config::IntegralGains> for IntegralCorrectionCfg {
    fn from(c: &dosemath_config::IntegralGains) -> Self {
        Self {
            current_discrepancy_gain: c.current_discrepancy_gain,
            persistent_discrepancy_gain: c.persistent_discrepancy_gain,
            correction_time_constant: util::minutes(c.correction_time_constant_min),
            differential_gain: c.differential_gain,
            integration_interval: util::minutes(c.integration_interval_min),
            maximum_correction_effect_duration: util::minutes(
                c.maximum_correction_effect_duration_min,
            ),
        }
    }
}

impl From<&dosemath_config::RetrospectiveCorrectionCfg> for CorrectionCfg {
    fn from(c: &dosemath_config::RetrospectiveCorrectionCfg) -> Self {
        Self {
            kind: match c.kind {
                dosemath_config::CorrectionKind::Standard => CorrectionKind::Standard,
                dosemath_config::CorrectionKind::Integral => CorrectionKind::Integral,
            },
            grouping_interval: util::minutes(c.grouping_interval_min),
            recency_interval: util::minutes(c.recency_interval_min),
            effect_duration: util::minutes(c.effect_duration_min),
            integral: IntegralCorrectionCfg::from(&c.integral),
        }
    }
}

// ── Unit-dependent ───────────────────────────────────────────────────────────

fn limits(c: &dosemath_config::Limits, unit: GlucoseUnit) -> DosingLimits {
    DosingLimits {
        max_basal_rate_per_hour: c.max_basal_rate_per_hour,
        max_bolus: c.max_bolus,
        max_automatic_bolus: c.max_automatic_bolus,
        suspend_threshold: c.suspend_threshold.map(|v| unit.to_mgdl(v)),
    }
}

fn schedule(
    name: &'static str,
    items: &[dosemath_config::ScheduleItem],
    tz: FixedOffset,
    scale: impl Fn(f64) -> f64,
    allow_zero: bool,
) -> Result<DailyValueSchedule<f64>> {
    let items = items
        .iter()
        .map(|it| {
            RepeatingScheduleValue::new(Duration::minutes(i64::from(it.start_min)), scale(it.value))
        })
        .collect();
    DailyValueSchedule::new(items, tz)
        .and_then(|s| s.validated(allow_zero))
        .map_err(|e| eyre::Report::new(e).wrap_err(format!("schedules.{name}")))
}

fn target_schedule(
    s: &dosemath_config::Schedules,
    tz: FixedOffset,
    unit: GlucoseUnit,
) -> Result<GlucoseRangeSchedule> {
    let items = s
        .target_range
        .iter()
        .map(|r| {
            RepeatingScheduleValue::new(
                Duration::minutes(i64::from(r.start_min)),
                GlucoseRange::new(unit.to_mgdl(r.min), unit.to_mgdl(r.max)),
            )
        })
        .collect();
    let schedule = DailyValueSchedule::new(items, tz)
        .and_then(GlucoseRangeSchedule::new)
        .map_err(|e| eyre::Report::new(e).wrap_err("schedules.target_range"))?;
    Ok(match &s.target_override {
        Some(o) => schedule.with_override(RangeOverride {
            range: GlucoseRange::new(unit.to_mgdl(o.min), unit.to_mgdl(o.max)),
            start: o.start,
            end: o.end,
        }),
        None => schedule,
    })
}

impl DoseEngine {
    /// Build an engine from validated settings.
    pub fn from_settings(settings: &dosemath_config::Settings) -> Result<Self> {
        let unit = settings.glucose_unit;
        let s = &settings.schedules;
        let tz = FixedOffset::east_opt(s.time_zone_offset_min * 60).ok_or_else(|| {
            eyre::Report::new(DoseMathError::Config(format!(
                "time zone offset {} min is out of range",
                s.time_zone_offset_min
            )))
        })?;

        let basal = schedule("basal_rate", &s.basal_rate, tz, |v| v, true)?;
        let sensitivity = schedule(
            "insulin_sensitivity",
            &s.insulin_sensitivity,
            tz,
            |v| unit.to_mgdl(v),
            false,
        )?;
        let target = target_schedule(s, tz, unit)?;

        let builder = DoseEngine::builder()
            .with_basal_rates(basal)
            .with_sensitivity(sensitivity)
            .with_target(target)
            .with_model(InsulinModelKind::from(&settings.insulin_model))
            .with_limits(limits(&settings.limits, unit))
            .with_dosing(DosingCfg::from(&settings.dosing))
            .with_correction(CorrectionCfg::from(&settings.retrospective_correction));

        let builder = if s.carb_ratio.is_empty() {
            builder
        } else {
            builder.with_carb_ratio(schedule("carb_ratio", &s.carb_ratio, tz, |v| v, false)?)
        };

        tracing::debug!(unit = unit.label(), "engine built from settings");
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dosemath_traits::InsulinModel;

    const BASE: &str = r#"
glucose_unit = "mmol/L"

[limits]
max_basal_rate_per_hour = 3.0
max_bolus = 10.0
suspend_threshold = 3.9

[schedules]
basal_rate = [{ start_min = 0, value = 1.0 }]
insulin_sensitivity = [{ start_min = 0, value = 3.0 }]
target_range = [{ start_min = 0, min = 5.0, max = 6.0 }]
"#;

    #[test]
    fn mmol_settings_are_converted_to_mgdl() {
        let settings = dosemath_config::load_toml(BASE).unwrap();
        settings.validate().unwrap();
        let engine = DoseEngine::from_settings(&settings).unwrap();

        let threshold = engine.limits().suspend_threshold.unwrap();
        assert!((threshold - 3.9 * GlucoseUnit::MGDL_PER_MMOLL).abs() < 1e-9);
        let at = chrono::Utc::now();
        assert!((engine.target().min_at(at) - 5.0 * GlucoseUnit::MGDL_PER_MMOLL).abs() < 1e-9);
        // Adult exponential preset plus the default 10 min delay.
        assert_eq!(engine.model().effect_duration(), Duration::minutes(370));
    }

    #[test]
    fn walsh_defaults_to_six_hours() {
        let cfg = dosemath_config::InsulinModelCfg {
            kind: dosemath_config::InsulinModelKind::Walsh,
            ..Default::default()
        };
        let model = InsulinModelKind::from(&cfg);
        assert_eq!(model.effect_duration(), Duration::minutes(360));
    }

    #[test]
    fn bad_schedule_is_reported_with_its_name() {
        let toml = BASE.replace(
            "basal_rate = [{ start_min = 0, value = 1.0 }]",
            "basal_rate = [{ start_min = 30, value = 1.0 }]",
        );
        let settings = dosemath_config::load_toml(&toml).unwrap();
        let err = DoseEngine::from_settings(&settings).unwrap_err();
        assert!(format!("{err:#}").contains("schedules.basal_rate"));
    }
}
