#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Settings schema and glucose history parsing for the dose engine.
//!
//! - `Settings` and its sections are deserialized from TOML and validated.
//! - The glucose CSV loader enforces headers and chronological order.
//!
//! Glucose-valued fields (sensitivity, targets, suspend threshold) are written
//! in `glucose_unit`; conversion to mg/dL happens when the engine is built.
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Glucose history CSV schema.
///
/// Expected headers:
/// date,glucose
///
/// Example:
/// date,glucose
/// 2015-07-13T12:00:00Z,143
/// 2015-07-13T12:05:00Z,146
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct GlucoseRow {
    pub date: DateTime<Utc>,
    pub glucose: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum GlucoseUnit {
    #[default]
    #[serde(rename = "mg/dL")]
    MgPerDeciliter,
    #[serde(rename = "mmol/L")]
    MillimolesPerLiter,
}

impl GlucoseUnit {
    /// mg/dL per mmol/L for glucose.
    pub const MGDL_PER_MMOLL: f64 = 18.015_59;

    /// Convert a value in this unit into mg/dL.
    #[inline]
    pub fn to_mgdl(self, value: f64) -> f64 {
        match self {
            GlucoseUnit::MgPerDeciliter => value,
            GlucoseUnit::MillimolesPerLiter => value * Self::MGDL_PER_MMOLL,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GlucoseUnit::MgPerDeciliter => "mg/dL",
            GlucoseUnit::MillimolesPerLiter => "mmol/L",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InsulinModelKind {
    #[default]
    Exponential,
    Walsh,
    Linear,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExponentialPreset {
    #[default]
    Adult,
    Child,
    Fiasp,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InsulinModelCfg {
    pub kind: InsulinModelKind,
    /// Only used by the exponential model; supplies defaults for the fields below.
    pub preset: ExponentialPreset,
    /// Overrides the preset's action duration (minutes).
    pub action_duration_min: Option<f64>,
    /// Overrides the preset's peak activity time (minutes, exponential only).
    pub peak_activity_min: Option<f64>,
    /// Onset delay (minutes, exponential only).
    pub delay_min: f64,
}

impl Default for InsulinModelCfg {
    fn default() -> Self {
        Self {
            kind: InsulinModelKind::Exponential,
            preset: ExponentialPreset::Adult,
            action_duration_min: None,
            peak_activity_min: None,
            delay_min: 10.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Limits {
    pub max_basal_rate_per_hour: f64,
    pub max_bolus: f64,
    /// Ceiling for automatic boluses; defaults to 0 (automatic bolus disabled).
    #[serde(default)]
    pub max_automatic_bolus: f64,
    /// When absent the target range lower bound is used.
    #[serde(default)]
    pub suspend_threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DosingStrategy {
    #[default]
    TempBasalOnly,
    AutomaticBolus,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DosingCfg {
    pub strategy: DosingStrategy,
    /// Fraction of the correction delivered per automatic bolus, (0.0, 1.0].
    pub partial_application_factor: f64,
    pub temp_basal_duration_min: f64,
    /// Remaining time below which a matching temp basal is re-issued.
    pub continuation_interval_min: f64,
    /// Pump delivery resolution; 0 disables rounding.
    pub strokes_per_unit: f64,
}

impl Default for DosingCfg {
    fn default() -> Self {
        Self {
            strategy: DosingStrategy::TempBasalOnly,
            partial_application_factor: 0.4,
            temp_basal_duration_min: 30.0,
            continuation_interval_min: 11.0,
            strokes_per_unit: 40.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionKind {
    #[default]
    Standard,
    Integral,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntegralGains {
    pub current_discrepancy_gain: f64,
    pub persistent_discrepancy_gain: f64,
    pub correction_time_constant_min: f64,
    pub differential_gain: f64,
    pub integration_interval_min: f64,
    pub maximum_correction_effect_duration_min: f64,
}

impl Default for IntegralGains {
    fn default() -> Self {
        Self {
            current_discrepancy_gain: 1.0,
            persistent_discrepancy_gain: 5.0,
            correction_time_constant_min: 90.0,
            differential_gain: 2.0,
            integration_interval_min: 180.0,
            maximum_correction_effect_duration_min: 240.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrospectiveCorrectionCfg {
    pub kind: CorrectionKind,
    pub grouping_interval_min: f64,
    pub recency_interval_min: f64,
    pub effect_duration_min: f64,
    pub integral: IntegralGains,
}

impl Default for RetrospectiveCorrectionCfg {
    fn default() -> Self {
        Self {
            kind: CorrectionKind::Standard,
            grouping_interval_min: 30.0,
            recency_interval_min: 15.0,
            effect_duration_min: 60.0,
            integral: IntegralGains::default(),
        }
    }
}

/// One `(start offset, value)` entry of a daily schedule.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ScheduleItem {
    /// Minutes after local midnight.
    pub start_min: u32,
    pub value: f64,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RangeItem {
    pub start_min: u32,
    pub min: f64,
    pub max: f64,
}

/// Temporary target range (e.g. pre-meal or workout).
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TargetOverride {
    pub min: f64,
    pub max: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct Schedules {
    /// Fixed UTC offset the daily schedules are expressed in.
    #[serde(default)]
    pub time_zone_offset_min: i32,
    pub basal_rate: Vec<ScheduleItem>,
    pub insulin_sensitivity: Vec<ScheduleItem>,
    #[serde(default)]
    pub carb_ratio: Vec<ScheduleItem>,
    pub target_range: Vec<RangeItem>,
    #[serde(default)]
    pub target_override: Option<TargetOverride>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub glucose_unit: GlucoseUnit,
    #[serde(default)]
    pub insulin_model: InsulinModelCfg,
    pub limits: Limits,
    #[serde(default)]
    pub dosing: DosingCfg,
    #[serde(default)]
    pub retrospective_correction: RetrospectiveCorrectionCfg,
    pub schedules: Schedules,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str::<Settings>(s)
}

pub fn load_glucose_csv(path: &std::path::Path) -> eyre::Result<Vec<GlucoseRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open glucose CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["date", "glucose"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "glucose CSV must have headers 'date,glucose', got: {}",
            actual.join(",")
        );
    }

    let mut rows: Vec<GlucoseRow> = Vec::new();
    for (idx, rec) in rdr.deserialize::<GlucoseRow>().enumerate() {
        match rec {
            Ok(row) => {
                if !row.glucose.is_finite() || row.glucose <= 0.0 {
                    eyre::bail!("invalid CSV row {}: glucose must be > 0", idx + 2);
                }
                if let Some(prev) = rows.last()
                    && row.date < prev.date
                {
                    eyre::bail!(
                        "glucose CSV must be sorted by date (row {} is earlier than row {})",
                        idx + 2,
                        idx + 1
                    );
                }
                rows.push(row);
            }
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    Ok(rows)
}

const MINUTES_PER_DAY: u32 = 24 * 60;

fn validate_offsets(name: &str, offsets: impl Iterator<Item = u32>) -> eyre::Result<()> {
    let mut prev: Option<u32> = None;
    for start in offsets {
        match prev {
            None if start != 0 => {
                eyre::bail!("schedules.{name} must start at start_min = 0");
            }
            Some(p) if start <= p => {
                eyre::bail!("schedules.{name} start_min values must be strictly ascending");
            }
            _ => {}
        }
        if start >= MINUTES_PER_DAY {
            eyre::bail!("schedules.{name} start_min must be < 1440");
        }
        prev = Some(start);
    }
    if prev.is_none() {
        eyre::bail!("schedules.{name} must have at least one entry");
    }
    Ok(())
}

fn validate_values(name: &str, items: &[ScheduleItem], allow_zero: bool) -> eyre::Result<()> {
    validate_offsets(name, items.iter().map(|i| i.start_min))?;
    for item in items {
        let ok = item.value.is_finite() && (item.value > 0.0 || (allow_zero && item.value == 0.0));
        if !ok {
            if allow_zero {
                eyre::bail!("schedules.{name} values must be >= 0");
            }
            eyre::bail!("schedules.{name} values must be > 0");
        }
    }
    Ok(())
}

impl Settings {
    pub fn validate(&self) -> eyre::Result<()> {
        // Insulin model
        if let Some(d) = self.insulin_model.action_duration_min
            && !(d.is_finite() && (60.0..=1440.0).contains(&d))
        {
            eyre::bail!("insulin_model.action_duration_min must be in [60, 1440]");
        }
        if let Some(p) = self.insulin_model.peak_activity_min {
            if !(p.is_finite() && p > 0.0) {
                eyre::bail!("insulin_model.peak_activity_min must be > 0");
            }
            let dur = self.insulin_model.action_duration_min.unwrap_or(360.0);
            if p * 2.0 >= dur {
                eyre::bail!("insulin_model.peak_activity_min must be less than half the action duration");
            }
        }
        if !(self.insulin_model.delay_min.is_finite() && self.insulin_model.delay_min >= 0.0) {
            eyre::bail!("insulin_model.delay_min must be >= 0");
        }

        // Limits
        if !(self.limits.max_basal_rate_per_hour.is_finite()
            && self.limits.max_basal_rate_per_hour >= 0.0)
        {
            eyre::bail!("limits.max_basal_rate_per_hour must be >= 0");
        }
        if !(self.limits.max_bolus.is_finite() && self.limits.max_bolus >= 0.0) {
            eyre::bail!("limits.max_bolus must be >= 0");
        }
        if !(self.limits.max_automatic_bolus.is_finite()
            && (0.0..=self.limits.max_bolus).contains(&self.limits.max_automatic_bolus))
        {
            eyre::bail!("limits.max_automatic_bolus must be in [0, limits.max_bolus]");
        }
        if let Some(s) = self.limits.suspend_threshold
            && !(s.is_finite() && s > 0.0)
        {
            eyre::bail!("limits.suspend_threshold must be > 0");
        }

        // Dosing
        let pf = self.dosing.partial_application_factor;
        if !(pf > 0.0 && pf <= 1.0) {
            eyre::bail!("dosing.partial_application_factor must be in (0.0, 1.0]");
        }
        if !(self.dosing.temp_basal_duration_min.is_finite()
            && self.dosing.temp_basal_duration_min >= 5.0)
        {
            eyre::bail!("dosing.temp_basal_duration_min must be >= 5");
        }
        if !(self.dosing.continuation_interval_min.is_finite()
            && self.dosing.continuation_interval_min >= 0.0)
        {
            eyre::bail!("dosing.continuation_interval_min must be >= 0");
        }
        if !(self.dosing.strokes_per_unit.is_finite() && self.dosing.strokes_per_unit >= 0.0) {
            eyre::bail!("dosing.strokes_per_unit must be >= 0");
        }

        // Retrospective correction
        let rc = &self.retrospective_correction;
        if !(rc.grouping_interval_min.is_finite() && rc.grouping_interval_min >= 5.0) {
            eyre::bail!("retrospective_correction.grouping_interval_min must be >= 5");
        }
        if !(rc.recency_interval_min.is_finite() && rc.recency_interval_min > 0.0) {
            eyre::bail!("retrospective_correction.recency_interval_min must be > 0");
        }
        if !(rc.effect_duration_min.is_finite() && rc.effect_duration_min >= 10.0) {
            eyre::bail!("retrospective_correction.effect_duration_min must be >= 10");
        }
        let g = &rc.integral;
        if g.persistent_discrepancy_gain < g.current_discrepancy_gain {
            eyre::bail!(
                "retrospective_correction.integral.persistent_discrepancy_gain must be >= current_discrepancy_gain"
            );
        }
        if !(g.correction_time_constant_min.is_finite() && g.correction_time_constant_min > 0.0) {
            eyre::bail!("retrospective_correction.integral.correction_time_constant_min must be > 0");
        }
        if !(g.integration_interval_min.is_finite() && g.integration_interval_min > 0.0) {
            eyre::bail!("retrospective_correction.integral.integration_interval_min must be > 0");
        }
        if g.maximum_correction_effect_duration_min < rc.effect_duration_min {
            eyre::bail!(
                "retrospective_correction.integral.maximum_correction_effect_duration_min must be >= effect_duration_min"
            );
        }

        // Schedules
        let s = &self.schedules;
        if s.time_zone_offset_min.abs() >= 24 * 60 {
            eyre::bail!("schedules.time_zone_offset_min must be within +/- 24h");
        }
        validate_values("basal_rate", &s.basal_rate, true)?;
        validate_values("insulin_sensitivity", &s.insulin_sensitivity, false)?;
        if !s.carb_ratio.is_empty() {
            validate_values("carb_ratio", &s.carb_ratio, false)?;
        }
        validate_offsets("target_range", s.target_range.iter().map(|r| r.start_min))?;
        for r in &s.target_range {
            if !(r.min.is_finite() && r.max.is_finite() && r.min > 0.0 && r.min <= r.max) {
                eyre::bail!("schedules.target_range entries must satisfy 0 < min <= max");
            }
        }
        if let Some(o) = &s.target_override {
            if !(o.min > 0.0 && o.min <= o.max) {
                eyre::bail!("schedules.target_override must satisfy 0 < min <= max");
            }
            if o.end <= o.start {
                eyre::bail!("schedules.target_override.end must be after start");
            }
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        Ok(())
    }
}
