//! Configuration types for the dose engine.
//!
//! These are the runtime configuration structs used by `DoseEngine`.
//! They are separate from the TOML-deserialized settings in `dosemath_config`.

use chrono::Duration;
use serde::Serialize;

use dosemath_traits::StrokeRounder;

use crate::retrospective::IntegralCorrectionCfg;

/// Safety limits applied to every recommendation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DosingLimits {
    /// Upper bound for any temp basal rate, U/h.
    pub max_basal_rate_per_hour: f64,
    /// Upper bound for a manual bolus, U.
    pub max_bolus: f64,
    /// Upper bound for an automatic bolus, U. 0 disables automatic boluses.
    pub max_automatic_bolus: f64,
    /// Predictions at or below this (mg/dL) suspend delivery.
    /// `None` uses the target range lower bound.
    pub suspend_threshold: Option<f64>,
}

impl Default for DosingLimits {
    fn default() -> Self {
        Self {
            max_basal_rate_per_hour: 3.0,
            max_bolus: 10.0,
            max_automatic_bolus: 0.0,
            suspend_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DosingStrategy {
    /// Corrections go out as temp basals only.
    #[default]
    TempBasalOnly,
    /// Part of the correction goes out as a bolus; basal stays at schedule.
    AutomaticBolus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DosingCfg {
    pub strategy: DosingStrategy,
    /// Share of the correction delivered per automatic bolus. Range: (0, 1].
    pub partial_application_factor: f64,
    pub temp_basal_duration: Duration,
    /// A running temp basal at the same rate is kept while more than this remains.
    pub continuation_interval: Duration,
    /// Snaps rates and volumes to deliverable pump strokes.
    pub rounder: StrokeRounder,
}

impl Default for DosingCfg {
    fn default() -> Self {
        Self {
            strategy: DosingStrategy::TempBasalOnly,
            partial_application_factor: 0.4,
            temp_basal_duration: Duration::minutes(30),
            continuation_interval: Duration::minutes(11),
            rounder: StrokeRounder::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorrectionKind {
    #[default]
    Standard,
    Integral,
}

/// Retrospective correction selection and horizons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionCfg {
    pub kind: CorrectionKind,
    /// Width of the window raw discrepancies are summed over.
    pub grouping_interval: Duration,
    /// Newest discrepancy older than this (relative to the latest glucose) is stale.
    pub recency_interval: Duration,
    pub effect_duration: Duration,
    /// Only read when `kind` is `Integral`.
    pub integral: IntegralCorrectionCfg,
}

impl Default for CorrectionCfg {
    fn default() -> Self {
        Self {
            kind: CorrectionKind::Standard,
            grouping_interval: Duration::minutes(30),
            recency_interval: Duration::minutes(15),
            effect_duration: Duration::minutes(60),
            integral: IntegralCorrectionCfg::default(),
        }
    }
}
