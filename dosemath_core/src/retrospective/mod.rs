//! Retrospective correction: feed forecast error back into the forecast.
//!
//! Discrepancies (observed minus predicted glucose change, summed over a
//! grouping interval) are turned into a decaying glucose effect. Two strategies
//! share the same contract:
//!
//! - `StandardRetrospectiveCorrection` projects the latest discrepancy.
//! - `IntegralRetrospectiveCorrection` runs a PID filter over recent history.
//!
//! Both return their diagnostics alongside the effect; neither keeps state
//! between calls.

mod integral;
mod standard;

pub use integral::{IntegralCorrectionCfg, IntegralRetrospectiveCorrection};
pub use standard::StandardRetrospectiveCorrection;

use chrono::Duration;
use serde::Serialize;

use crate::glucose::{GlucoseChange, GlucoseEffect, GlucoseValue};
use crate::schedule::{BasalRateSchedule, GlucoseRangeSchedule, InsulinSensitivitySchedule};
use crate::util;

/// Inputs for one correction computation.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionContext<'a> {
    pub starting_glucose: GlucoseValue,
    /// Summed discrepancies, oldest first.
    pub discrepancies_summed: &'a [GlucoseChange],
    /// Maximum age of the newest discrepancy relative to `starting_glucose`.
    pub recency_interval: Duration,
    pub insulin_sensitivity: Option<&'a InsulinSensitivitySchedule>,
    pub basal_rates: Option<&'a BasalRateSchedule>,
    pub correction_range: Option<&'a GlucoseRangeSchedule>,
    pub grouping_interval: Duration,
}

impl CorrectionContext<'_> {
    /// Newest discrepancy, or `None` when missing or too old to trust.
    pub fn current_discrepancy(&self) -> Option<&GlucoseChange> {
        let current = self.discrepancies_summed.last()?;
        let age = self.starting_glucose.start_date - current.end_date;
        (age <= self.recency_interval).then_some(current)
    }

    /// Velocity (mg/dL/min) that spreads `correction` over the discrepancy's span.
    fn velocity(&self, current: &GlucoseChange, correction: f64) -> f64 {
        let span = current.duration().max(self.grouping_interval);
        let minutes = util::as_minutes(span);
        if minutes > 0.0 { correction / minutes } else { 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionStatus {
    /// No discrepancy, or the newest one is stale.
    NotComputed,
    /// Integral strategy without the schedules it needs.
    DefaultedToStandard,
    Computed,
}

/// PID terms of the integral strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegralTerms {
    pub recent_discrepancies: Vec<f64>,
    pub proportional: f64,
    pub integral: f64,
    pub differential: f64,
    #[serde(with = "util::serde_minutes")]
    pub effect_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionDiagnostics {
    /// Overall correction in mg/dL; `None` when no effect was computed.
    pub total_glucose_correction_effect: Option<f64>,
    pub status: CorrectionStatus,
    pub integral: Option<IntegralTerms>,
}

impl CorrectionDiagnostics {
    pub(crate) fn not_computed() -> Self {
        Self {
            total_glucose_correction_effect: None,
            status: CorrectionStatus::NotComputed,
            integral: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionOutput {
    pub effects: Vec<GlucoseEffect>,
    pub diagnostics: CorrectionDiagnostics,
}

impl CorrectionOutput {
    pub(crate) fn empty() -> Self {
        Self {
            effects: Vec::new(),
            diagnostics: CorrectionDiagnostics::not_computed(),
        }
    }
}

/// A retrospective correction strategy.
pub trait RetrospectiveCorrection {
    /// Nominal duration of the correction effect.
    fn effect_duration(&self) -> Duration;

    fn compute_effect(&self, ctx: &CorrectionContext<'_>) -> CorrectionOutput;
}
