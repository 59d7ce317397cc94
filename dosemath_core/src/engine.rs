//! One loop iteration: forecast glucose, then recommend doses.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use dosemath_traits::{Clock, InsulinModel, Rounder};

use crate::builder::{DoseEngineBuilder, Missing};
use crate::carbs::{self, CarbEntry};
use crate::config::{CorrectionCfg, DosingCfg, DosingLimits, DosingStrategy};
use crate::dose_math::{
    self, AutomaticDoseRecommendation, BolusRecommendation, BolusRecommendationNotice,
    DosingContext, TempBasalAction, TempBasalSettings,
};
use crate::error::{DoseMathError, Result};
use crate::forecast::{Forecast, predict_glucose};
use crate::glucose::{GlucoseChange, GlucoseValue, combined_sums, linear_momentum_effect};
use crate::insulin::{self, DoseEntry};
use crate::retrospective::{
    CorrectionContext, CorrectionDiagnostics, CorrectionOutput, CorrectionStatus,
    RetrospectiveCorrection,
};
use crate::schedule::{
    BasalRateSchedule, CarbRatioSchedule, GlucoseRangeSchedule, InsulinSensitivitySchedule,
};
use crate::util;

/// Newest glucose older than this disables automatic dosing and zeroes the manual bolus.
pub const GLUCOSE_MAX_AGE_MIN: i64 = 15;
/// Samples this close to the newest one feed the momentum fit.
pub const MOMENTUM_DATA_INTERVAL_MIN: i64 = 15;
pub const MOMENTUM_DURATION_MIN: i64 = 30;

// ── Input / output ───────────────────────────────────────────────────────────

/// Everything the loop knows at evaluation time.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoopSnapshot {
    /// Evaluation time; the engine clock is used when absent.
    pub at: Option<DateTime<Utc>>,
    /// Observed glucose, oldest first.
    pub glucose: Vec<GlucoseValue>,
    pub doses: Vec<DoseEntry>,
    pub carbs: Vec<CarbEntry>,
    /// Raw (5 min) observed minus predicted glucose changes, oldest first.
    pub discrepancies: Vec<GlucoseChange>,
    pub last_temp_basal: Option<DoseEntry>,
    /// Insulin already committed but not yet delivered, U.
    pub pending_insulin: f64,
    pub basal_rate_schedule_override_active: bool,
}

impl LoopSnapshot {
    pub fn validate(&self) -> Result<()> {
        if self
            .glucose
            .iter()
            .any(|g| !g.quantity.is_finite() || g.quantity <= 0.0)
        {
            return Err(input("glucose values must be finite and > 0"));
        }
        if self
            .glucose
            .windows(2)
            .any(|w| w[1].start_date < w[0].start_date)
        {
            return Err(input("glucose must be sorted by date"));
        }
        if self
            .discrepancies
            .windows(2)
            .any(|w| w[1].end_date < w[0].end_date)
        {
            return Err(input("discrepancies must be sorted by end date"));
        }
        for d in self.doses.iter().chain(self.last_temp_basal.iter()) {
            if d.end_date < d.start_date {
                return Err(input("dose end_date must not precede start_date"));
            }
            if !d.value.is_finite() || d.value < 0.0 {
                return Err(input("dose value must be finite and >= 0"));
            }
        }
        if self.carbs.iter().any(|c| !c.grams.is_finite() || c.grams < 0.0) {
            return Err(input("carb grams must be finite and >= 0"));
        }
        if !self.pending_insulin.is_finite() || self.pending_insulin < 0.0 {
            return Err(input("pending_insulin must be finite and >= 0"));
        }
        Ok(())
    }
}

fn input(msg: &str) -> eyre::Report {
    eyre::Report::new(DoseMathError::Input(msg.to_owned()))
}

/// Data quality problems that limited the recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopWarning {
    GlucoseTooOld { latest: DateTime<Utc> },
    InsufficientGlucoseData { samples: usize },
    RetrospectiveCorrectionStale,
}

impl fmt::Display for LoopWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopWarning::GlucoseTooOld { latest } => {
                write!(f, "latest glucose ({}) is too old for automatic dosing", latest.to_rfc3339())
            }
            LoopWarning::InsufficientGlucoseData { samples } => {
                write!(f, "need at least 2 glucose samples to forecast, got {samples}")
            }
            LoopWarning::RetrospectiveCorrectionStale => {
                f.write_str("discrepancy history is stale; retrospective correction skipped")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopOutput {
    pub at: DateTime<Utc>,
    pub forecast: Forecast,
    pub retrospective_correction: CorrectionDiagnostics,
    pub insulin_on_board: f64,
    /// Filled for the temp-basal-only strategy while glucose is fresh.
    pub temp_basal: Option<TempBasalAction>,
    /// Filled for the automatic-bolus strategy while glucose is fresh and a change is due.
    pub automatic_dose: Option<AutomaticDoseRecommendation>,
    /// Zero with a `GlucoseTooOld` notice once glucose is stale.
    pub manual_bolus: BolusRecommendation,
    pub warnings: Vec<LoopWarning>,
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Validated therapy settings plus a correction strategy. Stateless between calls.
pub struct DoseEngine {
    pub(crate) basal: BasalRateSchedule,
    pub(crate) sensitivity: InsulinSensitivitySchedule,
    pub(crate) carb_ratio: Option<CarbRatioSchedule>,
    pub(crate) target: GlucoseRangeSchedule,
    pub(crate) model: Box<dyn InsulinModel + Send + Sync>,
    pub(crate) limits: DosingLimits,
    pub(crate) dosing: DosingCfg,
    pub(crate) correction_cfg: CorrectionCfg,
    pub(crate) correction: Box<dyn RetrospectiveCorrection + Send + Sync>,
    pub(crate) clock: Box<dyn Clock + Send + Sync>,
}

impl fmt::Debug for DoseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoseEngine")
            .field("effect_duration_min", &util::as_minutes(self.model.effect_duration()))
            .field("limits", &self.limits)
            .field("dosing", &self.dosing)
            .field("correction", &self.correction_cfg.kind)
            .finish_non_exhaustive()
    }
}

impl DoseEngine {
    /// Start building an engine.
    pub fn builder() -> DoseEngineBuilder<Missing, Missing, Missing> {
        DoseEngineBuilder::default()
    }

    pub fn limits(&self) -> &DosingLimits {
        &self.limits
    }

    pub fn dosing(&self) -> &DosingCfg {
        &self.dosing
    }

    pub fn correction_cfg(&self) -> &CorrectionCfg {
        &self.correction_cfg
    }

    pub fn target(&self) -> &GlucoseRangeSchedule {
        &self.target
    }

    pub fn model(&self) -> &dyn InsulinModel {
        &*self.model
    }

    /// Run at the snapshot's `at`, or at the engine clock's now.
    pub fn recommend(&self, snapshot: &LoopSnapshot) -> Result<LoopOutput> {
        let at = snapshot.at.unwrap_or_else(|| self.clock.now());
        self.recommend_at(snapshot, at)
    }

    pub fn recommend_at(&self, snapshot: &LoopSnapshot, at: DateTime<Utc>) -> Result<LoopOutput> {
        snapshot.validate()?;
        let mut warnings = Vec::new();
        let glucose = &snapshot.glucose;

        let latest = match glucose.last() {
            Some(latest) if glucose.len() >= 2 => Some(*latest),
            _ => {
                tracing::warn!(samples = glucose.len(), "insufficient glucose data to forecast");
                warnings.push(LoopWarning::InsufficientGlucoseData {
                    samples: glucose.len(),
                });
                None
            }
        };

        let fresh = match glucose.last() {
            Some(last) if at - last.start_date > Duration::minutes(GLUCOSE_MAX_AGE_MIN) => {
                tracing::warn!(latest = %last.start_date, %at, "glucose too old");
                warnings.push(LoopWarning::GlucoseTooOld {
                    latest: last.start_date,
                });
                false
            }
            _ => true,
        };

        let (forecast, correction) = match latest {
            Some(latest) => self.forecast(snapshot, latest),
            None => (Forecast::empty(), CorrectionOutput::empty()),
        };
        if correction.diagnostics.status == CorrectionStatus::NotComputed
            && !snapshot.discrepancies.is_empty()
        {
            warnings.push(LoopWarning::RetrospectiveCorrectionStale);
        }

        let insulin_on_board =
            insulin::insulin_on_board(&snapshot.doses, &*self.model, Some(&self.basal), at);

        let ctx = DosingContext {
            target: &self.target,
            at,
            suspend_threshold: self.limits.suspend_threshold,
            sensitivity: &self.sensitivity,
            model: &*self.model,
        };
        let rounder: &dyn Rounder = &self.dosing.rounder;
        let settings = TempBasalSettings {
            basal_rates: &self.basal,
            max_basal_rate: self.limits.max_basal_rate_per_hour,
            last_temp_basal: snapshot.last_temp_basal.as_ref(),
            duration: self.dosing.temp_basal_duration,
            continuation_interval: self.dosing.continuation_interval,
            rate_rounder: Some(rounder),
            is_basal_rate_schedule_override_active: snapshot.basal_rate_schedule_override_active,
        };

        let predicted = forecast.as_slice();
        let (temp_basal, automatic_dose) = match (fresh, self.dosing.strategy) {
            (false, _) => (None, None),
            (true, DosingStrategy::TempBasalOnly) => (
                Some(dose_math::recommended_temp_basal(predicted, &ctx, &settings)),
                None,
            ),
            (true, DosingStrategy::AutomaticBolus) => (
                None,
                dose_math::recommended_automatic_dose(
                    predicted,
                    &ctx,
                    &settings,
                    self.limits.max_automatic_bolus,
                    self.dosing.partial_application_factor,
                    Some(rounder),
                ),
            ),
        };

        let manual_bolus = match glucose.last() {
            Some(last) if !fresh => BolusRecommendation::none(
                snapshot.pending_insulin,
                Some(BolusRecommendationNotice::GlucoseTooOld(*last)),
            ),
            _ => dose_math::recommended_manual_bolus(
                predicted,
                &ctx,
                snapshot.pending_insulin,
                self.limits.max_bolus,
                Some(rounder),
            ),
        };

        Ok(LoopOutput {
            at,
            forecast,
            retrospective_correction: correction.diagnostics,
            insulin_on_board,
            temp_basal,
            automatic_dose,
            manual_bolus,
            warnings,
        })
    }

    /// Forecast from `latest` over the insulin effect duration.
    fn forecast(&self, snapshot: &LoopSnapshot, latest: GlucoseValue) -> (Forecast, CorrectionOutput) {
        let start = latest.start_date;
        let end = start + self.model.effect_duration();

        let window_start = start - Duration::minutes(MOMENTUM_DATA_INTERVAL_MIN);
        let recent: Vec<GlucoseValue> = snapshot
            .glucose
            .iter()
            .filter(|g| g.start_date >= window_start)
            .copied()
            .collect();
        let momentum =
            linear_momentum_effect(&recent, Duration::minutes(MOMENTUM_DURATION_MIN));

        let insulin_effects = insulin::glucose_effects(
            &snapshot.doses,
            &*self.model,
            &self.sensitivity,
            Some(&self.basal),
            start,
            end,
        );
        let carb_effects = match &self.carb_ratio {
            Some(ratio) if !snapshot.carbs.is_empty() => {
                carbs::glucose_effects(&snapshot.carbs, ratio, &self.sensitivity, start, end)
            }
            _ => Vec::new(),
        };

        // Widen slightly so sums spanning exactly one interval are kept.
        let grouping = self.correction_cfg.grouping_interval;
        let summed = combined_sums(&snapshot.discrepancies, grouping + grouping / 100);
        let correction = self.correction.compute_effect(&CorrectionContext {
            starting_glucose: latest,
            discrepancies_summed: &summed,
            recency_interval: self.correction_cfg.recency_interval,
            insulin_sensitivity: Some(&self.sensitivity),
            basal_rates: Some(&self.basal),
            correction_range: Some(&self.target),
            grouping_interval: grouping,
        });

        let forecast = predict_glucose(
            latest,
            &momentum,
            &[
                insulin_effects.as_slice(),
                carb_effects.as_slice(),
                correction.effects.as_slice(),
            ],
        );
        tracing::debug!(
            points = forecast.len(),
            momentum = momentum.len(),
            eventual = forecast.eventual().map(|g| g.quantity),
            "forecast"
        );
        (forecast, correction)
    }
}
