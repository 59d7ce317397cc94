use chrono::Duration;

use super::{
    CorrectionContext, CorrectionDiagnostics, CorrectionOutput, CorrectionStatus, IntegralTerms,
    RetrospectiveCorrection,
};
use crate::glucose::{decay_effect, filter_date_range};
use crate::util;

/// Smallest discrepancy magnitude that still counts as part of a run.
const MIN_DISCREPANCY: f64 = 0.1;

/// Controller gains and horizons for the integral strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegralCorrectionCfg {
    pub current_discrepancy_gain: f64,
    pub persistent_discrepancy_gain: f64,
    pub correction_time_constant: Duration,
    pub differential_gain: f64,
    pub integration_interval: Duration,
    pub maximum_correction_effect_duration: Duration,
}

impl Default for IntegralCorrectionCfg {
    fn default() -> Self {
        Self {
            current_discrepancy_gain: 1.0,
            persistent_discrepancy_gain: 5.0,
            correction_time_constant: Duration::minutes(90),
            differential_gain: 2.0,
            integration_interval: Duration::minutes(180),
            maximum_correction_effect_duration: Duration::minutes(240),
        }
    }
}

impl IntegralCorrectionCfg {
    /// Leak factor per 5 min step.
    pub fn integral_forget(&self) -> f64 {
        let tc = util::as_minutes(self.correction_time_constant);
        (-(util::DELTA_MINUTES as f64) / tc).exp()
    }

    /// Chosen so a constant discrepancy settles at `persistent_discrepancy_gain` times itself.
    pub fn integral_gain(&self) -> f64 {
        let f = self.integral_forget();
        ((1.0 - f) / f) * (self.persistent_discrepancy_gain - self.current_discrepancy_gain)
    }

    pub fn proportional_gain(&self) -> f64 {
        self.current_discrepancy_gain - self.integral_gain()
    }
}

/// PID filter over recent same-sign discrepancies.
///
/// The integral term is bounded: at most one hour of scheduled basal worth of
/// glucose (more when glucose is far above range, up to 4x) in the positive
/// direction, and never pushing the forecast more than 10 mg/dL under the range
/// minimum in the negative direction. Each contiguous discrepancy lengthens the
/// effect by 10 min, up to `maximum_correction_effect_duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegralRetrospectiveCorrection {
    effect_duration: Duration,
    cfg: IntegralCorrectionCfg,
}

impl IntegralRetrospectiveCorrection {
    pub fn new(effect_duration: Duration, cfg: IntegralCorrectionCfg) -> Self {
        Self {
            effect_duration,
            cfg,
        }
    }

    pub fn cfg(&self) -> &IntegralCorrectionCfg {
        &self.cfg
    }
}

impl Default for IntegralRetrospectiveCorrection {
    fn default() -> Self {
        Self::new(Duration::minutes(60), IntegralCorrectionCfg::default())
    }
}

impl RetrospectiveCorrection for IntegralRetrospectiveCorrection {
    fn effect_duration(&self) -> Duration {
        self.effect_duration
    }

    fn compute_effect(&self, ctx: &CorrectionContext<'_>) -> CorrectionOutput {
        let Some(current) = ctx.current_discrepancy() else {
            tracing::debug!("no recent discrepancy; retrospective correction skipped");
            return CorrectionOutput::empty();
        };
        let current = *current;
        let glucose_date = ctx.starting_glucose.start_date;

        let (Some(sensitivity), Some(basals), Some(range)) =
            (ctx.insulin_sensitivity, ctx.basal_rates, ctx.correction_range)
        else {
            tracing::warn!("schedules unavailable; integral correction defaulted to standard");
            let velocity = ctx.velocity(&current, current.quantity);
            return CorrectionOutput {
                effects: decay_effect(glucose_date, velocity, self.effect_duration),
                diagnostics: CorrectionDiagnostics {
                    total_glucose_correction_effect: Some(current.quantity),
                    status: CorrectionStatus::DefaultedToStandard,
                    integral: None,
                },
            };
        };

        let past = filter_date_range(
            ctx.discrepancies_summed,
            Some(glucose_date - self.cfg.integration_interval),
            Some(glucose_date),
        );

        // Contiguous run of same-sign discrepancies ending at the current one.
        let positive = current.quantity.is_sign_positive();
        let mut next_end = current.end_date;
        let mut recent: Vec<f64> = Vec::new();
        for d in past.iter().rev() {
            let contiguous = next_end - d.end_date <= ctx.recency_interval;
            if d.quantity.is_sign_positive() == positive
                && contiguous
                && d.quantity.abs() >= MIN_DISCREPANCY
            {
                recent.push(d.quantity);
                next_end = d.end_date;
            } else {
                break;
            }
        }
        recent.reverse();

        let isf = *sensitivity.value_at(glucose_date);
        let basal = *basals.value_at(glucose_date);
        let target = range.range_at(glucose_date);
        let glucose = ctx.starting_glucose.quantity;

        let zero_temp_effect = (isf * basal).abs();
        let positive_limit = (glucose - target.max)
            .max(zero_temp_effect)
            .min(4.0 * zero_temp_effect);
        let negative_limit = -(10.0f64).max(glucose - target.min);

        let forget = self.cfg.integral_forget();
        let gain = self.cfg.integral_gain();
        let step = 2.0 * util::DELTA_MINUTES as f64;
        let mut integral = 0.0;
        let mut effect_minutes = util::as_minutes(self.effect_duration) - step;
        for d in &recent {
            integral = forget * integral + gain * d;
            effect_minutes += step;
        }
        let integral = integral.clamp(negative_limit, positive_limit);
        let effect_minutes =
            effect_minutes.min(util::as_minutes(self.cfg.maximum_correction_effect_duration));

        let differential_discrepancy = match recent.as_slice() {
            [.., previous, _] => current.quantity - previous,
            _ => 0.0,
        };

        let proportional = self.cfg.proportional_gain() * current.quantity;
        let differential = self.cfg.differential_gain * differential_discrepancy;
        let total = proportional + integral + differential;
        let effect_duration = util::minutes(effect_minutes);

        let scaled = if effect_minutes > 0.0 {
            total * util::as_minutes(self.effect_duration) / effect_minutes
        } else {
            total
        };
        let velocity = ctx.velocity(&current, scaled);
        tracing::debug!(
            proportional,
            integral,
            differential,
            total,
            effect_minutes,
            count = recent.len(),
            "integral retrospective correction"
        );

        CorrectionOutput {
            effects: decay_effect(glucose_date, velocity, effect_duration),
            diagnostics: CorrectionDiagnostics {
                total_glucose_correction_effect: Some(total),
                status: CorrectionStatus::Computed,
                integral: Some(IntegralTerms {
                    recent_discrepancies: recent,
                    proportional,
                    integral,
                    differential,
                    effect_duration,
                }),
            },
        }
    }
}
