//! Type-state builder for `DoseEngine`.
//!
//! The builder enforces at compile time that the basal, sensitivity and target
//! schedules are provided before `build()` is available. `try_build()` is always
//! available for dynamic checks.

use std::marker::PhantomData;

use chrono::Duration;
use dosemath_traits::{Clock, InsulinModel, SystemClock};

use crate::config::{CorrectionCfg, CorrectionKind, DosingCfg, DosingLimits};
use crate::engine::DoseEngine;
use crate::error::{BuildError, Result};
use crate::insulin::ExponentialInsulinModel;
use crate::retrospective::{
    IntegralRetrospectiveCorrection, RetrospectiveCorrection, StandardRetrospectiveCorrection,
};
use crate::schedule::{
    BasalRateSchedule, CarbRatioSchedule, GlucoseRangeSchedule, InsulinSensitivitySchedule,
};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `DoseEngine`. All fields are validated on `build()`.
pub struct DoseEngineBuilder<B, S, T> {
    basal: Option<BasalRateSchedule>,
    sensitivity: Option<InsulinSensitivitySchedule>,
    target: Option<GlucoseRangeSchedule>,
    carb_ratio: Option<CarbRatioSchedule>,
    model: Option<Box<dyn InsulinModel + Send + Sync>>,
    limits: Option<DosingLimits>,
    dosing: Option<DosingCfg>,
    correction_cfg: Option<CorrectionCfg>,
    correction: Option<Box<dyn RetrospectiveCorrection + Send + Sync>>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    _b: PhantomData<B>,
    _s: PhantomData<S>,
    _t: PhantomData<T>,
}

impl Default for DoseEngineBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            basal: None,
            sensitivity: None,
            target: None,
            carb_ratio: None,
            model: None,
            limits: None,
            dosing: None,
            correction_cfg: None,
            correction: None,
            clock: None,
            _b: PhantomData,
            _s: PhantomData,
            _t: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Validate configuration and construct a `DoseEngine`.
#[allow(clippy::too_many_arguments)]
fn validate_and_build(
    basal: BasalRateSchedule,
    sensitivity: InsulinSensitivitySchedule,
    target: GlucoseRangeSchedule,
    carb_ratio: Option<CarbRatioSchedule>,
    model: Box<dyn InsulinModel + Send + Sync>,
    limits: DosingLimits,
    dosing: DosingCfg,
    correction_cfg: CorrectionCfg,
    correction: Option<Box<dyn RetrospectiveCorrection + Send + Sync>>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
) -> Result<DoseEngine> {
    // ── Validation ───────────────────────────────────────────────────────────
    if !limits.max_basal_rate_per_hour.is_finite() || limits.max_basal_rate_per_hour < 0.0 {
        return Err(invalid("max_basal_rate_per_hour must be >= 0"));
    }
    if !limits.max_bolus.is_finite() || limits.max_bolus < 0.0 {
        return Err(invalid("max_bolus must be >= 0"));
    }
    if !(0.0..=limits.max_bolus).contains(&limits.max_automatic_bolus) {
        return Err(invalid("max_automatic_bolus must be in [0, max_bolus]"));
    }
    if let Some(threshold) = limits.suspend_threshold
        && !(threshold.is_finite() && threshold > 0.0)
    {
        return Err(invalid("suspend_threshold must be > 0"));
    }
    if !(dosing.partial_application_factor > 0.0 && dosing.partial_application_factor <= 1.0) {
        return Err(invalid("partial_application_factor must be in (0, 1]"));
    }
    if dosing.temp_basal_duration <= Duration::zero() {
        return Err(invalid("temp_basal_duration must be > 0"));
    }
    if dosing.continuation_interval < Duration::zero() {
        return Err(invalid("continuation_interval must be >= 0"));
    }
    if correction_cfg.grouping_interval <= Duration::zero() {
        return Err(invalid("grouping_interval must be > 0"));
    }
    if correction_cfg.recency_interval <= Duration::zero() {
        return Err(invalid("recency_interval must be > 0"));
    }
    if correction_cfg.effect_duration <= Duration::zero() {
        return Err(invalid("correction effect_duration must be > 0"));
    }
    if correction_cfg.integral.correction_time_constant <= Duration::zero() {
        return Err(invalid("correction_time_constant must be > 0"));
    }
    if model.effect_duration() <= Duration::zero() {
        return Err(invalid("insulin model effect duration must be > 0"));
    }

    // ── Strategy ─────────────────────────────────────────────────────────────
    let correction: Box<dyn RetrospectiveCorrection + Send + Sync> =
        match (correction, correction_cfg.kind) {
            (Some(custom), _) => custom,
            (None, CorrectionKind::Standard) => Box::new(StandardRetrospectiveCorrection::new(
                correction_cfg.effect_duration,
            )),
            (None, CorrectionKind::Integral) => Box::new(IntegralRetrospectiveCorrection::new(
                correction_cfg.effect_duration,
                correction_cfg.integral,
            )),
        };
    let clock: Box<dyn Clock + Send + Sync> = match clock {
        Some(c) => c,
        None => Box::new(SystemClock::new()),
    };

    Ok(DoseEngine {
        basal,
        sensitivity,
        carb_ratio,
        target,
        model,
        limits,
        dosing,
        correction_cfg,
        correction,
        clock,
    })
}

impl<B, S, T> DoseEngineBuilder<B, S, T> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<DoseEngine> {
        let basal = self
            .basal
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBasalSchedule))?;
        let sensitivity = self
            .sensitivity
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSensitivitySchedule))?;
        let target = self
            .target
            .ok_or_else(|| eyre::Report::new(BuildError::MissingTargetSchedule))?;

        let model: Box<dyn InsulinModel + Send + Sync> = match self.model {
            Some(m) => m,
            None => Box::new(ExponentialInsulinModel::adult()),
        };

        validate_and_build(
            basal,
            sensitivity,
            target,
            self.carb_ratio,
            model,
            self.limits.unwrap_or_default(),
            self.dosing.unwrap_or_default(),
            self.correction_cfg.unwrap_or_default(),
            self.correction,
            self.clock,
        )
    }
}

/// Chainable setters that do not affect type-state.
impl<B, S, T> DoseEngineBuilder<B, S, T> {
    pub fn with_carb_ratio(mut self, carb_ratio: CarbRatioSchedule) -> Self {
        self.carb_ratio = Some(carb_ratio);
        self
    }
    /// Defaults to the adult exponential model when not provided.
    pub fn with_model(mut self, model: impl InsulinModel + Send + Sync + 'static) -> Self {
        self.model = Some(Box::new(model));
        self
    }
    pub fn with_limits(mut self, limits: DosingLimits) -> Self {
        self.limits = Some(limits);
        self
    }
    pub fn with_dosing(mut self, dosing: DosingCfg) -> Self {
        self.dosing = Some(dosing);
        self
    }
    pub fn with_correction(mut self, correction: CorrectionCfg) -> Self {
        self.correction_cfg = Some(correction);
        self
    }
    /// Replace the strategy selected by `CorrectionCfg::kind`.
    pub fn with_correction_strategy(
        mut self,
        strategy: impl RetrospectiveCorrection + Send + Sync + 'static,
    ) -> Self {
        self.correction = Some(Box::new(strategy));
        self
    }
    /// Provide a custom clock implementation; defaults to `SystemClock` when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<S, T> DoseEngineBuilder<Missing, S, T> {
    pub fn with_basal_rates(self, basal: BasalRateSchedule) -> DoseEngineBuilder<Set, S, T> {
        DoseEngineBuilder {
            basal: Some(basal),
            sensitivity: self.sensitivity,
            target: self.target,
            carb_ratio: self.carb_ratio,
            model: self.model,
            limits: self.limits,
            dosing: self.dosing,
            correction_cfg: self.correction_cfg,
            correction: self.correction,
            clock: self.clock,
            _b: PhantomData,
            _s: PhantomData,
            _t: PhantomData,
        }
    }
}

impl<B, T> DoseEngineBuilder<B, Missing, T> {
    pub fn with_sensitivity(
        self,
        sensitivity: InsulinSensitivitySchedule,
    ) -> DoseEngineBuilder<B, Set, T> {
        DoseEngineBuilder {
            basal: self.basal,
            sensitivity: Some(sensitivity),
            target: self.target,
            carb_ratio: self.carb_ratio,
            model: self.model,
            limits: self.limits,
            dosing: self.dosing,
            correction_cfg: self.correction_cfg,
            correction: self.correction,
            clock: self.clock,
            _b: PhantomData,
            _s: PhantomData,
            _t: PhantomData,
        }
    }
}

impl<B, S> DoseEngineBuilder<B, S, Missing> {
    pub fn with_target(self, target: GlucoseRangeSchedule) -> DoseEngineBuilder<B, S, Set> {
        DoseEngineBuilder {
            basal: self.basal,
            sensitivity: self.sensitivity,
            target: Some(target),
            carb_ratio: self.carb_ratio,
            model: self.model,
            limits: self.limits,
            dosing: self.dosing,
            correction_cfg: self.correction_cfg,
            correction: self.correction,
            clock: self.clock,
            _b: PhantomData,
            _s: PhantomData,
            _t: PhantomData,
        }
    }
}

impl DoseEngineBuilder<Set, Set, Set> {
    /// Validate and build the engine. Only available when all three schedules are set.
    pub fn build(self) -> Result<DoseEngine> {
        self.try_build()
    }
}
