//! Turn a glucose forecast into a temp basal, automatic dose or manual bolus.
//!
//! Every recommender first classifies the forecast over the insulin action
//! horizon with [`insulin_correction`]:
//!
//! - **Suspend**: some prediction is at or below the suspend threshold.
//! - **EntirelyBelowRange**: the minimum and eventual values are both below range.
//! - **AboveRange**: the eventual value is above range; the correction dose is
//!   the smallest one any single prediction calls for.
//! - **InRange**: anything else.
//!
//! The correction target for a prediction starts at the suspend threshold and,
//! once half of the insulin effect has elapsed, blends linearly to the middle of
//! the target range. Insulin cannot act on the near future, so the early part
//! of the forecast is only held to the safety floor.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use dosemath_traits::{InsulinModel, Rounder};

use crate::glucose::GlucoseValue;
use crate::insulin::DoseEntry;
use crate::schedule::{BasalRateSchedule, GlucoseRangeSchedule, InsulinSensitivitySchedule};
use crate::util;

/// Rates closer than this are considered equal.
const RATE_TOLERANCE: f64 = 0.01;

/// Length of the zero temp basal issued when predictions cross the suspend threshold.
pub const SUSPEND_DURATION_MIN: i64 = 30;

// ── Recommendation types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempBasalRecommendation {
    pub units_per_hour: f64,
    #[serde(with = "util::serde_minutes")]
    pub duration: Duration,
}

impl TempBasalRecommendation {
    pub fn new(units_per_hour: f64, duration: Duration) -> Self {
        Self {
            units_per_hour,
            duration,
        }
    }

    /// Canonical `{0, 0}` cancel sentinel, as sent to the pump.
    pub fn cancel() -> Self {
        Self::new(0.0, Duration::zero())
    }

    fn suspend() -> Self {
        Self::new(0.0, Duration::minutes(SUSPEND_DURATION_MIN))
    }

    /// Decide whether this rate needs to be sent given what the pump is doing.
    ///
    /// - An active temp basal at the same rate with more than
    ///   `continuation_interval` left is left alone.
    /// - A rate equal to the schedule cancels an active temp basal, or needs
    ///   nothing when none is running, unless the schedule is overridden.
    pub fn if_necessary(
        self,
        at: DateTime<Utc>,
        scheduled_rate: f64,
        last_temp_basal: Option<&DoseEntry>,
        continuation_interval: Duration,
        scheduled_rate_matches_pump: bool,
    ) -> TempBasalAction {
        let matches_scheduled = matches_rate(self.units_per_hour, scheduled_rate);

        if let Some(last) = last_temp_basal
            && last.is_active_temp_basal(at)
        {
            if matches_rate(self.units_per_hour, last.units_per_hour())
                && last.end_date - at > continuation_interval
            {
                return TempBasalAction::NoChange;
            }
            if matches_scheduled && scheduled_rate_matches_pump {
                return TempBasalAction::Cancel;
            }
            return TempBasalAction::Adjust(self);
        }

        if matches_scheduled && scheduled_rate_matches_pump {
            TempBasalAction::NoChange
        } else {
            TempBasalAction::Adjust(self)
        }
    }
}

#[inline]
fn matches_rate(a: f64, b: f64) -> bool {
    (a - b).abs() < RATE_TOLERANCE
}

/// What to do with the pump's basal delivery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TempBasalAction {
    /// Leave delivery as it is.
    NoChange,
    /// Cancel the running temp basal and return to schedule.
    Cancel,
    Adjust(TempBasalRecommendation),
}

impl TempBasalAction {
    /// The command for the pump, if any.
    pub fn recommendation(&self) -> Option<TempBasalRecommendation> {
        match self {
            TempBasalAction::NoChange => None,
            TempBasalAction::Cancel => Some(TempBasalRecommendation::cancel()),
            TempBasalAction::Adjust(r) => Some(*r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AutomaticDoseRecommendation {
    pub basal_adjustment: TempBasalAction,
    pub bolus_units: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "glucose", rename_all = "snake_case")]
pub enum BolusRecommendationNotice {
    CurrentGlucoseBelowTarget(GlucoseValue),
    GlucoseBelowSuspendThreshold(GlucoseValue),
    PredictedGlucoseBelowTarget(GlucoseValue),
    /// The latest glucose is too old to dose from.
    GlucoseTooOld(GlucoseValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BolusRecommendation {
    pub amount: f64,
    pub pending_insulin: f64,
    pub notice: Option<BolusRecommendationNotice>,
}

impl BolusRecommendation {
    /// A zero bolus carrying only `notice`.
    pub fn none(pending_insulin: f64, notice: Option<BolusRecommendationNotice>) -> Self {
        Self {
            amount: 0.0,
            pending_insulin,
            notice,
        }
    }
}

// ── Correction ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsulinCorrection {
    InRange,
    AboveRange {
        min: GlucoseValue,
        correcting: GlucoseValue,
        min_target: f64,
        units: f64,
    },
    EntirelyBelowRange {
        min: GlucoseValue,
        min_target: f64,
        units: f64,
    },
    Suspend {
        min: GlucoseValue,
    },
}

impl InsulinCorrection {
    /// Correction in units; negative when glucose should be raised.
    pub fn units(&self) -> f64 {
        match self {
            InsulinCorrection::AboveRange { units, .. }
            | InsulinCorrection::EntirelyBelowRange { units, .. } => *units,
            InsulinCorrection::InRange | InsulinCorrection::Suspend { .. } => 0.0,
        }
    }

    /// Rate that delivers the correction over `duration` on top of the schedule.
    pub fn as_temp_basal(
        &self,
        scheduled_rate: f64,
        max_basal_rate: f64,
        duration: Duration,
        rate_rounder: Option<&dyn Rounder>,
    ) -> TempBasalRecommendation {
        let hours = util::as_hours(duration);
        let mut rate = match self {
            InsulinCorrection::Suspend { .. } => 0.0,
            _ if hours > 0.0 => self.units() / hours + scheduled_rate,
            _ => scheduled_rate,
        };
        if let Some(r) = rate_rounder {
            rate = r.round(rate);
        }
        // Cap after rounding so a stroke never lifts the rate past the limit.
        rate = rate.clamp(0.0, max_basal_rate.max(0.0));
        TempBasalRecommendation::new(rate, duration)
    }

    fn as_bolus(&self, pending_insulin: f64, max_bolus: f64, volume_rounder: Option<&dyn Rounder>) -> f64 {
        let rounded = round_volume((self.units() - pending_insulin).max(0.0), volume_rounder);
        rounded.clamp(0.0, max_bolus.max(0.0))
    }

    fn as_partial_bolus(&self, factor: f64, max_bolus: f64, volume_rounder: Option<&dyn Rounder>) -> f64 {
        let partial = round_volume(self.units() * factor, volume_rounder);
        partial.clamp(0.0, max_bolus.max(0.0))
    }

    /// The forecast dips below range on its way up.
    fn dips_below(&self, lower_bound: f64) -> Option<GlucoseValue> {
        match self {
            InsulinCorrection::AboveRange { min, .. } if min.quantity < lower_bound => Some(*min),
            _ => None,
        }
    }
}

fn round_volume(units: f64, rounder: Option<&dyn Rounder>) -> f64 {
    rounder.map_or(units, |r| r.round(units))
}

/// Target for a prediction `percent` of the way through the insulin effect.
fn target_glucose_value(percent: f64, min_value: f64, max_value: f64) -> f64 {
    const USE_MIN_UNTIL: f64 = 0.5;
    if percent <= USE_MIN_UNTIL {
        return min_value;
    }
    if percent >= 1.0 {
        return max_value;
    }
    let slope = (max_value - min_value) / (1.0 - USE_MIN_UNTIL);
    min_value + slope * (percent - USE_MIN_UNTIL)
}

/// Shared inputs to all three recommenders.
#[derive(Clone, Copy)]
pub struct DosingContext<'a> {
    pub target: &'a GlucoseRangeSchedule,
    pub at: DateTime<Utc>,
    /// `None` means the target range lower bound at `at`.
    pub suspend_threshold: Option<f64>,
    pub sensitivity: &'a InsulinSensitivitySchedule,
    pub model: &'a dyn InsulinModel,
}

impl DosingContext<'_> {
    pub fn effective_suspend_threshold(&self) -> f64 {
        self.suspend_threshold
            .unwrap_or_else(|| self.target.min_at(self.at))
    }
}

/// Classify the forecast and compute the correction it calls for.
///
/// The scan starts at the forecast's first point when that is not after `at`
/// (it is the observed glucose, usually a few minutes old), otherwise at `at`.
/// Only predictions within one effect duration of that start are considered.
/// Returns `None` when there are none.
pub fn insulin_correction(glucose: &[GlucoseValue], ctx: &DosingContext<'_>) -> Option<InsulinCorrection> {
    let suspend_threshold = ctx.effective_suspend_threshold();
    let effect_duration = ctx.model.effect_duration();
    let start = glucose
        .first()
        .map_or(ctx.at, |first| first.start_date.min(ctx.at));
    let horizon_end = start + effect_duration;
    let effect_minutes = util::as_minutes(effect_duration);

    let mut min: Option<GlucoseValue> = None;
    let mut eventual: Option<GlucoseValue> = None;
    let mut correcting: Option<(GlucoseValue, f64)> = None;

    for prediction in glucose
        .iter()
        .filter(|p| p.start_date >= start && p.start_date <= horizon_end)
    {
        if prediction.quantity <= suspend_threshold {
            return Some(InsulinCorrection::Suspend { min: *prediction });
        }
        if min.is_none_or(|m| prediction.quantity < m.quantity) {
            min = Some(*prediction);
        }
        eventual = Some(*prediction);

        let elapsed = prediction.start_date - start;
        let target = target_glucose_value(
            if effect_minutes > 0.0 {
                util::as_minutes(elapsed) / effect_minutes
            } else {
                1.0
            },
            suspend_threshold,
            ctx.target.range_at(prediction.start_date).average(),
        );
        let effected_sensitivity = ctx.model.percent_effect_delivered(elapsed)
            * ctx.sensitivity.value_at(prediction.start_date);
        if effected_sensitivity <= 0.0 {
            continue;
        }
        let units = (prediction.quantity - target) / effected_sensitivity;
        if units > 0.0 && correcting.is_none_or(|(_, u)| units < u) {
            correcting = Some((*prediction, units));
        }
    }

    let (min, eventual) = (min?, eventual?);
    let min_range = ctx.target.range_at(min.start_date);
    let eventual_range = ctx.target.range_at(eventual.start_date);

    if min.quantity < min_range.min && eventual.quantity < eventual_range.min {
        let elapsed = min.start_date - start;
        let percent = ctx.model.percent_effect_delivered(elapsed).max(f64::EPSILON);
        let units = (min.quantity - min_range.average())
            / (ctx.sensitivity.value_at(min.start_date) * percent);
        return Some(InsulinCorrection::EntirelyBelowRange {
            min,
            min_target: min_range.min,
            units,
        });
    }

    if eventual.quantity > eventual_range.max
        && let Some((correcting, units)) = correcting
    {
        return Some(InsulinCorrection::AboveRange {
            min,
            correcting,
            min_target: eventual_range.min,
            units,
        });
    }

    Some(InsulinCorrection::InRange)
}

// ── Temp basal ───────────────────────────────────────────────────────────────

/// Pump-facing settings for temp basal recommendations.
#[derive(Clone, Copy)]
pub struct TempBasalSettings<'a> {
    pub basal_rates: &'a BasalRateSchedule,
    pub max_basal_rate: f64,
    pub last_temp_basal: Option<&'a DoseEntry>,
    pub duration: Duration,
    pub continuation_interval: Duration,
    pub rate_rounder: Option<&'a dyn Rounder>,
    pub is_basal_rate_schedule_override_active: bool,
}

impl TempBasalSettings<'_> {
    pub const DEFAULT_DURATION_MIN: i64 = 30;
    pub const DEFAULT_CONTINUATION_MIN: i64 = 11;
}

fn temp_basal_for(
    correction: &InsulinCorrection,
    ctx: &DosingContext<'_>,
    settings: &TempBasalSettings<'_>,
    max_basal_rate: f64,
) -> TempBasalAction {
    if let InsulinCorrection::Suspend { .. } = correction {
        return TempBasalAction::Adjust(TempBasalRecommendation::suspend());
    }
    let scheduled = *settings.basal_rates.value_at(ctx.at);
    correction
        .as_temp_basal(scheduled, max_basal_rate, settings.duration, settings.rate_rounder)
        .if_necessary(
            ctx.at,
            scheduled,
            settings.last_temp_basal,
            settings.continuation_interval,
            !settings.is_basal_rate_schedule_override_active,
        )
}

/// Recommend a temp basal from predicted glucose.
///
/// Empty input yields `NoChange`.
pub fn recommended_temp_basal(
    glucose: &[GlucoseValue],
    ctx: &DosingContext<'_>,
    settings: &TempBasalSettings<'_>,
) -> TempBasalAction {
    let Some(correction) = insulin_correction(glucose, ctx) else {
        return TempBasalAction::NoChange;
    };

    let scheduled = *settings.basal_rates.value_at(ctx.at);
    // Never raise basal while the forecast still dips below range.
    let max_basal_rate = if correction.dips_below(ctx.target.min_at(ctx.at)).is_some() {
        scheduled.min(settings.max_basal_rate)
    } else {
        settings.max_basal_rate
    };

    let action = temp_basal_for(&correction, ctx, settings, max_basal_rate);
    tracing::info!(?correction, ?action, "temp basal recommendation");
    action
}

// ── Automatic dose ───────────────────────────────────────────────────────────

/// Recommend a partial correction bolus plus, where needed, a basal adjustment.
///
/// `None` means neither a basal change nor a bolus is warranted. A correction
/// smaller than one pump stroke rounds to a zero bolus and is dropped.
pub fn recommended_automatic_dose(
    glucose: &[GlucoseValue],
    ctx: &DosingContext<'_>,
    settings: &TempBasalSettings<'_>,
    max_automatic_bolus: f64,
    partial_application_factor: f64,
    volume_rounder: Option<&dyn Rounder>,
) -> Option<AutomaticDoseRecommendation> {
    let correction = insulin_correction(glucose, ctx)?;

    let max_automatic_bolus = if correction.dips_below(ctx.target.min_at(ctx.at)).is_some() {
        0.0
    } else {
        max_automatic_bolus
    };

    // Basal stays at schedule; the correction goes out as a bolus.
    let scheduled = *settings.basal_rates.value_at(ctx.at);
    let basal_adjustment =
        temp_basal_for(&correction, ctx, settings, scheduled.min(settings.max_basal_rate));
    let bolus_units =
        correction.as_partial_bolus(partial_application_factor, max_automatic_bolus, volume_rounder);

    tracing::info!(?correction, ?basal_adjustment, bolus_units, "automatic dose recommendation");
    if basal_adjustment == TempBasalAction::NoChange && bolus_units <= 0.0 {
        return None;
    }
    Some(AutomaticDoseRecommendation {
        basal_adjustment,
        bolus_units,
    })
}

// ── Manual bolus ─────────────────────────────────────────────────────────────

/// Recommend a manual correction bolus with an advisory notice.
pub fn recommended_manual_bolus(
    glucose: &[GlucoseValue],
    ctx: &DosingContext<'_>,
    pending_insulin: f64,
    max_bolus: f64,
    volume_rounder: Option<&dyn Rounder>,
) -> BolusRecommendation {
    let Some(correction) = insulin_correction(glucose, ctx) else {
        return BolusRecommendation::none(pending_insulin, None);
    };

    if let InsulinCorrection::Suspend { min } = correction {
        return BolusRecommendation::none(
            pending_insulin,
            Some(BolusRecommendationNotice::GlucoseBelowSuspendThreshold(min)),
        );
    }

    let lower_bound = ctx.target.min_at(ctx.at);
    if let Some(current) = glucose.first()
        && current.quantity < lower_bound
    {
        return BolusRecommendation::none(
            pending_insulin,
            Some(BolusRecommendationNotice::CurrentGlucoseBelowTarget(*current)),
        );
    }

    let amount = correction.as_bolus(pending_insulin, max_bolus, volume_rounder);
    let notice = match correction {
        InsulinCorrection::EntirelyBelowRange { min, .. } => {
            Some(BolusRecommendationNotice::PredictedGlucoseBelowTarget(min))
        }
        _ => correction
            .dips_below(lower_bound)
            .map(BolusRecommendationNotice::PredictedGlucoseBelowTarget),
    };

    tracing::info!(?correction, amount, ?notice, "manual bolus recommendation");
    BolusRecommendation {
        amount,
        pending_insulin,
        notice,
    }
}
