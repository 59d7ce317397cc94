//! Insulin activity models, dose entries, insulin on board and insulin effects.
//!
//! ## Models
//!
//! - **Exponential**: rapid-acting curve parameterized by action duration and
//!   peak activity time, shifted by an onset delay. Presets cover adult,
//!   child and ultra-rapid insulin.
//! - **Walsh**: fourth-order polynomial fits for 3, 4, 5 and 6 hour action
//!   durations, time-scaled to the configured duration.
//! - **Linear**: legacy straight-line decay over the action duration.
//!
//! Continuous deliveries (basal, temp basal, suspend) are integrated in 5 min
//! segments, each treated as a small bolus.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use dosemath_traits::InsulinModel;

use crate::glucose::GlucoseEffect;
use crate::schedule::{BasalRateSchedule, InsulinSensitivitySchedule};
use crate::util;

// ── Exponential ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialInsulinModel {
    action_duration: Duration,
    peak_activity_time: Duration,
    delay: Duration,
    // Precomputed curve constants, all in minutes.
    tau: f64,
    a: f64,
    s: f64,
}

impl ExponentialInsulinModel {
    pub const DEFAULT_DELAY_MIN: i64 = 10;

    /// Build a model. `peak_activity_time` must be less than half of `action_duration`.
    pub fn new(action_duration: Duration, peak_activity_time: Duration, delay: Duration) -> Self {
        let td = util::as_minutes(action_duration);
        let tp = util::as_minutes(peak_activity_time);
        let tau = tp * (1.0 - tp / td) / (1.0 - 2.0 * tp / td);
        let a = 2.0 * tau / td;
        let s = 1.0 / (1.0 - a + (1.0 + a) * (-td / tau).exp());
        Self {
            action_duration,
            peak_activity_time,
            delay,
            tau,
            a,
            s,
        }
    }

    /// Rapid-acting, adults.
    pub fn adult() -> Self {
        Self::new(
            Duration::minutes(360),
            Duration::minutes(75),
            Duration::minutes(Self::DEFAULT_DELAY_MIN),
        )
    }

    /// Rapid-acting, children.
    pub fn child() -> Self {
        Self::new(
            Duration::minutes(360),
            Duration::minutes(65),
            Duration::minutes(Self::DEFAULT_DELAY_MIN),
        )
    }

    /// Ultra-rapid.
    pub fn fiasp() -> Self {
        Self::new(
            Duration::minutes(360),
            Duration::minutes(55),
            Duration::minutes(Self::DEFAULT_DELAY_MIN),
        )
    }

    pub fn action_duration(&self) -> Duration {
        self.action_duration
    }

    pub fn peak_activity_time(&self) -> Duration {
        self.peak_activity_time
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl InsulinModel for ExponentialInsulinModel {
    fn effect_duration(&self) -> Duration {
        self.action_duration + self.delay
    }

    fn percent_effect_remaining(&self, elapsed: Duration) -> f64 {
        let t = util::as_minutes(elapsed - self.delay);
        let td = util::as_minutes(self.action_duration);
        if t <= 0.0 {
            return 1.0;
        }
        if t >= td {
            return 0.0;
        }
        let (tau, a, s) = (self.tau, self.a, self.s);
        1.0 - s
            * (1.0 - a)
            * ((t * t / (tau * td * (1.0 - a)) - t / tau - 1.0) * (-t / tau).exp() + 1.0)
    }
}

// ── Walsh ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalshInsulinModel {
    action_duration: Duration,
}

impl WalshInsulinModel {
    pub fn new(action_duration: Duration) -> Self {
        Self { action_duration }
    }
}

impl InsulinModel for WalshInsulinModel {
    fn effect_duration(&self) -> Duration {
        self.action_duration
    }

    fn percent_effect_remaining(&self, elapsed: Duration) -> f64 {
        let t = util::as_minutes(elapsed);
        let dur = util::as_minutes(self.action_duration);
        if t <= 0.0 {
            return 1.0;
        }
        if t >= dur {
            return 0.0;
        }
        // Snap to the nearest fitted curve and scale time onto it.
        let nearest = if dur < 240.0 {
            180.0
        } else if dur < 300.0 {
            240.0
        } else if dur < 360.0 {
            300.0
        } else {
            360.0
        };
        let m = t * nearest / dur;
        let m2 = m * m;
        let m3 = m2 * m;
        let m4 = m3 * m;
        let v = match nearest as u32 {
            180 => -3.2030e-9 * m4 + 1.354e-6 * m3 - 1.759e-4 * m2 + 9.255e-4 * m + 0.99951,
            240 => -3.310e-10 * m4 + 2.530e-7 * m3 - 5.510e-5 * m2 - 9.086e-4 * m + 0.99950,
            300 => -2.950e-10 * m4 + 2.320e-7 * m3 - 5.550e-5 * m2 + 4.490e-4 * m + 0.99300,
            _ => -1.493e-10 * m4 + 1.413e-7 * m3 - 4.095e-5 * m2 + 6.365e-4 * m + 0.99700,
        };
        v.clamp(0.0, 1.0)
    }
}

// ── Linear ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearInsulinModel {
    action_duration: Duration,
}

impl LinearInsulinModel {
    pub fn new(action_duration: Duration) -> Self {
        Self { action_duration }
    }
}

impl InsulinModel for LinearInsulinModel {
    fn effect_duration(&self) -> Duration {
        self.action_duration
    }

    fn percent_effect_remaining(&self, elapsed: Duration) -> f64 {
        let dur = util::as_minutes(self.action_duration);
        if dur <= 0.0 {
            return 0.0;
        }
        (1.0 - util::as_minutes(elapsed) / dur).clamp(0.0, 1.0)
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Model selection used by the engine and settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsulinModelKind {
    Exponential(ExponentialInsulinModel),
    Walsh(WalshInsulinModel),
    Linear(LinearInsulinModel),
}

impl InsulinModel for InsulinModelKind {
    fn effect_duration(&self) -> Duration {
        match self {
            InsulinModelKind::Exponential(m) => m.effect_duration(),
            InsulinModelKind::Walsh(m) => m.effect_duration(),
            InsulinModelKind::Linear(m) => m.effect_duration(),
        }
    }

    fn percent_effect_remaining(&self, elapsed: Duration) -> f64 {
        match self {
            InsulinModelKind::Exponential(m) => m.percent_effect_remaining(elapsed),
            InsulinModelKind::Walsh(m) => m.percent_effect_remaining(elapsed),
            InsulinModelKind::Linear(m) => m.percent_effect_remaining(elapsed),
        }
    }
}

// ── Doses ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseType {
    Basal,
    TempBasal,
    Bolus,
    Suspend,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoseUnit {
    #[serde(rename = "U")]
    Units,
    #[serde(rename = "U/hour")]
    UnitsPerHour,
}

/// Delivered or currently active insulin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoseEntry {
    #[serde(rename = "type")]
    pub kind: DoseType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: f64,
    pub unit: DoseUnit,
}

impl DoseEntry {
    pub fn bolus(date: DateTime<Utc>, units: f64) -> Self {
        Self {
            kind: DoseType::Bolus,
            start_date: date,
            end_date: date,
            value: units,
            unit: DoseUnit::Units,
        }
    }

    pub fn temp_basal(start: DateTime<Utc>, end: DateTime<Utc>, units_per_hour: f64) -> Self {
        Self {
            kind: DoseType::TempBasal,
            start_date: start,
            end_date: end,
            value: units_per_hour,
            unit: DoseUnit::UnitsPerHour,
        }
    }

    pub fn suspend(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            kind: DoseType::Suspend,
            start_date: start,
            end_date: end,
            value: 0.0,
            unit: DoseUnit::UnitsPerHour,
        }
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }

    /// Total units over the entry's duration.
    pub fn units(&self) -> f64 {
        match self.unit {
            DoseUnit::Units => self.value,
            DoseUnit::UnitsPerHour => self.value * util::as_hours(self.duration()),
        }
    }

    /// Delivery rate; an instantaneous entry has rate 0.
    pub fn units_per_hour(&self) -> f64 {
        match self.unit {
            DoseUnit::UnitsPerHour => self.value,
            DoseUnit::Units => {
                let h = util::as_hours(self.duration());
                if h > 0.0 { self.value / h } else { 0.0 }
            }
        }
    }

    /// Insulin delivered beyond (or, when negative, withheld from) the scheduled basal.
    pub fn net_basal_units(&self, scheduled_rate: f64) -> f64 {
        let hours = util::as_hours(self.duration());
        match self.kind {
            DoseType::Bolus => self.units(),
            DoseType::Basal | DoseType::TempBasal => (self.units_per_hour() - scheduled_rate) * hours,
            DoseType::Suspend => -scheduled_rate * hours,
            DoseType::Resume => 0.0,
        }
    }

    /// Whether the entry is a temp basal still running at `at`.
    pub fn is_active_temp_basal(&self, at: DateTime<Utc>) -> bool {
        matches!(self.kind, DoseType::TempBasal | DoseType::Suspend) && self.end_date > at
    }
}

/// Fraction of a dose's effect remaining (or delivered) at `date`.
fn effect_fraction(model: &dyn InsulinModel, dose: &DoseEntry, date: DateTime<Utc>, remaining: bool) -> f64 {
    let time = date - dose.start_date;
    if time < Duration::zero() {
        return 0.0;
    }
    let pick = |elapsed: Duration| {
        let r = model.percent_effect_remaining(elapsed);
        if remaining { r } else { 1.0 - r }
    };

    let dose_duration = dose.duration();
    if dose_duration <= Duration::zero() {
        return pick(time);
    }

    let delta = util::delta();
    let dur_ms = dose_duration.num_milliseconds() as f64;
    let delta_ms = delta.num_milliseconds();
    let limit = Duration::milliseconds((time.num_milliseconds() / delta_ms) * delta_ms).min(dose_duration);

    let mut value = 0.0;
    let mut offset = Duration::zero();
    loop {
        let segment_end = (offset + delta).min(dose_duration);
        let segment = ((segment_end - offset).num_milliseconds() as f64).max(0.0) / dur_ms;
        value += segment * pick(time - offset);
        offset += delta;
        if offset > limit {
            break;
        }
    }
    value
}

fn scheduled_rate(basal: Option<&BasalRateSchedule>, at: DateTime<Utc>) -> f64 {
    basal.map_or(0.0, |s| *s.value_at(at))
}

/// Units still to act at `at`, net of scheduled basal when a schedule is given.
pub fn insulin_on_board(
    doses: &[DoseEntry],
    model: &dyn InsulinModel,
    basal: Option<&BasalRateSchedule>,
    at: DateTime<Utc>,
) -> f64 {
    doses
        .iter()
        .map(|d| {
            let units = d.net_basal_units(scheduled_rate(basal, d.start_date));
            units * effect_fraction(model, d, at, true)
        })
        .sum()
}

/// Cumulative glucose effect of `doses` on a 5 min grid covering `[start, end]`.
pub fn glucose_effects(
    doses: &[DoseEntry],
    model: &dyn InsulinModel,
    sensitivity: &InsulinSensitivitySchedule,
    basal: Option<&BasalRateSchedule>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<GlucoseEffect> {
    let delta = util::delta();
    let mut date = util::floor_to(start, delta);
    let end = util::ceil_to(end, delta);

    let weighted: Vec<(f64, &DoseEntry)> = doses
        .iter()
        .map(|d| {
            let units = d.net_basal_units(scheduled_rate(basal, d.start_date));
            (-sensitivity.value_at(d.start_date) * units, d)
        })
        .collect();

    let mut out = Vec::new();
    while date <= end {
        let value: f64 = weighted
            .iter()
            .map(|(w, d)| w * effect_fraction(model, d, date, false))
            .sum();
        out.push(GlucoseEffect::new(date, value));
        date += delta;
    }
    out
}
