//! Carbohydrate absorption effects (linear absorption model).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::glucose::GlucoseEffect;
use crate::schedule::{CarbRatioSchedule, InsulinSensitivitySchedule};
use crate::util;

/// Absorption starts this long after the entry.
pub const ABSORPTION_DELAY_MIN: i64 = 10;
pub const DEFAULT_ABSORPTION_MIN: f64 = 180.0;

fn default_absorption() -> Duration {
    util::minutes(DEFAULT_ABSORPTION_MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarbEntry {
    pub start_date: DateTime<Utc>,
    pub grams: f64,
    #[serde(default = "default_absorption", with = "util::serde_minutes")]
    pub absorption_time: Duration,
}

impl CarbEntry {
    pub fn new(start_date: DateTime<Utc>, grams: f64) -> Self {
        Self {
            start_date,
            grams,
            absorption_time: default_absorption(),
        }
    }

    /// Fraction absorbed `elapsed` after the entry, in `[0, 1]`.
    pub fn percent_absorbed(&self, elapsed: Duration) -> f64 {
        let t = util::as_minutes(elapsed) - ABSORPTION_DELAY_MIN as f64;
        let total = util::as_minutes(self.absorption_time);
        if total <= 0.0 {
            return if t >= 0.0 { 1.0 } else { 0.0 };
        }
        (t / total).clamp(0.0, 1.0)
    }
}

/// Cumulative glucose rise from `entries` on a 5 min grid covering `[start, end]`.
pub fn glucose_effects(
    entries: &[CarbEntry],
    carb_ratio: &CarbRatioSchedule,
    sensitivity: &InsulinSensitivitySchedule,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<GlucoseEffect> {
    let delta = util::delta();
    let mut date = util::floor_to(start, delta);
    let end = util::ceil_to(end, delta);

    // mg/dL per gram, fixed at the time the carbs were entered
    let weights: Vec<f64> = entries
        .iter()
        .map(|e| {
            let cr = *carb_ratio.value_at(e.start_date);
            if cr > 0.0 {
                e.grams * sensitivity.value_at(e.start_date) / cr
            } else {
                0.0
            }
        })
        .collect();

    let mut out = Vec::new();
    while date <= end {
        let value: f64 = entries
            .iter()
            .zip(&weights)
            .map(|(e, w)| w * e.percent_absorbed(date - e.start_date))
            .sum();
        out.push(GlucoseEffect::new(date, value));
        date += delta;
    }
    out
}
