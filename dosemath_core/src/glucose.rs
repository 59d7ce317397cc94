//! Glucose samples, effect timelines and the math that operates on them.
//!
//! All concentrations are mg/dL. Effects are cumulative: a timeline's value at
//! a date is the total change attributed to its cause since the first entry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::util;

/// A glucose reading or a predicted value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseValue {
    #[serde(rename = "date")]
    pub start_date: DateTime<Utc>,
    pub quantity: f64,
}

impl GlucoseValue {
    pub fn new(start_date: DateTime<Utc>, quantity: f64) -> Self {
        Self {
            start_date,
            quantity,
        }
    }
}

/// Cumulative effect on glucose from a single cause.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseEffect {
    #[serde(rename = "date")]
    pub start_date: DateTime<Utc>,
    pub quantity: f64,
}

impl GlucoseEffect {
    pub fn new(start_date: DateTime<Utc>, quantity: f64) -> Self {
        Self {
            start_date,
            quantity,
        }
    }
}

/// Change in glucose over `[start_date, end_date]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseChange {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub quantity: f64,
}

impl GlucoseChange {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>, quantity: f64) -> Self {
        Self {
            start_date,
            end_date,
            quantity,
        }
    }

    /// Widen this change to cover `other` and add its quantity.
    pub fn append(&mut self, other: &GlucoseChange) {
        self.start_date = self.start_date.min(other.start_date);
        self.end_date = self.end_date.max(other.end_date);
        self.quantity += other.quantity;
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }
}

/// Keep changes overlapping `[start, end]`; `None` leaves a side open.
pub fn filter_date_range(
    changes: &[GlucoseChange],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<GlucoseChange> {
    changes
        .iter()
        .filter(|c| start.is_none_or(|s| c.end_date >= s) && end.is_none_or(|e| c.start_date <= e))
        .copied()
        .collect()
}

/// Roll consecutive changes into running sums spanning `duration`.
///
/// Each output entry ends where the corresponding input ends and accumulates
/// every earlier input whose end lies within `duration` of it.
pub fn combined_sums(changes: &[GlucoseChange], duration: Duration) -> Vec<GlucoseChange> {
    let mut sums: Vec<GlucoseChange> = Vec::with_capacity(changes.len());
    let mut last_valid = 0usize;

    for change in changes.iter().rev() {
        let horizon = change.end_date + duration;
        let existing = sums.len();
        for sum in sums.iter_mut().take(existing).skip(last_valid) {
            if sum.end_date <= horizon {
                sum.append(change);
            } else {
                last_valid += 1;
            }
        }
        sums.push(*change);
    }

    sums.reverse();
    sums
}

/// Least-squares slope of `(x, y)` pairs; `None` when it is not defined.
fn linear_regression_slope(points: &[(f64, f64)]) -> Option<f64> {
    let n = points.len() as f64;
    if points.len() < 2 {
        return None;
    }
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxx, mut sxy) = (0.0f64, 0.0f64);
    for (x, y) in points {
        let dx = x - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    slope.is_finite().then_some(slope)
}

/// Samples are continuous when, on average, none is missing from the 5 min cadence.
fn is_continuous(samples: &[GlucoseValue]) -> bool {
    match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => {
            let span = (last.start_date - first.start_date).abs();
            span < util::delta() * i32::try_from(samples.len()).unwrap_or(i32::MAX)
        }
        _ => false,
    }
}

/// Momentum effect from recent samples.
///
/// Fits a line through the samples and projects it `duration` past the last
/// one. Needs at least 3 continuous samples; otherwise the effect is empty.
pub fn linear_momentum_effect(samples: &[GlucoseValue], duration: Duration) -> Vec<GlucoseEffect> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Vec::new();
    };
    if samples.len() <= 2 || !is_continuous(samples) {
        return Vec::new();
    }

    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|s| {
            let x = (s.start_date - first.start_date).num_milliseconds() as f64 / 1000.0;
            (x, s.quantity)
        })
        .collect();
    // mg/dL per second
    let Some(slope) = linear_regression_slope(&points) else {
        return Vec::new();
    };
    tracing::debug!(slope_per_min = slope * 60.0, "momentum slope");

    let Some((start, end)) =
        util::simulation_date_range([last.start_date], duration, util::delta())
    else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut date = start;
    while date <= end {
        let elapsed = ((date - last.start_date).num_milliseconds() as f64 / 1000.0).max(0.0);
        out.push(GlucoseEffect::new(date, elapsed * slope));
        date += util::delta();
    }
    out
}

/// Effect of a glucose velocity (mg/dL/min) that decays linearly to zero over `duration`.
///
/// The timeline starts at the 5 min boundary at or before `start` with value 0 and
/// has `duration / 5min + 1` entries.
pub fn decay_effect(
    start: DateTime<Utc>,
    rate_per_minute: f64,
    duration: Duration,
) -> Vec<GlucoseEffect> {
    let delta = util::delta();
    let start = util::floor_to(start, delta);
    let end = start + duration;
    let delta_min = util::as_minutes(delta);
    let decay_span = util::as_minutes(duration - delta);
    let slope = if decay_span > 0.0 {
        -rate_per_minute / decay_span
    } else {
        0.0
    };

    let mut out = vec![GlucoseEffect::new(start, 0.0)];
    let decay_start = start + delta;
    let mut date = decay_start;
    let mut last = 0.0;
    while date <= end {
        let since = util::as_minutes(date - decay_start);
        let value = last + (rate_per_minute + slope * since) * delta_min;
        out.push(GlucoseEffect::new(date, value));
        last = value;
        date += delta;
    }
    out
}
