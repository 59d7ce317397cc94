//! Glucose forecast: sum effect timelines onto a starting glucose value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::glucose::{GlucoseEffect, GlucoseValue};

/// Predicted glucose at a 5 min cadence, starting with the observed value.
///
/// Iteration is restartable; the forecast is never mutated once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Forecast {
    values: Vec<GlucoseValue>,
}

impl Forecast {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<GlucoseValue>) -> Self {
        Self { values }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GlucoseValue> {
        self.values.iter()
    }

    pub fn as_slice(&self) -> &[GlucoseValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn minimum(&self) -> Option<&GlucoseValue> {
        self.values
            .iter()
            .min_by(|a, b| a.quantity.total_cmp(&b.quantity))
    }

    pub fn eventual(&self) -> Option<&GlucoseValue> {
        self.values.last()
    }
}

impl<'a> IntoIterator for &'a Forecast {
    type Item = &'a GlucoseValue;
    type IntoIter = std::slice::Iter<'a, GlucoseValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Project glucose forward from `starting`.
///
/// Each effect timeline contributes the change between consecutive entries at
/// each date. The momentum timeline is blended in: it dominates right after the
/// starting glucose and fades out linearly by its last entry, with the other
/// effects taking over.
pub fn predict_glucose(
    starting: GlucoseValue,
    momentum: &[GlucoseEffect],
    effects: &[&[GlucoseEffect]],
) -> Forecast {
    let mut deltas: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();

    for timeline in effects {
        let mut previous = timeline.first().map_or(0.0, |e| e.quantity);
        for effect in *timeline {
            *deltas.entry(effect.start_date).or_insert(0.0) += effect.quantity - previous;
            previous = effect.quantity;
        }
    }

    if momentum.len() > 1 {
        let (m0, m1) = (momentum[0], momentum[1]);
        let blend_count = (momentum.len() - 2).max(1) as f64;
        let time_delta = (m1.start_date - m0.start_date).num_milliseconds() as f64;
        let momentum_offset = (starting.start_date - m0.start_date).num_milliseconds() as f64;
        let blend_slope = 1.0 / blend_count;
        let blend_offset = if time_delta > 0.0 {
            momentum_offset / time_delta * blend_slope
        } else {
            0.0
        };

        let mut previous = m0.quantity;
        for (index, effect) in momentum.iter().enumerate() {
            let value = effect.quantity - previous;
            let split = ((momentum.len() - index) as f64 / blend_count - blend_slope + blend_offset)
                .clamp(0.0, 1.0);
            let slot = deltas.entry(effect.start_date).or_insert(0.0);
            *slot = (1.0 - split) * *slot + split * value;
            previous = effect.quantity;
        }
    }

    let mut values = vec![starting];
    let mut last = starting.quantity;
    for (date, delta) in deltas {
        if date > starting.start_date {
            last += delta;
            values.push(GlucoseValue::new(date, last));
        }
    }
    Forecast { values }
}
