pub mod clock;

pub use clock::{Clock, FixedClock, SystemClock};

use chrono::Duration;

/// Insulin activity curve, expressed as the fraction of a dose's glucose
/// lowering effect still to come after `elapsed` time.
///
/// Implementations must return 1.0 for non-positive elapsed times and 0.0 at or
/// beyond `effect_duration()`.
pub trait InsulinModel {
    /// Total time over which a dose has any effect, including onset delay.
    fn effect_duration(&self) -> Duration;

    fn percent_effect_remaining(&self, elapsed: Duration) -> f64;

    fn percent_effect_delivered(&self, elapsed: Duration) -> f64 {
        1.0 - self.percent_effect_remaining(elapsed)
    }
}

/// Snaps a dose quantity to something the pump can actually deliver.
pub trait Rounder {
    fn round(&self, value: f64) -> f64;
}

/// Rounds to the nearest whole pump stroke.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeRounder {
    pub strokes_per_unit: f64,
}

impl Default for StrokeRounder {
    fn default() -> Self {
        Self {
            strokes_per_unit: 40.0,
        }
    }
}

impl Rounder for StrokeRounder {
    #[inline]
    fn round(&self, value: f64) -> f64 {
        if self.strokes_per_unit <= 0.0 {
            return value;
        }
        (value * self.strokes_per_unit).round() / self.strokes_per_unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stroke_rounder_snaps_to_fortieths() {
        let r = StrokeRounder::default();
        assert_eq!(r.round(1.7), 1.7);
        assert_eq!(r.round(0.8512), 0.85);
        assert_eq!(r.round(0.0124), 0.0);
        assert_eq!(r.round(0.0126), 0.025);
    }

    #[test]
    fn non_positive_stroke_count_is_identity() {
        let r = StrokeRounder {
            strokes_per_unit: 0.0,
        };
        assert_eq!(r.round(1.2345), 1.2345);
    }
}
