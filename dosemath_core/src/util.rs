//! Common time helpers for dosemath_core.

use chrono::{DateTime, Duration, Utc};

/// Simulation step used for every effect timeline and forecast.
pub const DELTA_MINUTES: i64 = 5;

/// The 5-minute simulation step.
#[inline]
pub fn delta() -> Duration {
    Duration::minutes(DELTA_MINUTES)
}

/// Duration from fractional minutes, rounded to the nearest millisecond.
/// Non-finite input maps to zero.
#[inline]
pub fn minutes(m: f64) -> Duration {
    if !m.is_finite() {
        return Duration::zero();
    }
    Duration::milliseconds((m * 60_000.0).round() as i64)
}

/// Duration as fractional minutes.
#[inline]
pub fn as_minutes(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 60_000.0
}

/// Duration as fractional hours.
#[inline]
pub fn as_hours(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 3_600_000.0
}

/// Round `date` down to a multiple of `interval` since the epoch.
pub fn floor_to(date: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.num_milliseconds().max(1);
    let ms = date.timestamp_millis();
    let floored = ms.div_euclid(step) * step;
    DateTime::from_timestamp_millis(floored).unwrap_or(date)
}

/// Round `date` up to a multiple of `interval` since the epoch.
pub fn ceil_to(date: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let floored = floor_to(date, interval);
    if floored == date {
        date
    } else {
        floored + interval
    }
}

/// Start and end of a simulation covering `[first, last + duration]` aligned to
/// `delta`. Returns `None` for an empty date set.
pub fn simulation_date_range(
    dates: impl IntoIterator<Item = DateTime<Utc>>,
    duration: Duration,
    delta: Duration,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut min: Option<DateTime<Utc>> = None;
    let mut max: Option<DateTime<Utc>> = None;
    for d in dates {
        min = Some(min.map_or(d, |m| m.min(d)));
        max = Some(max.map_or(d, |m| m.max(d)));
    }
    let (start, end) = (min?, max?);
    Some((floor_to(start, delta), ceil_to(end + duration, delta)))
}

/// Serialize `chrono::Duration` as fractional minutes.
pub mod serde_minutes {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(super::as_minutes(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let m = f64::deserialize(d)?;
        Ok(super::minutes(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn floors_and_ceils_to_five_minutes() {
        let d = t("2015-07-13T12:03:10Z");
        assert_eq!(floor_to(d, delta()), t("2015-07-13T12:00:00Z"));
        assert_eq!(ceil_to(d, delta()), t("2015-07-13T12:05:00Z"));
        let aligned = t("2015-07-13T12:05:00Z");
        assert_eq!(floor_to(aligned, delta()), aligned);
        assert_eq!(ceil_to(aligned, delta()), aligned);
    }

    #[test]
    fn simulation_range_spans_duration() {
        let (s, e) = simulation_date_range(
            [t("2015-07-13T12:03:00Z")],
            Duration::minutes(30),
            delta(),
        )
        .unwrap();
        assert_eq!(s, t("2015-07-13T12:00:00Z"));
        assert_eq!(e, t("2015-07-13T12:35:00Z"));
        assert!(
            simulation_date_range(Vec::<DateTime<Utc>>::new(), Duration::minutes(30), delta())
                .is_none()
        );
    }

    #[test]
    fn minute_conversions() {
        assert_eq!(minutes(1.5), Duration::seconds(90));
        assert_eq!(minutes(f64::NAN), Duration::zero());
        assert_eq!(as_minutes(Duration::seconds(90)), 1.5);
        assert_eq!(as_hours(Duration::minutes(30)), 0.5);
    }
}
