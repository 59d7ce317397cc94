//! Daily repeating therapy schedules.
//!
//! A schedule is an ordered list of `(offset from local midnight, value)` items
//! that wraps at 24h. Lookups take an absolute UTC instant and resolve it in the
//! schedule's fixed UTC offset.

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

#[derive(Debug, Clone, PartialEq)]
pub struct RepeatingScheduleValue<V> {
    /// Offset from local midnight.
    pub start_time: Duration,
    pub value: V,
}

impl<V> RepeatingScheduleValue<V> {
    pub fn new(start_time: Duration, value: V) -> Self {
        Self { start_time, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyValueSchedule<V> {
    items: Vec<RepeatingScheduleValue<V>>,
    time_zone: FixedOffset,
}

impl<V> DailyValueSchedule<V> {
    /// Build a schedule; items must start at midnight, ascend strictly and stay within a day.
    pub fn new(
        items: Vec<RepeatingScheduleValue<V>>,
        time_zone: FixedOffset,
    ) -> Result<Self, ScheduleError> {
        let first = items.first().ok_or(ScheduleError::Empty)?;
        if first.start_time != Duration::zero() {
            return Err(ScheduleError::FirstItemNotMidnight);
        }
        for (i, pair) in items.windows(2).enumerate() {
            if pair[1].start_time <= pair[0].start_time {
                return Err(ScheduleError::NotAscending(i + 1));
            }
        }
        if let Some(i) = items.iter().position(|it| it.start_time >= Duration::days(1)) {
            return Err(ScheduleError::OffsetOutOfRange(i));
        }
        Ok(Self { items, time_zone })
    }

    /// A schedule with a single all-day value, in UTC.
    pub fn constant(value: V) -> Self {
        Self {
            items: vec![RepeatingScheduleValue::new(Duration::zero(), value)],
            time_zone: Utc.fix(),
        }
    }

    pub fn items(&self) -> &[RepeatingScheduleValue<V>] {
        &self.items
    }

    pub fn time_zone(&self) -> FixedOffset {
        self.time_zone
    }

    fn offset_of_day(&self, date: DateTime<Utc>) -> Duration {
        let local = date.with_timezone(&self.time_zone);
        Duration::seconds(i64::from(local.num_seconds_from_midnight()))
    }

    /// The value active at `date`.
    pub fn value_at(&self, date: DateTime<Utc>) -> &V {
        let offset = self.offset_of_day(date);
        // `new` guarantees a midnight item, so the index is always valid.
        let idx = self
            .items
            .partition_point(|it| it.start_time <= offset)
            .saturating_sub(1);
        &self.items[idx].value
    }
}

impl DailyValueSchedule<f64> {
    /// Reject non-finite or negative values (`allow_zero` permits a 0 U/h basal).
    pub fn validated(self, allow_zero: bool) -> Result<Self, ScheduleError> {
        for (i, it) in self.items.iter().enumerate() {
            let ok = it.value.is_finite() && (it.value > 0.0 || (allow_zero && it.value == 0.0));
            if !ok {
                return Err(ScheduleError::InvalidValue(i));
            }
        }
        Ok(self)
    }
}

/// Scheduled basal delivery in U/h.
pub type BasalRateSchedule = DailyValueSchedule<f64>;
/// Glucose drop per unit of insulin, mg/dL/U.
pub type InsulinSensitivitySchedule = DailyValueSchedule<f64>;
/// Grams of carbohydrate covered per unit of insulin.
pub type CarbRatioSchedule = DailyValueSchedule<f64>;

/// Closed glucose interval, mg/dL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseRange {
    pub min: f64,
    pub max: f64,
}

impl GlucoseRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn average(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Temporary target range, active on `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeOverride {
    pub range: GlucoseRange,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RangeOverride {
    #[inline]
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseRangeSchedule {
    schedule: DailyValueSchedule<GlucoseRange>,
    override_range: Option<RangeOverride>,
}

impl GlucoseRangeSchedule {
    pub fn new(schedule: DailyValueSchedule<GlucoseRange>) -> Result<Self, ScheduleError> {
        for (i, it) in schedule.items().iter().enumerate() {
            let r = it.value;
            if !(r.min.is_finite() && r.max.is_finite() && r.min > 0.0 && r.min <= r.max) {
                return Err(ScheduleError::InvalidValue(i));
            }
        }
        Ok(Self {
            schedule,
            override_range: None,
        })
    }

    /// Single all-day range.
    pub fn constant(range: GlucoseRange) -> Result<Self, ScheduleError> {
        Self::new(DailyValueSchedule::constant(range))
    }

    pub fn with_override(mut self, o: RangeOverride) -> Self {
        self.override_range = Some(o);
        self
    }

    pub fn override_range(&self) -> Option<&RangeOverride> {
        self.override_range.as_ref()
    }

    pub fn is_override_active(&self, at: DateTime<Utc>) -> bool {
        self.override_range.is_some_and(|o| o.is_active(at))
    }

    /// Effective range at `at`, honoring an active override.
    pub fn range_at(&self, at: DateTime<Utc>) -> GlucoseRange {
        match self.override_range {
            Some(o) if o.is_active(at) => o.range,
            _ => *self.schedule.value_at(at),
        }
    }

    #[inline]
    pub fn min_at(&self, at: DateTime<Utc>) -> f64 {
        self.range_at(at).min
    }

    #[inline]
    pub fn max_at(&self, at: DateTime<Utc>) -> f64 {
        self.range_at(at).max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn basal(tz: FixedOffset) -> BasalRateSchedule {
        DailyValueSchedule::new(
            vec![
                RepeatingScheduleValue::new(Duration::zero(), 1.0),
                RepeatingScheduleValue::new(Duration::hours(6), 1.5),
            ],
            tz,
        )
        .unwrap()
    }

    #[test]
    fn value_at_picks_the_latest_started_item() {
        let s = basal(Utc.fix());
        assert_eq!(*s.value_at(t("2015-07-13T05:59:00Z")), 1.0);
        assert_eq!(*s.value_at(t("2015-07-13T06:00:00Z")), 1.5);
        assert_eq!(*s.value_at(t("2015-07-13T23:59:59Z")), 1.5);
        assert_eq!(*s.value_at(t("2015-07-14T00:00:00Z")), 1.0);
    }

    #[test]
    fn value_at_resolves_in_schedule_time_zone() {
        let s = basal(FixedOffset::west_opt(5 * 3600).unwrap());
        assert_eq!(*s.value_at(t("2015-07-13T10:59:00Z")), 1.0);
        assert_eq!(*s.value_at(t("2015-07-13T11:00:00Z")), 1.5);
    }

    #[test]
    fn malformed_items_are_rejected() {
        let tz = Utc.fix();
        let item = |min: i64, v: f64| RepeatingScheduleValue::new(Duration::minutes(min), v);

        assert_eq!(
            DailyValueSchedule::<f64>::new(vec![], tz).unwrap_err(),
            ScheduleError::Empty
        );
        assert_eq!(
            DailyValueSchedule::new(vec![item(30, 1.0)], tz).unwrap_err(),
            ScheduleError::FirstItemNotMidnight
        );
        assert_eq!(
            DailyValueSchedule::new(vec![item(0, 1.0), item(60, 1.0), item(60, 2.0)], tz)
                .unwrap_err(),
            ScheduleError::NotAscending(2)
        );
        assert_eq!(
            DailyValueSchedule::new(vec![item(0, 1.0), item(1440, 1.0)], tz).unwrap_err(),
            ScheduleError::OffsetOutOfRange(1)
        );
    }

    #[test]
    fn validated_allows_zero_basal_only_when_asked() {
        let zero = DailyValueSchedule::constant(0.0);
        assert!(zero.clone().validated(true).is_ok());
        assert_eq!(zero.validated(false).unwrap_err(), ScheduleError::InvalidValue(0));
        assert_eq!(
            DailyValueSchedule::constant(f64::NAN).validated(true).unwrap_err(),
            ScheduleError::InvalidValue(0)
        );
    }

    #[test]
    fn override_applies_on_half_open_interval() {
        let start = t("2015-07-13T12:00:00Z");
        let end = t("2015-07-13T13:00:00Z");
        let s = GlucoseRangeSchedule::constant(GlucoseRange::new(100.0, 120.0))
            .unwrap()
            .with_override(RangeOverride {
                range: GlucoseRange::new(140.0, 160.0),
                start,
                end,
            });

        assert_eq!(s.range_at(start - Duration::minutes(1)).min, 100.0);
        assert!(s.is_override_active(start));
        assert_eq!(s.min_at(start), 140.0);
        assert_eq!(s.max_at(end - Duration::minutes(1)), 160.0);
        assert_eq!(s.range_at(end).average(), 110.0);
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert_eq!(
            GlucoseRangeSchedule::constant(GlucoseRange::new(120.0, 100.0)).unwrap_err(),
            ScheduleError::InvalidValue(0)
        );
        assert!(GlucoseRange::new(100.0, 120.0).contains(120.0));
    }
}
