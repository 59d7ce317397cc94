use chrono::{DateTime, Duration, Utc};
use dosemath_core::{
    BasalRateSchedule, DosingContext, GlucoseRange, GlucoseRangeSchedule, GlucoseValue,
    InsulinSensitivitySchedule, StrokeRounder, TempBasalAction, TempBasalSettings,
    WalshInsulinModel, recommended_automatic_dose, recommended_manual_bolus,
    recommended_temp_basal,
};
use proptest::prelude::*;

const MAX_BASAL_RATE: f64 = 3.0;
const MAX_BOLUS: f64 = 10.0;
const SUSPEND_THRESHOLD: f64 = 70.0;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2015-07-13T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

// A forecast every 5 min over the 4 h horizon with bounded step changes.
prop_compose! {
    fn forecast_strategy()(
        start in 40.0f64..400.0,
        steps in prop::collection::vec(-15.0f64..15.0, 1..49),
    ) -> Vec<GlucoseValue> {
        let mut value = start;
        let mut out = vec![GlucoseValue::new(t0(), value)];
        for (i, step) in steps.iter().enumerate() {
            value = (value + step).clamp(39.0, 450.0);
            let minutes = 5 * (i64::try_from(i).unwrap() + 1);
            out.push(GlucoseValue::new(t0() + Duration::minutes(minutes), value));
        }
        out
    }
}

struct Fixture {
    basal: BasalRateSchedule,
    sensitivity: InsulinSensitivitySchedule,
    target: GlucoseRangeSchedule,
    model: WalshInsulinModel,
    rounder: StrokeRounder,
}

impl Fixture {
    fn new() -> Self {
        Self {
            basal: BasalRateSchedule::constant(1.0),
            sensitivity: InsulinSensitivitySchedule::constant(50.0),
            target: GlucoseRangeSchedule::constant(GlucoseRange::new(100.0, 120.0)).unwrap(),
            model: WalshInsulinModel::new(Duration::hours(4)),
            rounder: StrokeRounder::default(),
        }
    }

    fn ctx(&self) -> DosingContext<'_> {
        self.ctx_at(t0())
    }

    fn ctx_at(&self, at: DateTime<Utc>) -> DosingContext<'_> {
        DosingContext {
            target: &self.target,
            at,
            suspend_threshold: Some(SUSPEND_THRESHOLD),
            sensitivity: &self.sensitivity,
            model: &self.model,
        }
    }

    fn settings(&self) -> TempBasalSettings<'_> {
        self.settings_with(MAX_BASAL_RATE)
    }

    fn settings_with(&self, max_basal_rate: f64) -> TempBasalSettings<'_> {
        TempBasalSettings {
            basal_rates: &self.basal,
            max_basal_rate,
            last_temp_basal: None,
            duration: Duration::minutes(30),
            continuation_interval: Duration::minutes(11),
            rate_rounder: Some(&self.rounder),
            is_basal_rate_schedule_override_active: false,
        }
    }
}

proptest! {
    #[test]
    fn temp_basal_rate_stays_within_limits(
        forecast in forecast_strategy(),
        max_basal_rate in 0.0f64..6.0,
    ) {
        let f = Fixture::new();
        let action = recommended_temp_basal(&forecast, &f.ctx(), &f.settings_with(max_basal_rate));
        if let Some(rec) = action.recommendation() {
            prop_assert!(rec.units_per_hour >= 0.0);
            prop_assert!(
                rec.units_per_hour <= max_basal_rate,
                "rate {} > {}", rec.units_per_hour, max_basal_rate
            );
        }
    }

    #[test]
    fn bolus_amounts_stay_within_limits(
        forecast in forecast_strategy(),
        pending in 0.0f64..3.0,
        max_bolus in 0.0f64..12.0,
        automatic_share in 0.0f64..=1.0,
    ) {
        let f = Fixture::new();
        let max_automatic_bolus = max_bolus * automatic_share;
        let manual = recommended_manual_bolus(&forecast, &f.ctx(), pending, max_bolus, Some(&f.rounder));
        prop_assert!(manual.amount >= 0.0);
        prop_assert!(manual.amount <= max_bolus, "manual {} > {}", manual.amount, max_bolus);

        let auto = recommended_automatic_dose(
            &forecast,
            &f.ctx(),
            &f.settings(),
            max_automatic_bolus,
            0.4,
            Some(&f.rounder),
        );
        if let Some(auto) = auto {
            prop_assert!(auto.bolus_units >= 0.0);
            prop_assert!(
                auto.bolus_units <= max_automatic_bolus,
                "automatic {} > {}", auto.bolus_units, max_automatic_bolus
            );
        }
    }

    #[test]
    fn forecast_at_or_below_threshold_always_suspends(
        mut forecast in forecast_strategy(),
        pick in any::<prop::sample::Index>(),
        low in 39.0f64..=SUSPEND_THRESHOLD,
        minutes_late in 0i64..15,
    ) {
        let i = pick.index(forecast.len());
        forecast[i].quantity = low;
        let f = Fixture::new();
        // Evaluated up to a cycle after the forecast's first point.
        let ctx = f.ctx_at(t0() + Duration::minutes(minutes_late));

        let action = recommended_temp_basal(&forecast, &ctx, &f.settings());
        let rec = action.recommendation().unwrap();
        prop_assert_eq!(rec.units_per_hour, 0.0);
        prop_assert_eq!(rec.duration, Duration::minutes(30));

        let manual = recommended_manual_bolus(&forecast, &ctx, 0.0, MAX_BOLUS, None);
        prop_assert_eq!(manual.amount, 0.0);
        prop_assert!(manual.notice.is_some());
    }

    #[test]
    fn recommendations_are_deterministic(forecast in forecast_strategy()) {
        let f = Fixture::new();
        let a = recommended_temp_basal(&forecast, &f.ctx(), &f.settings());
        let b = recommended_temp_basal(&forecast, &f.ctx(), &f.settings());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn in_range_forecast_never_changes_scheduled_basal(value in 100.0f64..120.0, len in 1usize..49) {
        let f = Fixture::new();
        let forecast: Vec<GlucoseValue> = (0..len)
            .map(|i| GlucoseValue::new(t0() + Duration::minutes(5 * i64::try_from(i).unwrap()), value))
            .collect();
        let action = recommended_temp_basal(&forecast, &f.ctx(), &f.settings());
        prop_assert_eq!(action, TempBasalAction::NoChange);
    }
}
