use chrono::{DateTime, Duration, Utc};
use dosemath_core::{
    BasalRateSchedule, BolusRecommendationNotice, CorrectionStatus, DoseEngine, DoseEntry,
    DoseMathError, DosingCfg, DosingLimits, DosingStrategy, GlucoseChange, GlucoseRange,
    GlucoseRangeSchedule, GlucoseValue, InsulinSensitivitySchedule, LoopSnapshot, LoopWarning,
    TempBasalAction, TempBasalRecommendation,
};
use dosemath_traits::FixedClock;
use rstest::rstest;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2015-07-13T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

const LIMITS: DosingLimits = DosingLimits {
    max_basal_rate_per_hour: 3.0,
    max_bolus: 10.0,
    max_automatic_bolus: 5.0,
    suspend_threshold: None,
};

/// ISF 50, target 100-120, basal 1 U/h, adult exponential model.
fn engine(strategy: DosingStrategy) -> DoseEngine {
    engine_with(strategy, LIMITS)
}

fn engine_with(strategy: DosingStrategy, limits: DosingLimits) -> DoseEngine {
    DoseEngine::builder()
        .with_basal_rates(BasalRateSchedule::constant(1.0))
        .with_sensitivity(InsulinSensitivitySchedule::constant(50.0))
        .with_target(GlucoseRangeSchedule::constant(GlucoseRange::new(100.0, 120.0)).unwrap())
        .with_limits(limits)
        .with_dosing(DosingCfg {
            strategy,
            ..DosingCfg::default()
        })
        .build()
        .unwrap()
}

/// Flat glucose every 5 min for the half hour ending at `t0`.
fn flat(value: f64) -> Vec<GlucoseValue> {
    (0..=6)
        .map(|i| GlucoseValue::new(t0() - Duration::minutes(30 - 5 * i), value))
        .collect()
}

fn snapshot(glucose: Vec<GlucoseValue>) -> LoopSnapshot {
    LoopSnapshot {
        glucose,
        ..LoopSnapshot::default()
    }
}

#[test]
fn flat_in_range_needs_nothing() {
    let out = engine(DosingStrategy::TempBasalOnly)
        .recommend_at(&snapshot(flat(110.0)), t0())
        .unwrap();

    assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    assert_eq!(out.forecast.as_slice()[0], GlucoseValue::new(t0(), 110.0));
    assert!(out.forecast.iter().all(|g| (g.quantity - 110.0).abs() < 1e-9));
    assert_eq!(out.temp_basal, Some(TempBasalAction::NoChange));
    assert_eq!(out.automatic_dose, None);
    assert_eq!(out.manual_bolus.amount, 0.0);
    assert_eq!(out.manual_bolus.notice, None);
    assert_eq!(out.insulin_on_board, 0.0);
    assert_eq!(out.retrospective_correction.status, CorrectionStatus::NotComputed);
}

#[test]
fn flat_high_raises_basal_and_recommends_bolus() {
    let out = engine(DosingStrategy::TempBasalOnly)
        .recommend_at(&snapshot(flat(250.0)), t0())
        .unwrap();

    // Forecast spans the 6 h action time plus onset delay.
    assert_eq!(out.forecast.eventual().unwrap().start_date, t0() + Duration::minutes(370));
    assert_eq!(
        out.temp_basal,
        Some(TempBasalAction::Adjust(TempBasalRecommendation::new(
            3.0,
            Duration::minutes(30)
        )))
    );
    // (250 - 110) / 50
    assert!((out.manual_bolus.amount - 2.8).abs() < 1e-9);
}

#[test]
fn automatic_strategy_boluses_part_of_correction() {
    let out = engine(DosingStrategy::AutomaticBolus)
        .recommend_at(&snapshot(flat(250.0)), t0())
        .unwrap();

    assert_eq!(out.temp_basal, None);
    let auto = out.automatic_dose.unwrap();
    assert_eq!(auto.basal_adjustment, TempBasalAction::NoChange);
    // 2.8 U * 0.4, rounded to a 1/40 U stroke.
    assert!((auto.bolus_units - 1.125).abs() < 1e-9);
}

#[test]
fn insulin_on_board_predicts_low_and_suspends() {
    let mut snap = snapshot(flat(150.0));
    snap.doses = vec![DoseEntry::bolus(t0() - Duration::minutes(30), 2.0)];
    let out = engine(DosingStrategy::TempBasalOnly)
        .recommend_at(&snap, t0())
        .unwrap();

    assert!(out.insulin_on_board > 1.0 && out.insulin_on_board < 2.0);
    let eventual = out.forecast.eventual().unwrap().quantity;
    assert!(eventual > 45.0 && eventual < 60.0, "eventual {eventual}");
    assert_eq!(
        out.temp_basal,
        Some(TempBasalAction::Adjust(TempBasalRecommendation::new(
            0.0,
            Duration::minutes(30)
        )))
    );
    assert_eq!(out.manual_bolus.amount, 0.0);
    assert!(matches!(
        out.manual_bolus.notice,
        Some(BolusRecommendationNotice::GlucoseBelowSuspendThreshold(_))
    ));
}

#[test]
fn single_sample_is_insufficient() {
    let out = engine(DosingStrategy::TempBasalOnly)
        .recommend_at(&snapshot(vec![GlucoseValue::new(t0(), 180.0)]), t0())
        .unwrap();

    assert!(out.forecast.is_empty());
    assert_eq!(
        out.warnings,
        vec![LoopWarning::InsufficientGlucoseData { samples: 1 }]
    );
    assert_eq!(out.temp_basal, Some(TempBasalAction::NoChange));
    assert_eq!(out.manual_bolus.amount, 0.0);
}

#[test]
fn old_glucose_disables_automatic_dosing() {
    let at = t0() + Duration::minutes(20);
    let out = engine(DosingStrategy::AutomaticBolus)
        .recommend_at(&snapshot(flat(250.0)), at)
        .unwrap();

    assert_eq!(out.warnings, vec![LoopWarning::GlucoseTooOld { latest: t0() }]);
    assert_eq!(out.temp_basal, None);
    assert_eq!(out.automatic_dose, None);
}

#[test]
fn old_glucose_withholds_manual_bolus() {
    let at = t0() + Duration::hours(2);
    let out = engine(DosingStrategy::TempBasalOnly)
        .recommend_at(&snapshot(flat(250.0)), at)
        .unwrap();

    assert_eq!(out.temp_basal, None);
    assert_eq!(out.manual_bolus.amount, 0.0);
    assert_eq!(
        out.manual_bolus.notice,
        Some(BolusRecommendationNotice::GlucoseTooOld(GlucoseValue::new(t0(), 250.0)))
    );
}

#[rstest]
#[case::at_latest_sample(0)]
#[case::minutes_after_latest_sample(3)]
#[case::just_before_stale(14)]
fn low_current_glucose_suspends(#[case] minutes_late: i64) {
    let glucose = vec![
        GlucoseValue::new(t0() - Duration::minutes(10), 40.0),
        GlucoseValue::new(t0() - Duration::minutes(5), 52.0),
        GlucoseValue::new(t0(), 64.0),
    ];
    let limits = DosingLimits {
        suspend_threshold: Some(65.0),
        ..LIMITS
    };
    let out = engine_with(DosingStrategy::TempBasalOnly, limits)
        .recommend_at(&snapshot(glucose), t0() + Duration::minutes(minutes_late))
        .unwrap();

    assert_eq!(
        out.temp_basal,
        Some(TempBasalAction::Adjust(TempBasalRecommendation::new(
            0.0,
            Duration::minutes(30)
        )))
    );
    assert_eq!(out.manual_bolus.amount, 0.0);
    assert_eq!(
        out.manual_bolus.notice,
        Some(BolusRecommendationNotice::GlucoseBelowSuspendThreshold(GlucoseValue::new(
            t0(),
            64.0
        )))
    );
}

#[test]
fn recommendations_late_in_the_cycle_match_on_time_ones() {
    let engine = engine(DosingStrategy::TempBasalOnly);
    let on_time = engine.recommend_at(&snapshot(flat(250.0)), t0()).unwrap();
    let late = engine
        .recommend_at(&snapshot(flat(250.0)), t0() + Duration::minutes(4))
        .unwrap();

    assert_eq!(late.temp_basal, on_time.temp_basal);
    assert_eq!(late.manual_bolus, on_time.manual_bolus);
}

#[rstest]
#[case::temp_basal_only(DosingStrategy::TempBasalOnly)]
#[case::automatic_bolus(DosingStrategy::AutomaticBolus)]
fn limits_between_strokes_are_never_exceeded(#[case] strategy: DosingStrategy) {
    let limits = DosingLimits {
        max_basal_rate_per_hour: 2.99,
        max_bolus: 1.99,
        max_automatic_bolus: 1.11,
        suspend_threshold: None,
    };
    let out = engine_with(strategy, limits)
        .recommend_at(&snapshot(flat(250.0)), t0())
        .unwrap();

    if let Some(TempBasalAction::Adjust(rec)) = out.temp_basal {
        assert!(rec.units_per_hour <= 2.99, "rate {}", rec.units_per_hour);
        assert!((rec.units_per_hour - 2.99).abs() < 1e-9);
    }
    if let Some(auto) = out.automatic_dose {
        assert!(auto.bolus_units <= 1.11, "automatic {}", auto.bolus_units);
    }
    assert!(out.manual_bolus.amount <= 1.99, "manual {}", out.manual_bolus.amount);
    assert!((out.manual_bolus.amount - 1.99).abs() < 1e-9);
}

#[test]
fn fresh_discrepancies_feed_the_forecast() {
    let mut snap = snapshot(flat(110.0));
    snap.discrepancies = (0..12)
        .map(|i| {
            let end = t0() - Duration::minutes(55 - 5 * i);
            GlucoseChange::new(end - Duration::minutes(5), end, 2.0)
        })
        .collect();
    let out = engine(DosingStrategy::TempBasalOnly)
        .recommend_at(&snap, t0())
        .unwrap();

    assert_eq!(out.retrospective_correction.status, CorrectionStatus::Computed);
    assert_eq!(out.retrospective_correction.total_glucose_correction_effect, Some(14.0));
    assert!(out.forecast.eventual().unwrap().quantity > 110.0);
    assert!(out.warnings.is_empty());
}

#[test]
fn stale_discrepancies_are_reported() {
    let mut snap = snapshot(flat(110.0));
    let end = t0() - Duration::minutes(40);
    snap.discrepancies = vec![GlucoseChange::new(end - Duration::minutes(5), end, 2.0)];
    let out = engine(DosingStrategy::TempBasalOnly)
        .recommend_at(&snap, t0())
        .unwrap();

    assert_eq!(out.retrospective_correction.total_glucose_correction_effect, None);
    assert_eq!(out.warnings, vec![LoopWarning::RetrospectiveCorrectionStale]);
}

#[test]
fn unsorted_glucose_is_rejected() {
    let mut glucose = flat(110.0);
    glucose.swap(0, 3);
    let err = engine(DosingStrategy::TempBasalOnly)
        .recommend_at(&snapshot(glucose), t0())
        .unwrap_err();
    match err.downcast_ref::<DoseMathError>() {
        Some(DoseMathError::Input(msg)) => assert!(msg.contains("sorted")),
        other => panic!("expected input error, got: {other:?}"),
    }
}

#[test]
fn evaluation_time_comes_from_snapshot_then_clock() {
    let clocked = DoseEngine::builder()
        .with_basal_rates(BasalRateSchedule::constant(1.0))
        .with_sensitivity(InsulinSensitivitySchedule::constant(50.0))
        .with_target(GlucoseRangeSchedule::constant(GlucoseRange::new(100.0, 120.0)).unwrap())
        .with_clock(Box::new(FixedClock::new(t0() + Duration::minutes(5))))
        .build()
        .unwrap();

    let mut snap = snapshot(flat(110.0));
    assert_eq!(clocked.recommend(&snap).unwrap().at, t0() + Duration::minutes(5));
    snap.at = Some(t0());
    assert_eq!(clocked.recommend(&snap).unwrap().at, t0());
}

#[test]
fn snapshot_json_defaults_optional_fields() {
    let snap: LoopSnapshot = serde_json::from_str(
        r#"{
            "glucose": [
                {"date": "2015-07-13T11:55:00Z", "quantity": 110},
                {"date": "2015-07-13T12:00:00Z", "quantity": 112}
            ],
            "last_temp_basal": {
                "type": "temp_basal",
                "start_date": "2015-07-13T11:50:00Z",
                "end_date": "2015-07-13T12:20:00Z",
                "value": 1.5,
                "unit": "U/hour"
            }
        }"#,
    )
    .unwrap();
    assert_eq!(snap.glucose.len(), 2);
    assert!(snap.doses.is_empty());
    assert_eq!(snap.pending_insulin, 0.0);
    assert!(!snap.basal_rate_schedule_override_active);
    assert!(snap.last_temp_basal.unwrap().is_active_temp_basal(t0()));
}

#[test]
fn output_serializes_tagged_actions() {
    let out = engine(DosingStrategy::TempBasalOnly)
        .recommend_at(&snapshot(flat(250.0)), t0())
        .unwrap();
    let v = serde_json::to_value(&out).unwrap();

    assert_eq!(v["temp_basal"]["action"], "adjust");
    assert_eq!(v["temp_basal"]["units_per_hour"], 3.0);
    assert_eq!(v["temp_basal"]["duration"], 30.0);
    assert_eq!(v["retrospective_correction"]["status"], "not_computed");
    assert!(v["forecast"].as_array().unwrap().len() > 70);
    assert_eq!(v["forecast"][0]["date"], "2015-07-13T12:00:00Z");
}
