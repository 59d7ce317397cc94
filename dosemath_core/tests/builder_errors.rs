use chrono::Duration;
use dosemath_core::error::BuildError;
use dosemath_core::{
    BasalRateSchedule, CorrectionCfg, DoseEngine, DosingCfg, DosingLimits, GlucoseRange,
    GlucoseRangeSchedule, InsulinSensitivitySchedule,
};
use rstest::rstest;

fn target() -> GlucoseRangeSchedule {
    GlucoseRangeSchedule::constant(GlucoseRange::new(100.0, 120.0)).unwrap()
}

#[rstest]
fn builder_missing_basal_yields_typed_build_error() {
    let err = DoseEngine::builder()
        // missing with_basal_rates()
        .with_sensitivity(InsulinSensitivitySchedule::constant(50.0))
        .with_target(target())
        .try_build()
        .expect_err("should fail with MissingBasalSchedule");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingBasalSchedule) => {}
        other => panic!("expected MissingBasalSchedule, got: {other:?}"),
    }
}

#[rstest]
fn builder_missing_target_yields_typed_build_error() {
    let err = DoseEngine::builder()
        .with_basal_rates(BasalRateSchedule::constant(1.0))
        .with_sensitivity(InsulinSensitivitySchedule::constant(50.0))
        .try_build()
        .expect_err("should fail with MissingTargetSchedule");

    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingTargetSchedule)
    ));
}

fn build_with(limits: DosingLimits, dosing: DosingCfg, correction: CorrectionCfg) -> eyre::Report {
    DoseEngine::builder()
        .with_basal_rates(BasalRateSchedule::constant(1.0))
        .with_sensitivity(InsulinSensitivitySchedule::constant(50.0))
        .with_target(target())
        .with_limits(limits)
        .with_dosing(dosing)
        .with_correction(correction)
        .build()
        .expect_err("should reject configuration")
}

#[rstest]
#[case::negative_max_basal(
    DosingLimits { max_basal_rate_per_hour: -1.0, ..DosingLimits::default() },
    DosingCfg::default(),
    CorrectionCfg::default(),
    "max_basal_rate_per_hour"
)]
#[case::automatic_above_manual(
    DosingLimits { max_bolus: 2.0, max_automatic_bolus: 3.0, ..DosingLimits::default() },
    DosingCfg::default(),
    CorrectionCfg::default(),
    "max_automatic_bolus"
)]
#[case::zero_suspend_threshold(
    DosingLimits { suspend_threshold: Some(0.0), ..DosingLimits::default() },
    DosingCfg::default(),
    CorrectionCfg::default(),
    "suspend_threshold"
)]
#[case::partial_factor_above_one(
    DosingLimits::default(),
    DosingCfg { partial_application_factor: 1.5, ..DosingCfg::default() },
    CorrectionCfg::default(),
    "partial_application_factor"
)]
#[case::zero_temp_duration(
    DosingLimits::default(),
    DosingCfg { temp_basal_duration: Duration::zero(), ..DosingCfg::default() },
    CorrectionCfg::default(),
    "temp_basal_duration"
)]
#[case::zero_grouping(
    DosingLimits::default(),
    DosingCfg::default(),
    CorrectionCfg { grouping_interval: Duration::zero(), ..CorrectionCfg::default() },
    "grouping_interval"
)]
fn invalid_config_is_rejected(
    #[case] limits: DosingLimits,
    #[case] dosing: DosingCfg,
    #[case] correction: CorrectionCfg,
    #[case] field: &str,
) {
    let err = build_with(limits, dosing, correction);
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::InvalidConfig(msg)) => assert!(msg.contains(field), "{msg}"),
        other => panic!("expected InvalidConfig, got: {other:?}"),
    }
}
