#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Closed-loop insulin dose math.
//!
//! This crate turns recent glucose, insulin and carbohydrate history into a
//! glucose forecast and, from that forecast, into temp basal, automatic bolus
//! and manual bolus recommendations. Everything is pure and synchronous: the
//! caller supplies the evaluation time and all history.
//!
//! ## Architecture
//!
//! - **Schedules**: daily repeating basal, sensitivity, carb ratio and target range (`schedule`)
//! - **Effects**: insulin (`insulin`), carbohydrate (`carbs`) and momentum (`glucose`) timelines
//! - **Retrospective correction**: standard and integral strategies (`retrospective`)
//! - **Forecast**: effect summation onto the latest glucose (`forecast`)
//! - **Dose math**: correction classification and the three recommenders (`dose_math`)
//! - **Engine**: one loop iteration over a `LoopSnapshot` (`engine`, `builder`)
//!
//! ## Units
//!
//! Glucose is mg/dL throughout, insulin is U and rates are U/h. Settings in
//! mmol/L are converted once when the engine is built (`conversions`).
//!
//! Physiological edge cases (no data, stale data, low glucose) are never
//! errors; they produce `None`, `NoChange` or a zero dose with a notice.
//! Only malformed configuration or input is rejected with an error.

pub mod builder;
pub mod carbs;
pub mod config;
pub mod conversions;
pub mod dose_math;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod glucose;
pub mod insulin;
pub mod retrospective;
pub mod schedule;
pub mod util;

pub use builder::{DoseEngineBuilder, Missing, Set};
pub use config::{CorrectionCfg, CorrectionKind, DosingCfg, DosingLimits, DosingStrategy};
pub use dose_math::{
    AutomaticDoseRecommendation, BolusRecommendation, BolusRecommendationNotice, DosingContext,
    InsulinCorrection, TempBasalAction, TempBasalRecommendation, TempBasalSettings,
    insulin_correction, recommended_automatic_dose, recommended_manual_bolus,
    recommended_temp_basal,
};
pub use engine::{DoseEngine, LoopOutput, LoopSnapshot, LoopWarning};
pub use error::{BuildError, DoseMathError, Result, ScheduleError};
pub use forecast::{Forecast, predict_glucose};
pub use glucose::{GlucoseChange, GlucoseEffect, GlucoseValue};
pub use insulin::{
    DoseEntry, DoseType, DoseUnit, ExponentialInsulinModel, InsulinModelKind, LinearInsulinModel,
    WalshInsulinModel,
};
pub use retrospective::{
    CorrectionContext, CorrectionDiagnostics, CorrectionOutput, CorrectionStatus,
    IntegralCorrectionCfg, IntegralRetrospectiveCorrection, RetrospectiveCorrection,
    StandardRetrospectiveCorrection,
};
pub use dosemath_traits::{InsulinModel, Rounder, StrokeRounder};
pub use schedule::{
    BasalRateSchedule, CarbRatioSchedule, DailyValueSchedule, GlucoseRange, GlucoseRangeSchedule,
    InsulinSensitivitySchedule, RangeOverride, RepeatingScheduleValue,
};
