use chrono::Duration;

use super::{
    CorrectionContext, CorrectionDiagnostics, CorrectionOutput, CorrectionStatus,
    RetrospectiveCorrection,
};
use crate::glucose::decay_effect;

/// Projects the most recent discrepancy forward as a linearly decaying effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardRetrospectiveCorrection {
    effect_duration: Duration,
}

impl StandardRetrospectiveCorrection {
    pub fn new(effect_duration: Duration) -> Self {
        Self { effect_duration }
    }
}

impl Default for StandardRetrospectiveCorrection {
    fn default() -> Self {
        Self::new(Duration::minutes(60))
    }
}

impl RetrospectiveCorrection for StandardRetrospectiveCorrection {
    fn effect_duration(&self) -> Duration {
        self.effect_duration
    }

    fn compute_effect(&self, ctx: &CorrectionContext<'_>) -> CorrectionOutput {
        let Some(current) = ctx.current_discrepancy() else {
            tracing::debug!("no recent discrepancy; retrospective correction skipped");
            return CorrectionOutput::empty();
        };

        let total = current.quantity;
        let velocity = ctx.velocity(current, total);
        tracing::debug!(total, velocity, "standard retrospective correction");

        CorrectionOutput {
            effects: decay_effect(ctx.starting_glucose.start_date, velocity, self.effect_duration),
            diagnostics: CorrectionDiagnostics {
                total_glucose_correction_effect: Some(total),
                status: CorrectionStatus::Computed,
                integral: None,
            },
        }
    }
}
