use tracing::info;

use crate::context::UserContext;
use crate::events::{DecisionEvent, EventSink};
use crate::settings::settings_models::{CampaignId, VariationId};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit_variation_shown(&self, _: CampaignId, _: VariationId, _: &UserContext) {}

    fn emit_decision(&self, _: &DecisionEvent) {}
}

/// Logs every event at info level under the `flag_engine::events` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit_variation_shown(
        &self,
        campaign_id: CampaignId,
        variation_id: VariationId,
        context: &UserContext,
    ) {
        info!(
            target: "flag_engine::events",
            campaign_id,
            variation_id,
            user_id = %context.id,
            "variation shown"
        );
    }

    fn emit_decision(&self, event: &DecisionEvent) {
        info!(
            target: "flag_engine::events",
            feature_key = %event.feature_key,
            user_id = %event.user_id,
            is_enabled = event.is_enabled,
            reason = %event.reason,
            rollout_key = event.rollout_key.as_deref(),
            experiment_key = event.experiment_key.as_deref(),
            experiment_variation_id = event.experiment_variation_id,
            "flag decision"
        );
    }
}
