pub mod sinks;

use serde::{Deserialize, Serialize};

use crate::api::types::FlagDecisionReason;
use crate::context::UserContext;
use crate::settings::settings_models::{CampaignId, FeatureId, VariationId};

pub use sinks::{NoopEventSink, TracingEventSink};

/// Receives evaluation side effects. Implementations must not block; a slow
/// or failing sink never changes the returned result.
pub trait EventSink: Send + Sync {
    fn emit_variation_shown(
        &self,
        campaign_id: CampaignId,
        variation_id: VariationId,
        context: &UserContext,
    );

    fn emit_decision(&self, event: &DecisionEvent);
}

/// Summary of one flag evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionEvent {
    pub feature_id: FeatureId,
    pub feature_key: String,
    pub user_id: String,
    pub is_enabled: bool,
    pub reason: FlagDecisionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_id: Option<CampaignId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_variation_id: Option<VariationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<CampaignId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_variation_id: Option<VariationId>,
}
