use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::context::user_id::user_list_id;
use crate::context::UserContext;
use crate::events::EventSink;
use crate::segmentation::list_membership::ListMembership;
use crate::segmentation::segment_matching::{
    FeatureStateLookup, SegmentEvaluator, VWO_USER_ID_PROPERTY,
};
use crate::segmentation::segment_models::Segments;
use crate::settings::settings_models::{
    Campaign, CampaignId, FeatureId, GroupId, Settings, VariationId,
};
use crate::storage::StickyStore;

/// Everything one evaluation reads. Borrowed for the duration of a single
/// call and never shared across calls.
pub struct EvaluationContext<'a> {
    pub settings: &'a Settings,
    pub user: &'a UserContext,
    pub store: StickyStore<'a>,
    pub lists: &'a dyn ListMembership,
    pub events: &'a dyn EventSink,
}

/// The rollout rule a feature passed during this call (or had stored).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutDecision {
    pub campaign_id: CampaignId,
    pub campaign_key: String,
    pub variation_id: VariationId,
}

/// Scratch memoization for one call: rollout gates per feature and
/// winners per mutually exclusive group.
#[derive(Debug, Default)]
pub struct EvaluationState {
    evaluated_features: HashMap<String, Option<RolloutDecision>>,
    meg_group_winners: HashMap<GroupId, Option<String>>,
}

impl EvaluationState {
    pub fn record_rollout(&mut self, feature_key: &str, decision: Option<RolloutDecision>) {
        self.evaluated_features
            .insert(feature_key.to_string(), decision);
    }

    /// `Some(true)` if the feature's rollout passed this call, `Some(false)`
    /// if it was evaluated and failed, `None` if not evaluated yet.
    pub fn rollout_passed(&self, feature_key: &str) -> Option<bool> {
        self.evaluated_features
            .get(feature_key)
            .map(Option::is_some)
    }

    pub fn rollout_decision(&self, feature_key: &str) -> Option<&RolloutDecision> {
        self.evaluated_features.get(feature_key)?.as_ref()
    }

    /// The memoized winner of a group: `Some(None)` means the group was
    /// resolved this call without a winner.
    pub fn meg_winner(&self, group_id: GroupId) -> Option<Option<&str>> {
        self.meg_group_winners
            .get(&group_id)
            .map(|winner| winner.as_deref())
    }

    pub fn set_meg_winner(&mut self, group_id: GroupId, winner: Option<String>) {
        self.meg_group_winners.insert(group_id, winner);
    }
}

impl<'a> EvaluationContext<'a> {
    /// Custom variables (or variation-targeting variables) of the user with
    /// the campaign's view of the user id injected.
    pub fn properties_for(&self, campaign: &Campaign, targeting: bool) -> HashMap<String, Value> {
        let source = if targeting {
            &self.user.variation_targeting_variables
        } else {
            &self.user.custom_variables
        };
        let mut properties = source.clone();
        let user_id = if campaign.is_user_list_enabled {
            user_list_id(self.settings.account_id, &self.user.id)
        } else {
            self.user.id.clone()
        };
        properties.insert(VWO_USER_ID_PROPERTY.to_string(), Value::String(user_id));
        properties
    }

    pub fn segments_match(&self, segments: &Segments, properties: &HashMap<String, Value>) -> bool {
        SegmentEvaluator::new(properties, self.user, self.lists)
            .with_feature_lookup(self)
            .matches(segments)
    }

    /// Pre-segmentation of a rule: single-variation campaigns carry their
    /// segments on the variation, AB campaigns on the campaign.
    pub fn pre_segmentation_passes(&self, campaign: &Campaign) -> bool {
        let segments = if campaign.is_rollout_or_personalize() {
            campaign.variations.first().and_then(|v| v.segments.as_ref())
        } else {
            campaign.segments.as_ref()
        };
        match segments {
            None => {
                debug!(campaign_id = campaign.id, "no segments on rule, passing pre-segmentation");
                true
            }
            Some(segments) if segments.is_empty() => {
                debug!(
                    campaign_id = campaign.id,
                    "empty segments on rule, passing pre-segmentation"
                );
                true
            }
            Some(segments) => {
                let properties = self.properties_for(campaign, false);
                let passed = self.segments_match(segments, &properties);
                debug!(
                    campaign_id = campaign.id,
                    user_id = %self.user.id,
                    passed,
                    "evaluated pre-segmentation"
                );
                passed
            }
        }
    }
}

impl FeatureStateLookup for EvaluationContext<'_> {
    fn has_stored_decision(&self, feature_id: FeatureId) -> bool {
        self.settings
            .feature_by_id(feature_id)
            .is_some_and(|feature| self.store.get(&feature.key, &self.user.id).is_some())
    }
}
