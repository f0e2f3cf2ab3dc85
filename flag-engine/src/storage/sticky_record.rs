use serde::{Deserialize, Serialize};

use crate::api::errors::FlagError;
use crate::settings::settings_models::{CampaignId, GroupId, VariationId, MEG_META_KEY_PREFIX};

/// Variation id stored in a MEG meta record when the winner is an AB campaign.
pub const MEG_NO_VARIATION: VariationId = -1;

/// A persisted decision for one feature and one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyRecord {
    pub feature_key: String,
    pub user_id: String,
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

impl StickyRecord {
    pub fn new(feature_key: &str, user_id: &str) -> Self {
        StickyRecord {
            feature_key: feature_key.to_string(),
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_rollout(mut self, id: CampaignId, key: &str, variation_id: VariationId) -> Self {
        self.rollout_id = Some(id);
        self.rollout_key = Some(key.to_string());
        self.rollout_variation_id = Some(variation_id);
        self
    }

    pub fn with_experiment(mut self, id: CampaignId, key: &str, variation_id: VariationId) -> Self {
        self.experiment_id = Some(id);
        self.experiment_key = Some(key.to_string());
        self.experiment_variation_id = Some(variation_id);
        self
    }

    /// Record naming the winner of a mutually exclusive group for a user.
    pub fn meg_winner(
        group_id: GroupId,
        user_id: &str,
        campaign_id: CampaignId,
        campaign_key: &str,
        variation_id: Option<VariationId>,
    ) -> Self {
        StickyRecord::new(&meg_meta_key(group_id), user_id).with_experiment(
            campaign_id,
            campaign_key,
            variation_id.unwrap_or(MEG_NO_VARIATION),
        )
    }

    pub fn has_rollout(&self) -> bool {
        self.rollout_key.is_some() && self.rollout_variation_id.is_some()
    }

    pub fn has_experiment(&self) -> bool {
        self.experiment_key.is_some() && self.experiment_variation_id.is_some()
    }

    /// The group member identifier stored in a MEG meta record:
    /// `"campaignId"` or `"campaignId_variationId"`.
    pub fn meg_identifier(&self) -> Option<String> {
        let campaign_id = self.experiment_id?;
        match self.experiment_variation_id {
            Some(variation_id) if variation_id != MEG_NO_VARIATION => {
                Some(format!("{}_{}", campaign_id, variation_id))
            }
            _ => Some(campaign_id.to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), FlagError> {
        if self.feature_key.trim().is_empty() {
            return Err(FlagError::InputValidationError(
                "sticky record is missing a feature key".to_string(),
            ));
        }
        if self.user_id.trim().is_empty() {
            return Err(FlagError::InputValidationError(
                "sticky record is missing a user id".to_string(),
            ));
        }
        if self.rollout_key.is_some() != self.rollout_variation_id.is_some() {
            return Err(FlagError::InputValidationError(
                "rollout key and rollout variation id must be stored together".to_string(),
            ));
        }
        if self.experiment_key.is_some() != self.experiment_variation_id.is_some() {
            return Err(FlagError::InputValidationError(
                "experiment key and experiment variation id must be stored together".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn meg_meta_key(group_id: GroupId) -> String {
    format!("{}{}", MEG_META_KEY_PREFIX, group_id)
}
