use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::settings::settings_models::{
    Campaign, CampaignId, CampaignType, Variable, Variation, VariationId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FlagDecisionReason {
    FeatureNotFound,
    StoredExperiment,
    StoredRollout,
    RolloutMatched,
    ExperimentMatched,
    Whitelisted,
    NoRuleMatched,
    InvalidContext,
    Error,
}

/// The campaign and variation a user landed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecidedVariation {
    pub campaign_id: CampaignId,
    pub campaign_key: String,
    pub campaign_type: CampaignType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_key: Option<String>,
    pub id: VariationId,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DecidedVariation {
    pub fn new(campaign: &Campaign, variation: &Variation) -> Self {
        DecidedVariation {
            campaign_id: campaign.id,
            campaign_key: campaign.key.clone(),
            campaign_type: campaign.campaign_type,
            rule_key: campaign.rule_key.clone(),
            id: variation.id,
            key: variation.key.clone(),
            name: variation.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagResult {
    pub feature_key: String,
    pub is_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<DecidedVariation>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    pub reason: FlagDecisionReason,
}

impl FlagResult {
    pub fn disabled(feature_key: &str, reason: FlagDecisionReason) -> Self {
        FlagResult {
            feature_key: feature_key.to_string(),
            is_enabled: false,
            variation: None,
            variables: Vec::new(),
            reason,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn variation(&self) -> Option<&DecidedVariation> {
        self.variation.as_ref()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Value of the variable `key`, or `default` when the flag carries no such variable.
    pub fn get_variable(&self, key: &str, default: Value) -> Value {
        self.variables
            .iter()
            .find(|variable| variable.key == key)
            .map(|variable| variable.value.clone())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_reason_round_trips_through_strings() {
        assert_eq!(FlagDecisionReason::StoredExperiment.to_string(), "stored_experiment");
        assert_eq!(
            FlagDecisionReason::from_str("no_rule_matched").unwrap(),
            FlagDecisionReason::NoRuleMatched
        );
        assert_eq!(
            serde_json::to_value(FlagDecisionReason::FeatureNotFound).unwrap(),
            json!("feature_not_found")
        );
    }

    #[test]
    fn test_get_variable() {
        let mut result = FlagResult::disabled("checkout", FlagDecisionReason::RolloutMatched);
        result.is_enabled = true;
        result.variables = vec![Variable {
            id: 1,
            key: "color".to_string(),
            variable_type: Some("string".to_string()),
            value: json!("blue"),
        }];

        assert_eq!(result.get_variable("color", json!("red")), json!("blue"));
        assert_eq!(result.get_variable("size", json!(10)), json!(10));
    }

    #[test]
    fn test_disabled_result_shape() {
        let result = FlagResult::disabled("checkout", FlagDecisionReason::FeatureNotFound);
        assert!(!result.is_enabled());
        assert!(result.variation().is_none());
        assert_json_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "featureKey": "checkout",
                "isEnabled": false,
                "variables": [],
                "reason": "feature_not_found"
            })
        );
    }
}
