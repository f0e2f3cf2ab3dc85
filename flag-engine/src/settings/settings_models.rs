use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum::Display;

use crate::bucketing::allocation::BucketRange;
use crate::segmentation::segment_models::Segments;

pub type AccountId = i64;
pub type FeatureId = i64;
pub type CampaignId = i64;
pub type VariationId = i64;
pub type GroupId = i64;

/// Prefix of the synthetic feature key under which a MEG winner is stored.
pub const MEG_META_KEY_PREFIX: &str = "_vwo_meta_meg_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum CampaignType {
    #[serde(rename = "FLAG_ROLLOUT", alias = "ROLLOUT")]
    Rollout,
    #[serde(rename = "FLAG_PERSONALIZE", alias = "PERSONALIZE")]
    Personalize,
    #[serde(rename = "FLAG_TESTING", alias = "AB")]
    AB,
}

impl CampaignType {
    /// Rollout and personalize campaigns hold exactly one variation and are
    /// decided by membership alone.
    pub fn is_single_variation(&self) -> bool {
        matches!(self, CampaignType::Rollout | CampaignType::Personalize)
    }

    pub fn is_experiment(&self) -> bool {
        matches!(self, CampaignType::AB | CampaignType::Personalize)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Variable {
    pub id: i64,
    pub key: String,
    #[serde(rename = "type", default)]
    pub variable_type: Option<String>,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: VariationId,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub segments: Option<Segments>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Assigned once when settings are processed.
    #[serde(skip)]
    pub range: BucketRange,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: CampaignId,
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: CampaignType,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub percent_traffic: f64,
    #[serde(default)]
    pub segments: Option<Segments>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub is_forced_variation_enabled: bool,
    #[serde(default)]
    pub is_user_list_enabled: bool,
    /// Set on the copies linked into a feature's rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub campaign_id: CampaignId,
    #[serde(rename = "type")]
    pub rule_type: CampaignType,
    #[serde(default)]
    pub rule_key: Option<String>,
    #[serde(default)]
    pub variation_id: Option<VariationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactCampaign {
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    #[serde(rename = "type", default)]
    pub campaign_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: FeatureId,
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub impact_campaign: Option<ImpactCampaign>,
    /// Rules joined with their campaigns, in rule order.
    #[serde(default, skip_deserializing)]
    pub linked_campaigns: Vec<Campaign>,
    #[serde(default, skip_deserializing)]
    pub is_gateway_service_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, Display)]
#[serde(from = "u8", into = "u8")]
#[strum(serialize_all = "snake_case")]
pub enum MegAlgorithm {
    #[default]
    Random,
    Advanced,
}

impl From<u8> for MegAlgorithm {
    fn from(value: u8) -> Self {
        match value {
            2 => MegAlgorithm::Advanced,
            _ => MegAlgorithm::Random,
        }
    }
}

impl From<MegAlgorithm> for u8 {
    fn from(value: MegAlgorithm) -> Self {
        match value {
            MegAlgorithm::Random => 1,
            MegAlgorithm::Advanced => 2,
        }
    }
}

/// A mutually exclusive group. Member identifiers are either `"campaignId"`
/// or `"campaignId_variationId"` and are kept exactly as delivered.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Group {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "identifier_list")]
    pub campaigns: Vec<String>,
    #[serde(rename = "et", default)]
    pub algorithm: MegAlgorithm,
    #[serde(rename = "p", default, deserialize_with = "identifier_list")]
    pub priority: Vec<String>,
    #[serde(rename = "wt", default)]
    pub weights: HashMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub account_id: AccountId,
    #[serde(default)]
    pub sdk_key: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub groups: HashMap<GroupId, Group>,
    #[serde(default)]
    pub campaign_groups: HashMap<String, GroupId>,
}

// Group members arrive as a mix of numbers and strings.
fn identifier_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    values
        .unwrap_or_default()
        .into_iter()
        .map(|value| match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "expected a campaign identifier, got {}",
                other
            ))),
        })
        .collect()
}
