use serde_json::Value;
use tracing::{debug, warn};

use crate::api::errors::FlagError;
use crate::bucketing::allocation::allocate_campaign;
use crate::metrics::consts::SETTINGS_RULES_DROPPED_COUNTER;
use crate::metrics::utils::inc;
use crate::settings::settings_models::{
    Campaign, CampaignId, CampaignType, Feature, FeatureId, Group, GroupId, Rule, Settings,
    Variation, VariationId,
};

impl Settings {
    /// Parses, validates and processes a settings document into an immutable snapshot.
    pub fn from_json(raw: &str) -> Result<Settings, FlagError> {
        let settings: Settings = serde_json::from_str(raw)?;
        settings.process()
    }

    pub fn from_value(value: Value) -> Result<Settings, FlagError> {
        let settings: Settings = serde_json::from_value(value)?;
        settings.process()
    }

    fn process(mut self) -> Result<Settings, FlagError> {
        self.validate()?;

        for campaign in self.campaigns.iter_mut() {
            allocate_campaign(campaign);
        }

        let campaigns = &self.campaigns;
        for feature in self.features.iter_mut() {
            link_campaigns(feature, campaigns);
        }

        debug!(
            account_id = self.account_id,
            features = self.features.len(),
            campaigns = self.campaigns.len(),
            groups = self.groups.len(),
            "processed settings"
        );
        Ok(self)
    }

    fn validate(&self) -> Result<(), FlagError> {
        if self.account_id <= 0 {
            return Err(FlagError::ConfigurationError(format!(
                "accountId must be positive, got {}",
                self.account_id
            )));
        }
        if let Some(feature) = self.features.iter().find(|f| f.key.trim().is_empty()) {
            return Err(FlagError::ConfigurationError(format!(
                "feature {} has an empty key",
                feature.id
            )));
        }
        for (campaign, group_id) in &self.campaign_groups {
            if !self.groups.contains_key(group_id) {
                return Err(FlagError::ConfigurationError(format!(
                    "campaign {} references unknown group {}",
                    campaign, group_id
                )));
            }
        }
        Ok(())
    }

    pub fn feature_by_key(&self, feature_key: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.key == feature_key)
    }

    pub fn feature_by_id(&self, feature_id: FeatureId) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == feature_id)
    }

    pub fn campaign_by_id(&self, campaign_id: CampaignId) -> Option<&Campaign> {
        self.campaigns.iter().find(|c| c.id == campaign_id)
    }

    pub fn campaign_by_key(&self, campaign_key: &str) -> Option<&Campaign> {
        self.campaigns.iter().find(|c| c.key == campaign_key)
    }

    /// The group a (linked) campaign belongs to, looked up by its member
    /// identifier first and by its plain id second.
    pub fn group_of(&self, campaign: &Campaign) -> Option<(GroupId, &Group)> {
        let group_id = self
            .campaign_groups
            .get(&campaign.meg_identifier())
            .or_else(|| self.campaign_groups.get(&campaign.id.to_string()))?;
        self.groups.get(group_id).map(|group| (*group_id, group))
    }

    /// Keys of every feature with a rule on a campaign of `group_id`, in feature order.
    pub fn feature_keys_in_group(&self, group_id: GroupId) -> Vec<&str> {
        let Some(group) = self.groups.get(&group_id) else {
            return Vec::new();
        };
        let members: Vec<(CampaignId, Option<VariationId>)> = group
            .campaigns
            .iter()
            .filter_map(|identifier| parse_member_identifier(identifier))
            .collect();

        self.features
            .iter()
            .filter(|feature| {
                feature.rules.iter().any(|rule| {
                    members.iter().any(|(campaign_id, variation_id)| {
                        rule.campaign_id == *campaign_id
                            && (variation_id.is_none() || rule.variation_id == *variation_id)
                    })
                })
            })
            .map(|feature| feature.key.as_str())
            .collect()
    }
}

impl Campaign {
    /// Identifier used in group membership: `"id_variationId"` for a linked
    /// personalize rule, `"id"` otherwise.
    pub fn meg_identifier(&self) -> String {
        match (self.campaign_type, self.variations.as_slice()) {
            (CampaignType::Personalize, [only]) => format!("{}_{}", self.id, only.id),
            _ => self.id.to_string(),
        }
    }

    pub fn is_rollout_or_personalize(&self) -> bool {
        self.campaign_type.is_single_variation()
    }

    pub fn variation_by_id(&self, variation_id: VariationId) -> Option<&Variation> {
        self.variations.iter().find(|v| v.id == variation_id)
    }
}

impl Feature {
    pub fn rollout_rules(&self) -> impl Iterator<Item = &Campaign> {
        self.linked_campaigns
            .iter()
            .filter(|c| c.campaign_type == CampaignType::Rollout)
    }

    pub fn experiment_rules(&self) -> impl Iterator<Item = &Campaign> {
        self.linked_campaigns
            .iter()
            .filter(|c| c.campaign_type.is_experiment())
    }

    pub fn has_rollout_rules(&self) -> bool {
        self.rollout_rules().next().is_some()
    }

}

/// Splits `"34"` or `"34_2"` into a campaign id and optional variation id.
pub fn parse_member_identifier(identifier: &str) -> Option<(CampaignId, Option<VariationId>)> {
    match identifier.trim().split_once('_') {
        Some((campaign, variation)) => {
            Some((campaign.parse().ok()?, Some(variation.parse().ok()?)))
        }
        None => Some((identifier.trim().parse().ok()?, None)),
    }
}

fn link_campaigns(feature: &mut Feature, campaigns: &[Campaign]) {
    let mut kept_rules = Vec::with_capacity(feature.rules.len());
    let mut linked = Vec::with_capacity(feature.rules.len());

    for rule in feature.rules.drain(..) {
        match link_rule(&rule, campaigns) {
            Some(campaign) => {
                linked.push(campaign);
                kept_rules.push(rule);
            }
            None => {
                warn!(
                    feature_key = %feature.key,
                    campaign_id = rule.campaign_id,
                    variation_id = rule.variation_id,
                    "dropping rule that references a missing campaign or variation"
                );
                inc(SETTINGS_RULES_DROPPED_COUNTER, &[], 1);
            }
        }
    }

    feature.is_gateway_service_required = linked.iter().any(|campaign| {
        campaign.segments.as_ref().is_some_and(|s| s.requires_enrichment())
            || campaign
                .variations
                .iter()
                .any(|v| v.segments.as_ref().is_some_and(|s| s.requires_enrichment()))
    });
    feature.rules = kept_rules;
    feature.linked_campaigns = linked;
}

fn link_rule(rule: &Rule, campaigns: &[Campaign]) -> Option<Campaign> {
    let mut campaign = campaigns.iter().find(|c| c.id == rule.campaign_id)?.clone();
    campaign.rule_key = rule.rule_key.clone().or_else(|| Some(campaign.key.clone()));
    if let Some(variation_id) = rule.variation_id {
        campaign.variations.retain(|v| v.id == variation_id);
        if campaign.variations.is_empty() {
            return None;
        }
    }
    Some(campaign)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucketing::allocation::BucketRange;
    use crate::settings::settings_models::MegAlgorithm;
    use serde_json::json;

    fn settings_json() -> Value {
        json!({
            "accountId": 123456,
            "sdkKey": "sdk-key",
            "version": 3,
            "features": [
                {
                    "id": 1,
                    "key": "checkout",
                    "rules": [
                        {"campaignId": 10, "type": "FLAG_ROLLOUT", "ruleKey": "rollout_1"},
                        {"campaignId": 11, "type": "FLAG_TESTING", "ruleKey": "ab_1"},
                        {"campaignId": 99, "type": "FLAG_TESTING"},
                        {
                            "campaignId": 12,
                            "type": "FLAG_PERSONALIZE",
                            "ruleKey": "p_1",
                            "variationId": 3
                        }
                    ],
                    "impactCampaign": {"campaignId": 50}
                },
                {
                    "id": 2,
                    "key": "search",
                    "rules": [{"campaignId": 13, "type": "FLAG_TESTING"}]
                }
            ],
            "campaigns": [
                {"id": 10, "key": "checkout_rollout", "type": "FLAG_ROLLOUT", "segments": {},
                 "variations": [{"id": 1, "key": "rollout-v", "weight": 50}]},
                {"id": 11, "key": "checkout_ab", "type": "FLAG_TESTING", "percentTraffic": 100,
                 "segments": {"or": [{"country": "US"}]},
                 "variations": [
                     {"id": 1, "key": "control", "weight": 50},
                     {"id": 2, "key": "variation", "weight": 50}
                 ]},
                {"id": 12, "key": "checkout_p", "type": "FLAG_PERSONALIZE",
                 "variations": [
                     {"id": 2, "key": "p-2", "weight": 100},
                     {"id": 3, "key": "p-3", "weight": 40}
                 ]},
                {"id": 13, "key": "search_ab", "type": "FLAG_TESTING", "percentTraffic": 50,
                 "variations": [{"id": 1, "key": "control", "weight": 100}]}
            ],
            "groups": {"5": {"name": "g", "campaigns": ["11", "12_3", "13"], "et": 2, "p": ["13"]}},
            "campaignGroups": {"11": 5, "12_3": 5, "13": 5}
        })
    }

    #[test]
    fn test_process_links_rules_and_allocates_ranges() {
        let settings = Settings::from_value(settings_json()).unwrap();
        let feature = settings.feature_by_key("checkout").unwrap();

        assert_eq!(feature.rules.len(), 3, "rule on missing campaign is dropped");
        assert_eq!(feature.linked_campaigns.len(), 3);
        assert!(feature.is_gateway_service_required);
        assert!(feature.has_rollout_rules());

        let rollout: Vec<_> = feature.rollout_rules().collect();
        assert_eq!(rollout[0].rule_key.as_deref(), Some("rollout_1"));
        assert_eq!(rollout[0].variations[0].range, BucketRange { start: 1, end: 5000 });

        let experiments: Vec<_> = feature.experiment_rules().collect();
        assert_eq!(experiments.len(), 2);
        assert_eq!(experiments[0].variations[1].range, BucketRange { start: 5001, end: 10_000 });

        let personalize = experiments[1];
        assert_eq!(personalize.variations.len(), 1);
        assert_eq!(personalize.variations[0].id, 3);
        assert_eq!(personalize.variations[0].range, BucketRange { start: 1, end: 4000 });
        assert_eq!(personalize.meg_identifier(), "12_3");

        let search = settings.feature_by_key("search").unwrap();
        assert!(!search.is_gateway_service_required);
        assert_eq!(search.linked_campaigns[0].rule_key.as_deref(), Some("search_ab"));
    }

    #[test]
    fn test_lookups() {
        let settings = Settings::from_value(settings_json()).unwrap();
        assert_eq!(settings.feature_by_id(2).map(|f| f.key.as_str()), Some("search"));
        assert!(settings.feature_by_key("missing").is_none());
        assert_eq!(settings.campaign_by_key("search_ab").map(|c| c.id), Some(13));

        let checkout = settings.feature_by_key("checkout").unwrap();
        let personalize = checkout.experiment_rules().nth(1).unwrap();
        let (group_id, group) = settings.group_of(personalize).unwrap();
        assert_eq!(group_id, 5);
        assert_eq!(group.algorithm, MegAlgorithm::Advanced);
        assert!(settings.group_of(checkout.rollout_rules().next().unwrap()).is_none());

        assert_eq!(settings.feature_keys_in_group(5), vec!["checkout", "search"]);
        assert!(settings.feature_keys_in_group(6).is_empty());
    }

    #[test]
    fn test_parse_member_identifier() {
        assert_eq!(parse_member_identifier("34"), Some((34, None)));
        assert_eq!(parse_member_identifier("34_2"), Some((34, Some(2))));
        assert_eq!(parse_member_identifier("abc"), None);
        assert_eq!(parse_member_identifier("34_x"), None);
    }

    #[test]
    fn test_validation_errors() {
        let mut missing_group = settings_json();
        missing_group["campaignGroups"]["13"] = json!(8);
        match Settings::from_value(missing_group) {
            Err(FlagError::ConfigurationError(msg)) => assert!(msg.contains("unknown group 8")),
            other => panic!("Expected ConfigurationError, got {:?}", other),
        }

        let mut empty_key = settings_json();
        empty_key["features"][1]["key"] = json!("  ");
        assert!(matches!(
            Settings::from_value(empty_key),
            Err(FlagError::ConfigurationError(_))
        ));

        let mut bad_account = settings_json();
        bad_account["accountId"] = json!(0);
        assert!(matches!(
            Settings::from_value(bad_account),
            Err(FlagError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_unparseable_settings() {
        match Settings::from_json("{\"features\": []}") {
            Err(FlagError::SettingsParsingError(_)) => (),
            other => panic!("Expected SettingsParsingError, got {:?}", other),
        }
        assert!(Settings::from_json("not json").is_err());
    }
}
