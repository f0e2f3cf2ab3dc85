use std::collections::HashSet;

use tracing::{debug, info};

use crate::api::errors::FlagError;
use crate::bucketing::allocation::{allocate_ranges, equal_weights, find_range};
use crate::bucketing::hashing::bucket_for_string;
use crate::campaigns::campaign_decision::{get_variation_allotted, is_user_part_of_campaign};
use crate::flags::evaluation_state::{EvaluationContext, EvaluationState, RolloutDecision};
use crate::metrics::consts::MEG_RESOLUTION_COUNTER;
use crate::metrics::utils::inc;
use crate::settings::settings_models::{
    Campaign, CampaignType, Feature, Group, GroupId, MegAlgorithm,
};
use crate::storage::StickyRecord;

/// A group member that survived the rollout gate.
struct Candidate<'s> {
    feature: &'s Feature,
    campaign: &'s Campaign,
    identifier: String,
}

impl Candidate<'_> {
    /// Matches a priority or weight key written either as `"id"` or `"id_variationId"`.
    fn is_named_by(&self, key: &str) -> bool {
        self.identifier == key || self.campaign.id.to_string() == key
    }
}

/// Picks the single campaign of `group_id` the user may see this call.
///
/// Returns the winner's member identifier, or `None` when no campaign of
/// the group is eligible. Winners that did not come from a single sticky
/// campaign are persisted under the group's meta key.
pub fn resolve_group(
    ctx: &EvaluationContext<'_>,
    state: &mut EvaluationState,
    group_id: GroupId,
    group: &Group,
) -> Result<Option<String>, FlagError> {
    let candidates = gather_candidates(ctx, state, group_id, group)?;

    let mut sticky = Vec::new();
    let mut eligible = Vec::new();
    for candidate in candidates {
        if has_sticky_decision(ctx, &candidate) {
            sticky.push(candidate);
        } else if ctx.pre_segmentation_passes(candidate.campaign)
            && is_user_part_of_campaign(&ctx.user.id, candidate.campaign)?
        {
            eligible.push(candidate);
        }
    }

    let (winner, source) = match (sticky.len(), eligible.len()) {
        (1, _) => (sticky.first(), "sticky"),
        (n, _) if n > 1 => (pick_random(ctx, group_id, &sticky)?, "sticky_random"),
        (_, 1) => (eligible.first(), "single"),
        (_, n) if n > 1 => match group.algorithm {
            MegAlgorithm::Random => (pick_random(ctx, group_id, &eligible)?, "random"),
            MegAlgorithm::Advanced => (pick_advanced(ctx, group_id, group, &eligible)?, "advanced"),
        },
        _ => (None, "none"),
    };

    inc(
        MEG_RESOLUTION_COUNTER,
        &[
            ("algorithm".to_string(), group.algorithm.to_string()),
            ("source".to_string(), source.to_string()),
        ],
        1,
    );

    let Some(winner) = winner else {
        debug!(group_id, user_id = %ctx.user.id, "no eligible campaign in group");
        return Ok(None);
    };

    info!(
        group_id,
        user_id = %ctx.user.id,
        campaign_id = winner.campaign.id,
        winner = %winner.identifier,
        source,
        "resolved mutually exclusive group"
    );

    if source != "sticky" {
        let variation_id = match winner.campaign.campaign_type {
            CampaignType::Personalize => winner.campaign.variations.first().map(|v| v.id),
            _ => None,
        };
        ctx.store.set(&StickyRecord::meg_winner(
            group_id,
            &ctx.user.id,
            winner.campaign.id,
            &winner.campaign.key,
            variation_id,
        ));
    }

    Ok(Some(winner.identifier.clone()))
}

/// Group members in the group's listed order, restricted to features whose
/// rollout gate is open.
fn gather_candidates<'s>(
    ctx: &EvaluationContext<'s>,
    state: &mut EvaluationState,
    group_id: GroupId,
    group: &Group,
) -> Result<Vec<Candidate<'s>>, FlagError> {
    let settings = ctx.settings;
    let mut open_features = Vec::new();
    for feature_key in settings.feature_keys_in_group(group_id) {
        let Some(feature) = settings.feature_by_key(feature_key) else {
            continue;
        };
        if rollout_gate_open(ctx, state, feature)? {
            open_features.push(feature);
        } else {
            debug!(group_id, feature_key, "rollout gate closed, excluding feature from group");
        }
    }

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for member in &group.campaigns {
        for feature in open_features.iter().copied() {
            for campaign in feature.experiment_rules() {
                let identifier = campaign.meg_identifier();
                let named = identifier == *member || campaign.id.to_string() == *member;
                if named && seen.insert(identifier.clone()) {
                    candidates.push(Candidate {
                        feature,
                        campaign,
                        identifier,
                    });
                }
            }
        }
    }
    Ok(candidates)
}

/// A feature can contribute campaigns only if it has no rollout rules or
/// one of them passed for this user. Unevaluated features are evaluated
/// here and memoized.
fn rollout_gate_open(
    ctx: &EvaluationContext<'_>,
    state: &mut EvaluationState,
    feature: &Feature,
) -> Result<bool, FlagError> {
    if !feature.has_rollout_rules() {
        return Ok(true);
    }
    if let Some(passed) = state.rollout_passed(&feature.key) {
        return Ok(passed);
    }

    if let Some(record) = ctx.store.get(&feature.key, &ctx.user.id) {
        if let (Some(key), Some(variation_id)) =
            (&record.rollout_key, record.rollout_variation_id)
        {
            let decision = RolloutDecision {
                campaign_id: record.rollout_id.unwrap_or_default(),
                campaign_key: key.clone(),
                variation_id,
            };
            state.record_rollout(&feature.key, Some(decision));
            return Ok(true);
        }
    }

    let mut decision = None;
    if let Some(campaign) = feature
        .rollout_rules()
        .find(|campaign| ctx.pre_segmentation_passes(campaign))
    {
        if let Some(variation) =
            get_variation_allotted(&ctx.user.id, ctx.settings.account_id, campaign)?
        {
            decision = Some(RolloutDecision {
                campaign_id: campaign.id,
                campaign_key: campaign.key.clone(),
                variation_id: variation.id,
            });
        }
    }
    let passed = decision.is_some();
    state.record_rollout(&feature.key, decision);
    Ok(passed)
}

fn has_sticky_decision(ctx: &EvaluationContext<'_>, candidate: &Candidate<'_>) -> bool {
    let Some(record) = ctx.store.get(&candidate.feature.key, &ctx.user.id) else {
        return false;
    };
    if record.experiment_key.as_deref() != Some(candidate.campaign.key.as_str()) {
        return false;
    }
    match candidate.campaign.campaign_type {
        CampaignType::Personalize => {
            record.experiment_variation_id == candidate.campaign.variations.first().map(|v| v.id)
        }
        _ => true,
    }
}

fn pick_by_weights<'c, 's>(
    ctx: &EvaluationContext<'_>,
    group_id: GroupId,
    candidates: &'c [Candidate<'s>],
    weights: &[f64],
) -> Result<Option<&'c Candidate<'s>>, FlagError> {
    let ranges = allocate_ranges(weights);
    let bucket = bucket_for_string(&format!("{}_{}", group_id, ctx.user.id))?;
    Ok(find_range(&ranges, bucket).and_then(|index| candidates.get(index)))
}

fn pick_random<'c, 's>(
    ctx: &EvaluationContext<'_>,
    group_id: GroupId,
    candidates: &'c [Candidate<'s>],
) -> Result<Option<&'c Candidate<'s>>, FlagError> {
    pick_by_weights(ctx, group_id, candidates, &equal_weights(candidates.len()))
}

/// First listed priority present among the candidates wins; otherwise the
/// group's explicit weights, restricted to the candidates, decide. Candidates
/// without a weight get no range, so a group without usable weights has no
/// winner.
fn pick_advanced<'c, 's>(
    ctx: &EvaluationContext<'_>,
    group_id: GroupId,
    group: &Group,
    candidates: &'c [Candidate<'s>],
) -> Result<Option<&'c Candidate<'s>>, FlagError> {
    for key in &group.priority {
        if let Some(candidate) = candidates.iter().find(|c| c.is_named_by(key)) {
            return Ok(Some(candidate));
        }
    }

    let weights: Vec<f64> = candidates
        .iter()
        .map(|candidate| {
            group
                .weights
                .get(&candidate.identifier)
                .or_else(|| group.weights.get(&candidate.campaign.id.to_string()))
                .copied()
                .unwrap_or(0.0)
        })
        .collect();

    pick_by_weights(ctx, group_id, candidates, &weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UserContext;
    use crate::events::NoopEventSink;
    use crate::segmentation::list_membership::NoListMembership;
    use crate::settings::settings_models::Settings;
    use crate::storage::sticky_record::meg_meta_key;
    use crate::storage::{MemoryStorage, StickyStore, StorageConnector};
    use crate::utils::test_utils::settings_from;
    use serde_json::{json, Value};

    // Three AB features, one campaign each (ids 21, 22, 23), all at 100% traffic.
    fn group_settings(group: Value) -> Settings {
        let feature = |id: i64, campaign: i64| {
            json!({
                "id": id,
                "key": format!("feature_{}", id),
                "rules": [{"campaignId": campaign, "type": "FLAG_TESTING"}]
            })
        };
        let campaign = |id: i64| {
            json!({
                "id": id,
                "key": format!("campaign_{}", id),
                "type": "FLAG_TESTING",
                "percentTraffic": 100,
                "variations": [
                    {"id": 1, "key": "control", "weight": 50},
                    {"id": 2, "key": "variation", "weight": 50}
                ]
            })
        };
        settings_from(json!({
            "accountId": 1,
            "features": [feature(1, 21), feature(2, 22), feature(3, 23)],
            "campaigns": [campaign(21), campaign(22), campaign(23)],
            "groups": {"9": group},
            "campaignGroups": {"21": 9, "22": 9, "23": 9}
        }))
    }

    fn resolve(
        settings: &Settings,
        user: &UserContext,
        storage: &dyn StorageConnector,
    ) -> Option<String> {
        let ctx = EvaluationContext {
            settings,
            user,
            store: StickyStore::new(storage),
            lists: &NoListMembership,
            events: &NoopEventSink,
        };
        let group = settings.groups.get(&9).unwrap();
        resolve_group(&ctx, &mut EvaluationState::default(), 9, group).unwrap()
    }

    #[test]
    fn test_advanced_priority_wins_regardless_of_weights() {
        let settings = group_settings(json!({
            "campaigns": ["21", "22", "23"], "et": 2, "p": ["22", "21"], "wt": {"21": 100}
        }));
        for i in 0..20 {
            let user = UserContext::new(format!("user-{}", i));
            assert_eq!(resolve(&settings, &user, &MemoryStorage::default()).as_deref(), Some("22"));
        }
    }

    #[test]
    fn test_advanced_falls_back_to_weights() {
        let settings = group_settings(json!({
            "campaigns": ["21", "22", "23"], "et": 2, "p": ["99"], "wt": {"23": 100}
        }));
        let user = UserContext::new("User123");
        assert_eq!(resolve(&settings, &user, &MemoryStorage::default()).as_deref(), Some("23"));
    }

    #[test]
    fn test_advanced_without_priority_or_weights_has_no_winner() {
        let settings =
            group_settings(json!({"campaigns": ["21", "22"], "et": 2, "p": [], "wt": {}}));
        let storage = MemoryStorage::default();
        assert_eq!(resolve(&settings, &UserContext::new("User123"), &storage), None);
        assert!(storage.get(&meg_meta_key(9), "User123").unwrap().is_none());

        let settings = group_settings(json!({
            "campaigns": ["21", "22"],
            "et": 2,
            "wt": {"21": 0, "22": 0}
        }));
        assert_eq!(resolve(&settings, &UserContext::new("User123"), &storage), None);
    }

    #[test]
    fn test_random_is_deterministic_and_persisted() {
        let settings = group_settings(json!({"campaigns": ["21", "22", "23"], "et": 1}));
        let user = UserContext::new("User123");
        let storage = MemoryStorage::default();

        let first = resolve(&settings, &user, &storage);
        // "9_User123" buckets to 2309, inside the first third of [1, 10000].
        assert_eq!(first.as_deref(), Some("21"));
        assert_eq!(resolve(&settings, &user, &MemoryStorage::default()), first);

        let stored = storage.get(&meg_meta_key(9), "User123").unwrap().unwrap();
        assert_eq!(stored.experiment_id, Some(21));
        assert_eq!(stored.experiment_variation_id, Some(-1));
    }

    #[test]
    fn test_single_sticky_campaign_wins_and_is_not_rewritten() {
        let settings =
            group_settings(json!({"campaigns": ["21", "22", "23"], "et": 2, "p": ["21"]}));
        let storage = MemoryStorage::with_records(vec![
            StickyRecord::new("feature_3", "User123").with_experiment(23, "campaign_23", 1),
        ]);
        let user = UserContext::new("User123");
        assert_eq!(resolve(&settings, &user, &storage).as_deref(), Some("23"));
        assert!(storage.get(&meg_meta_key(9), "User123").unwrap().is_none());
    }

    #[test]
    fn test_ineligible_campaigns_are_skipped() {
        let settings =
            group_settings(json!({"campaigns": ["21", "22"], "et": 2, "p": ["21", "22"]}));
        let mut value = serde_json::to_value(&settings).unwrap();
        value["campaigns"][0]["segments"] = json!({"custom_variable": {"plan": "pro"}});
        let settings = settings_from(value);

        let user = UserContext::new("User123").with_custom_variable("plan", json!("free"));
        assert_eq!(resolve(&settings, &user, &MemoryStorage::default()).as_deref(), Some("22"));
    }

    #[test]
    fn test_no_eligible_campaign_means_no_winner() {
        let settings = group_settings(json!({"campaigns": ["21"], "et": 1}));
        let mut value = serde_json::to_value(&settings).unwrap();
        value["campaigns"][0]["percentTraffic"] = json!(0);
        let settings = settings_from(value);
        let storage = MemoryStorage::default();
        assert_eq!(resolve(&settings, &UserContext::new("User123"), &storage), None);
    }

    #[test]
    fn test_closed_rollout_gate_excludes_feature() {
        let mut value = serde_json::to_value(group_settings(json!({
            "campaigns": ["21", "22"], "et": 2, "p": ["21", "22"]
        })))
        .unwrap();
        value["features"][0]["rules"] = json!([
            {"campaignId": 30, "type": "FLAG_ROLLOUT"},
            {"campaignId": 21, "type": "FLAG_TESTING"}
        ]);
        value["campaigns"]
            .as_array_mut()
            .unwrap()
            .push(json!({"id": 30, "key": "rollout_30", "type": "FLAG_ROLLOUT",
                         "variations": [{"id": 1, "key": "on", "weight": 100,
                                         "segments": {"custom_variable": {"beta": "yes"}}}]}));
        let settings = settings_from(value);

        let outsider = UserContext::new("User123");
        assert_eq!(resolve(&settings, &outsider, &MemoryStorage::default()).as_deref(), Some("22"));

        let insider = UserContext::new("User123").with_custom_variable("beta", json!("yes"));
        assert_eq!(resolve(&settings, &insider, &MemoryStorage::default()).as_deref(), Some("21"));
    }
}
