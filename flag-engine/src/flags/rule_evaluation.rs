use tracing::debug;

use crate::api::errors::FlagError;
use crate::bucketing::allocation::{allocate_ranges, find_range, scale_weights};
use crate::bucketing::hashing::bucket_for_string;
use crate::flags::evaluation_state::{EvaluationContext, EvaluationState};
use crate::groups::meg_resolver::resolve_group;
use crate::metrics::consts::RULE_EVALUATION_COUNTER;
use crate::metrics::utils::inc;
use crate::settings::settings_models::{Campaign, CampaignType, Variation};
use crate::storage::sticky_record::meg_meta_key;

/// Outcome of running one rule through whitelisting, pre-segmentation and
/// group resolution. Traffic bucketing is left to the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleOutcome {
    pub pre_segmentation_passed: bool,
    pub whitelisted_variation: Option<Variation>,
}

impl RuleOutcome {
    fn passed(passed: bool) -> Self {
        RuleOutcome {
            pre_segmentation_passed: passed,
            whitelisted_variation: None,
        }
    }

    fn whitelisted(variation: Variation) -> Self {
        RuleOutcome {
            pre_segmentation_passed: true,
            whitelisted_variation: Some(variation),
        }
    }
}

pub fn evaluate_rule(
    ctx: &EvaluationContext<'_>,
    state: &mut EvaluationState,
    campaign: &Campaign,
) -> Result<RuleOutcome, FlagError> {
    let outcome = run_rule(ctx, state, campaign)?;
    let label = if outcome.whitelisted_variation.is_some() {
        "whitelisted"
    } else if outcome.pre_segmentation_passed {
        "passed"
    } else {
        "failed"
    };
    inc(
        RULE_EVALUATION_COUNTER,
        &[("outcome".to_string(), label.to_string())],
        1,
    );
    Ok(outcome)
}

fn run_rule(
    ctx: &EvaluationContext<'_>,
    state: &mut EvaluationState,
    campaign: &Campaign,
) -> Result<RuleOutcome, FlagError> {
    if campaign.campaign_type == CampaignType::AB && campaign.is_forced_variation_enabled {
        if let Some(variation) = whitelisted_variation(ctx, campaign)? {
            debug!(
                campaign_id = campaign.id,
                variation_id = variation.id,
                user_id = %ctx.user.id,
                "user is whitelisted"
            );
            return Ok(RuleOutcome::whitelisted(variation));
        }
    }

    let identifier = campaign.meg_identifier();
    let group = ctx.settings.group_of(campaign);

    if let Some((group_id, group)) = group {
        if let Some(winner) = state.meg_winner(group_id) {
            return Ok(RuleOutcome::passed(winner == Some(identifier.as_str())));
        }

        let stored_winner = ctx
            .store
            .get(&meg_meta_key(group_id), &ctx.user.id)
            .and_then(|record| record.meg_identifier())
            .filter(|stored| {
                group.campaigns.iter().any(|member| member == stored)
                    || stored
                        .split_once('_')
                        .is_some_and(|(id, _)| group.campaigns.iter().any(|member| member == id))
            });
        if let Some(stored) = stored_winner {
            debug!(group_id, winner = %stored, "using stored group winner");
            let passed = stored == identifier;
            state.set_meg_winner(group_id, Some(stored));
            return Ok(RuleOutcome::passed(passed));
        }
    }

    if !ctx.pre_segmentation_passes(campaign) {
        return Ok(RuleOutcome::passed(false));
    }

    match group {
        Some((group_id, group)) => {
            let winner = resolve_group(ctx, state, group_id, group)?;
            let passed = winner.as_deref() == Some(identifier.as_str());
            state.set_meg_winner(group_id, winner);
            Ok(RuleOutcome::passed(passed))
        }
        None => Ok(RuleOutcome::passed(true)),
    }
}

/// Forced variation for the user, from variation-level targeting segments.
///
/// Variations without segments never match. Several matches are bucketed
/// deterministically after rescaling their weights to 100.
fn whitelisted_variation(
    ctx: &EvaluationContext<'_>,
    campaign: &Campaign,
) -> Result<Option<Variation>, FlagError> {
    let properties = ctx.properties_for(campaign, true);
    let mut shortlist: Vec<Variation> = Vec::new();

    for variation in &campaign.variations {
        match &variation.segments {
            None => continue,
            Some(segments) if segments.is_empty() => {
                debug!(
                    campaign_id = campaign.id,
                    variation_id = variation.id,
                    "skipping variation with empty targeting segments"
                );
            }
            Some(segments) => {
                if ctx.segments_match(segments, &properties) {
                    shortlist.push(variation.clone());
                }
            }
        }
    }

    if shortlist.len() <= 1 {
        return Ok(shortlist.pop());
    }

    let weights: Vec<f64> = shortlist.iter().map(|v| v.weight).collect();
    let ranges = allocate_ranges(&scale_weights(&weights));
    let seed = match campaign.salt.as_deref().filter(|s| !s.is_empty()) {
        Some(salt) => format!("{}_{}", salt, ctx.user.id),
        None => format!("{}_{}", campaign.id, ctx.user.id),
    };
    let bucket = bucket_for_string(&seed)?;
    Ok(find_range(&ranges, bucket).map(|index| shortlist.swap_remove(index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UserContext;
    use crate::events::NoopEventSink;
    use crate::segmentation::list_membership::NoListMembership;
    use crate::settings::settings_models::Settings;
    use crate::storage::{MemoryStorage, StickyRecord, StickyStore, StorageConnector};
    use crate::utils::test_utils::settings_from;
    use serde_json::json;

    fn whitelist_settings() -> Settings {
        settings_from(json!({
            "accountId": 1,
            "features": [{
                "id": 1,
                "key": "checkout",
                "rules": [{"campaignId": 2, "type": "FLAG_TESTING"}]
            }],
            "campaigns": [{
                "id": 2, "key": "checkout_ab", "type": "FLAG_TESTING", "percentTraffic": 100,
                "isForcedVariationEnabled": true,
                "segments": {"custom_variable": {"plan": "pro"}},
                "variations": [
                    {"id": 1, "key": "control", "weight": 50,
                     "segments": {"custom_variable": {"qa": "true"}}},
                    {"id": 2, "key": "variation", "weight": 50,
                     "segments": {"custom_variable": {"qa": "true"}}},
                    {"id": 3, "key": "beta", "weight": 0, "segments": {}}
                ]
            }],
            "groups": {},
            "campaignGroups": {}
        }))
    }

    fn run(settings: &Settings, user: &UserContext, storage: &dyn StorageConnector) -> RuleOutcome {
        let ctx = EvaluationContext {
            settings,
            user,
            store: StickyStore::new(storage),
            lists: &NoListMembership,
            events: &NoopEventSink,
        };
        let campaign = settings.feature_by_key("checkout").unwrap().linked_campaigns[0].clone();
        evaluate_rule(&ctx, &mut EvaluationState::default(), &campaign).unwrap()
    }

    #[test]
    fn test_whitelisting_buckets_among_shortlist() {
        let settings = whitelist_settings();
        // Both variations match; "2_User123" -> 6602 lands in the second half.
        let user = UserContext::new("User123").with_targeting_variable("qa", json!(true));
        let outcome = run(&settings, &user, &MemoryStorage::default());
        assert!(outcome.pre_segmentation_passed);
        assert_eq!(outcome.whitelisted_variation.map(|v| v.id), Some(2));
    }

    #[test]
    fn test_whitelisting_falls_back_to_pre_segmentation() {
        let settings = whitelist_settings();
        let user = UserContext::new("User123").with_custom_variable("plan", json!("pro"));
        let outcome = run(&settings, &user, &MemoryStorage::default());
        assert!(outcome.pre_segmentation_passed);
        assert!(outcome.whitelisted_variation.is_none());

        let user = UserContext::new("User123").with_custom_variable("plan", json!("free"));
        let outcome = run(&settings, &user, &MemoryStorage::default());
        assert_eq!(outcome, RuleOutcome::default());
    }

    #[test]
    fn test_stored_group_winner_decides_rule() {
        let mut value = serde_json::to_value(whitelist_settings()).unwrap();
        value["groups"] = json!({"4": {"campaigns": ["2", "7"]}});
        value["campaignGroups"] = json!({"2": 4, "7": 4});
        let settings = settings_from(value);
        let user = UserContext::new("User123").with_custom_variable("plan", json!("free"));

        let storage = MemoryStorage::with_records(vec![StickyRecord::meg_winner(
            4,
            "User123",
            2,
            "checkout_ab",
            None,
        )]);
        assert!(run(&settings, &user, &storage).pre_segmentation_passed);

        let storage = MemoryStorage::with_records(vec![StickyRecord::meg_winner(
            4,
            "User123",
            7,
            "other_ab",
            None,
        )]);
        assert!(!run(&settings, &user, &storage).pre_segmentation_passed);
    }

    #[test]
    fn test_memoized_group_winner_short_circuits() {
        let mut value = serde_json::to_value(whitelist_settings()).unwrap();
        value["groups"] = json!({"4": {"campaigns": ["2"]}});
        value["campaignGroups"] = json!({"2": 4});
        let settings = settings_from(value);
        let user = UserContext::new("User123");
        let storage = MemoryStorage::default();
        let ctx = EvaluationContext {
            settings: &settings,
            user: &user,
            store: StickyStore::new(&storage),
            lists: &NoListMembership,
            events: &NoopEventSink,
        };
        let campaign = settings.feature_by_key("checkout").unwrap().linked_campaigns[0].clone();

        let mut state = EvaluationState::default();
        state.set_meg_winner(4, None);
        assert!(!evaluate_rule(&ctx, &mut state, &campaign).unwrap().pre_segmentation_passed);
        state.set_meg_winner(4, Some("2".to_string()));
        assert!(evaluate_rule(&ctx, &mut state, &campaign).unwrap().pre_segmentation_passed);
    }
}
