use tracing::debug;

use crate::api::errors::FlagError;
use crate::bucketing::allocation::variation_for_bucket;
use crate::bucketing::hashing::{bucket_for_string_with, bucket_for_user, MAX_TRAFFIC_VALUE};
use crate::settings::settings_models::{AccountId, Campaign, Variation};

fn salted_key(salt: Option<&str>, campaign: &Campaign, rest: &str) -> String {
    match salt.filter(|s| !s.is_empty()) {
        Some(salt) => format!("{}_{}", salt, rest),
        None => format!("{}_{}", campaign.id, rest),
    }
}

/// Whether `user_id` falls inside the campaign's traffic allocation.
///
/// Rollout and personalize campaigns take salt and traffic from their single
/// variation; AB campaigns from the campaign itself.
pub fn is_user_part_of_campaign(user_id: &str, campaign: &Campaign) -> Result<bool, FlagError> {
    if user_id.is_empty() {
        return Err(FlagError::InputValidationError(
            "user id is required for bucketing".to_string(),
        ));
    }
    let (salt, traffic) = if campaign.is_rollout_or_personalize() {
        match campaign.variations.first() {
            Some(variation) => (variation.salt.as_deref(), variation.weight),
            None => return Ok(false),
        }
    } else {
        (campaign.salt.as_deref(), campaign.percent_traffic)
    };

    let bucket = bucket_for_user(&salted_key(salt, campaign, user_id))?;
    let is_member = bucket != 0 && f64::from(bucket) <= traffic;
    debug!(
        campaign_id = campaign.id,
        user_id, bucket, traffic, is_member, "checked campaign traffic membership"
    );
    Ok(is_member)
}

/// Buckets the user into `[1, 10000]` and returns the variation whose range
/// holds the bucket. A campaign with zero traffic never buckets anyone.
pub fn bucket_user_to_variation<'c>(
    user_id: &str,
    account_id: AccountId,
    campaign: &'c Campaign,
) -> Result<Option<&'c Variation>, FlagError> {
    let multiplier = if campaign.percent_traffic != 0.0 { 1 } else { 0 };
    let key = salted_key(
        campaign.salt.as_deref(),
        campaign,
        &format!("{}_{}", account_id, user_id),
    );
    let bucket = bucket_for_string_with(&key, multiplier, MAX_TRAFFIC_VALUE)?;
    let variation = variation_for_bucket(&campaign.variations, bucket);
    debug!(
        campaign_id = campaign.id,
        user_id,
        bucket,
        variation_id = variation.map(|v| v.id),
        "bucketed user to variation"
    );
    Ok(variation)
}

pub fn get_variation_allotted<'c>(
    user_id: &str,
    account_id: AccountId,
    campaign: &'c Campaign,
) -> Result<Option<&'c Variation>, FlagError> {
    if !is_user_part_of_campaign(user_id, campaign)? {
        return Ok(None);
    }
    if campaign.is_rollout_or_personalize() {
        return Ok(campaign.variations.first());
    }
    bucket_user_to_variation(user_id, account_id, campaign)
}
