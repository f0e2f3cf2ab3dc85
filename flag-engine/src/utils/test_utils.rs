use std::sync::Mutex;

use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Value};

use crate::bucketing::allocation::BucketRange;
use crate::context::UserContext;
use crate::events::{DecisionEvent, EventSink};
use crate::settings::settings_models::{
    Campaign, CampaignId, CampaignType, Settings, Variation, VariationId,
};
use crate::storage::{StickyRecord, StorageConnector, StorageError};

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

fn variation(id: VariationId, key: String, weight: f64) -> Variation {
    Variation {
        id,
        key,
        name: None,
        weight,
        salt: None,
        segments: None,
        variables: Vec::new(),
        range: BucketRange::default(),
    }
}

/// A rollout campaign with a single variation (id 1) carrying `weight`.
/// Ranges are not allocated.
pub fn rollout_campaign(id: CampaignId, key: &str, weight: f64) -> Campaign {
    Campaign {
        id,
        key: key.to_string(),
        name: None,
        campaign_type: CampaignType::Rollout,
        status: Some("RUNNING".to_string()),
        salt: None,
        percent_traffic: 100.0,
        segments: None,
        variations: vec![variation(1, format!("{}-v", key), weight)],
        is_forced_variation_enabled: false,
        is_user_list_enabled: false,
        rule_key: None,
    }
}

/// An AB campaign with the given `(variation id, weight)` pairs. Ranges are
/// not allocated.
pub fn ab_campaign(
    id: CampaignId,
    key: &str,
    percent_traffic: f64,
    variations: &[(VariationId, f64)],
) -> Campaign {
    Campaign {
        id,
        key: key.to_string(),
        name: None,
        campaign_type: CampaignType::AB,
        status: Some("RUNNING".to_string()),
        salt: None,
        percent_traffic,
        segments: None,
        variations: variations
            .iter()
            .map(|(vid, weight)| variation(*vid, format!("{}-{}", key, vid), *weight))
            .collect(),
        is_forced_variation_enabled: false,
        is_user_list_enabled: false,
        rule_key: None,
    }
}

/// Processed settings for account 1 with the given feature and campaign
/// documents and no groups.
pub fn settings_with(features: Vec<Value>, campaigns: Vec<Value>) -> Settings {
    settings_from(json!({
        "accountId": 1,
        "sdkKey": random_string("sdk_", 12),
        "version": 1,
        "features": features,
        "campaigns": campaigns,
        "groups": {},
        "campaignGroups": {}
    }))
}

pub fn settings_from(value: Value) -> Settings {
    Settings::from_value(value).expect("test settings should be valid")
}

/// Connector whose every call fails.
pub struct FailingStorage;

impl StorageConnector for FailingStorage {
    fn get(
        &self,
        _feature_key: &str,
        _user_id: &str,
    ) -> Result<Option<StickyRecord>, StorageError> {
        Err(StorageError("storage unavailable".to_string()))
    }

    fn set(&self, _record: &StickyRecord) -> Result<(), StorageError> {
        Err(StorageError("storage unavailable".to_string()))
    }
}

/// Event sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingEventSink {
    pub variations_shown: Mutex<Vec<(CampaignId, VariationId, String)>>,
    pub decisions: Mutex<Vec<DecisionEvent>>,
}

impl RecordingEventSink {
    pub fn shown(&self) -> Vec<(CampaignId, VariationId)> {
        self.variations_shown
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(campaign_id, variation_id, _)| (*campaign_id, *variation_id))
            .collect()
    }

    pub fn decisions(&self) -> Vec<DecisionEvent> {
        self.decisions.lock().expect("lock poisoned").clone()
    }
}

impl EventSink for RecordingEventSink {
    fn emit_variation_shown(
        &self,
        campaign_id: CampaignId,
        variation_id: VariationId,
        context: &UserContext,
    ) {
        self.variations_shown
            .lock()
            .expect("lock poisoned")
            .push((campaign_id, variation_id, context.id.clone()));
    }

    fn emit_decision(&self, event: &DecisionEvent) {
        self.decisions
            .lock()
            .expect("lock poisoned")
            .push(event.clone());
    }
}
