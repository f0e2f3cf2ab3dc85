#![allow(dead_code)]

use serde_json::{json, Value};

use flag_engine::settings::settings_models::Settings;

/// Feature `checkout`: a 50% rollout (campaign 1) gating a 50/50 AB test
/// (campaign 2), with impact campaign 99.
///
/// Bucket values for account 1 used across the tests:
///   user-1:  rollout 13, experiment variation bucket 7023 (variation 2)
///   user-2:  rollout 99 (excluded), experiment variation bucket 8116
///   user-12: rollout 17, experiment variation bucket 2970 (variation 1)
pub fn checkout_settings_json() -> Value {
    json!({
        "accountId": 1,
        "sdkKey": "sdk-key",
        "version": 3,
        "features": [
            {
                "id": 1,
                "key": "checkout",
                "name": "Checkout",
                "impactCampaign": {"campaignId": 99, "type": "IMPACT"},
                "rules": [
                    {"campaignId": 1, "type": "FLAG_ROLLOUT", "ruleKey": "rollout-rule"},
                    {"campaignId": 2, "type": "FLAG_TESTING", "ruleKey": "testing-rule"}
                ]
            },
            {
                "id": 2,
                "key": "search",
                "rules": [{"campaignId": 3, "type": "FLAG_TESTING", "ruleKey": "search-ab"}]
            }
        ],
        "campaigns": [
            {
                "id": 1,
                "key": "checkout_rollout",
                "type": "FLAG_ROLLOUT",
                "percentTraffic": 100,
                "variations": [{
                    "id": 1,
                    "key": "rollout-variation",
                    "weight": 50,
                    "segments": {},
                    "variables": [{"id": 1, "key": "color", "type": "string", "value": "grey"}]
                }]
            },
            {
                "id": 2,
                "key": "checkout_ab",
                "type": "FLAG_TESTING",
                "percentTraffic": 100,
                "segments": {},
                "variations": [
                    {
                        "id": 1,
                        "key": "control",
                        "weight": 50,
                        "variables": [{"id": 1, "key": "color", "type": "string", "value": "blue"}]
                    },
                    {
                        "id": 2,
                        "key": "treatment",
                        "weight": 50,
                        "variables": [{"id": 1, "key": "color", "type": "string", "value": "green"}]
                    }
                ]
            },
            {
                "id": 3,
                "key": "search_ab",
                "type": "FLAG_TESTING",
                "percentTraffic": 100,
                "segments": {"custom_variable": {"plan": "pro"}},
                "variations": [{"id": 1, "key": "fuzzy", "weight": 100}]
            }
        ],
        "groups": {},
        "campaignGroups": {}
    })
}

pub fn checkout_settings() -> Settings {
    Settings::from_value(checkout_settings_json()).unwrap()
}

/// Two pairs of features sharing a campaign group each. Group 5 is advanced
/// with campaign 22 prioritised; group 6 is random.
pub fn grouped_settings(priority: Value) -> Settings {
    let ab = |id: i64, key: &str| {
        json!({
            "id": id,
            "key": key,
            "type": "FLAG_TESTING",
            "percentTraffic": 100,
            "variations": [{"id": 1, "key": format!("{}-on", key), "weight": 100}]
        })
    };
    let feature = |id: i64, key: &str, campaign_id: i64| {
        json!({
            "id": id,
            "key": key,
            "rules": [{"campaignId": campaign_id, "type": "FLAG_TESTING"}]
        })
    };
    Settings::from_value(json!({
        "accountId": 1,
        "features": [
            feature(10, "banner", 21),
            feature(11, "pricing", 22),
            feature(12, "header", 31),
            feature(13, "footer", 32)
        ],
        "campaigns": [
            ab(21, "banner_ab"),
            ab(22, "pricing_ab"),
            ab(31, "header_ab"),
            ab(32, "footer_ab")
        ],
        "groups": {
            "5": {
                "name": "checkout-tests",
                "campaigns": [21, 22],
                "et": 2,
                "p": priority,
                "wt": {"21": 100, "22": 0}
            },
            "6": {"name": "layout-tests", "campaigns": ["31", "32"], "et": 1}
        },
        "campaignGroups": {"21": 5, "22": 5, "31": 6, "32": 6}
    }))
    .unwrap()
}
