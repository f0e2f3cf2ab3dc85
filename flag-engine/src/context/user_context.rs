use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::segmentation::segment_models::{LocationField, UserAgentField};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl Location {
    pub fn get(&self, field: LocationField) -> Option<&str> {
        match field {
            LocationField::Country => self.country.as_deref(),
            LocationField::Region => self.region.as_deref(),
            LocationField::City => self.city.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedUserAgent {
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub browser_string: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
}

impl ParsedUserAgent {
    pub fn get(&self, field: UserAgentField) -> Option<&str> {
        match field {
            UserAgentField::Os => self.os.as_deref(),
            UserAgentField::BrowserString => self.browser_string.as_deref(),
            UserAgentField::DeviceType => self.device_type.as_deref(),
            UserAgentField::Device => self.device.as_deref(),
        }
    }
}

/// Geo and user-agent data resolved by an external service before evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub user_agent: Option<ParsedUserAgent>,
}

/// The user a flag is evaluated for. Never mutated by evaluation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub custom_variables: HashMap<String, Value>,
    #[serde(default)]
    pub variation_targeting_variables: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<Enrichment>,
}

impl UserContext {
    pub fn new(id: impl Into<String>) -> Self {
        UserContext {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_custom_variable(mut self, key: &str, value: Value) -> Self {
        self.custom_variables.insert(key.to_string(), value);
        self
    }

    pub fn with_targeting_variable(mut self, key: &str, value: Value) -> Self {
        self.variation_targeting_variables.insert(key.to_string(), value);
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.enrichment.get_or_insert_with(Enrichment::default).location = Some(location);
        self
    }

    pub fn with_parsed_user_agent(mut self, parsed: ParsedUserAgent) -> Self {
        self.enrichment.get_or_insert_with(Enrichment::default).user_agent = Some(parsed);
        self
    }

    pub fn location(&self) -> Option<&Location> {
        self.enrichment.as_ref()?.location.as_ref()
    }

    pub fn parsed_user_agent(&self) -> Option<&ParsedUserAgent> {
        self.enrichment.as_ref()?.user_agent.as_ref()
    }
}
