use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::api::errors::SegmentationError;
use crate::segmentation::operand_matching::{Operand, UserAgentPattern};
use crate::settings::settings_models::FeatureId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LocationField {
    Country,
    Region,
    City,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UserAgentField {
    Os,
    DeviceType,
    BrowserString,
    Device,
}

/// A node of the segmentation DSL, parsed once when settings load.
///
/// Nodes that fail to parse are kept as [`SegmentNode::Invalid`] so that a
/// single bad predicate only ever evaluates to `false`.
#[derive(Debug, Clone)]
pub enum SegmentNode {
    And(Vec<SegmentNode>),
    Or(Vec<SegmentNode>),
    Not(Box<SegmentNode>),
    CustomVariable { key: String, operand: Operand },
    User(Vec<String>),
    Location(LocationField, String),
    UserAgent(UserAgentField, Vec<UserAgentPattern>),
    Ua(Operand),
    FeatureId { feature_id: FeatureId, expected_on: bool },
    Invalid(SegmentationError),
}

impl SegmentNode {
    pub fn parse(value: &Value) -> SegmentNode {
        parse_node(value).unwrap_or_else(SegmentNode::Invalid)
    }

    pub fn is_location(&self) -> bool {
        matches!(self, SegmentNode::Location(..))
    }

    pub fn is_user_agent(&self) -> bool {
        matches!(self, SegmentNode::UserAgent(..))
    }

    /// Whether evaluating this tree needs enriched data (geo, parsed user
    /// agent) or an external list lookup.
    pub fn requires_enrichment(&self) -> bool {
        match self {
            SegmentNode::And(children) | SegmentNode::Or(children) => {
                children.iter().any(SegmentNode::requires_enrichment)
            }
            SegmentNode::Not(child) => child.requires_enrichment(),
            SegmentNode::Location(..) | SegmentNode::UserAgent(..) | SegmentNode::Ua(_) => true,
            SegmentNode::CustomVariable { operand, .. } => operand.requires_list_lookup(),
            _ => false,
        }
    }
}

/// A segments tree as delivered in settings, together with its parsed form.
///
/// `{}` parses to no root and always passes; `null` or an absent field is
/// represented one level up as `Option::None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct Segments {
    raw: Value,
    root: Option<SegmentNode>,
}

impl Segments {
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<&SegmentNode> {
        self.root.as_ref()
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn requires_enrichment(&self) -> bool {
        self.root
            .as_ref()
            .is_some_and(SegmentNode::requires_enrichment)
    }
}

impl From<Value> for Segments {
    fn from(raw: Value) -> Self {
        let root = match &raw {
            Value::Object(map) if map.is_empty() => None,
            other => Some(SegmentNode::parse(other)),
        };
        Segments { raw, root }
    }
}

impl From<Segments> for Value {
    fn from(segments: Segments) -> Self {
        segments.raw
    }
}

impl PartialEq for Segments {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

fn parse_node(value: &Value) -> Result<SegmentNode, SegmentationError> {
    let (operator, operand) = single_entry(value)?;

    match operator {
        "and" => Ok(SegmentNode::And(parse_children(operator, operand)?)),
        "or" => Ok(SegmentNode::Or(parse_children(operator, operand)?)),
        "not" => Ok(SegmentNode::Not(Box::new(SegmentNode::parse(operand)))),
        "custom_variable" => {
            let (key, raw_operand) = single_entry(operand)?;
            Ok(SegmentNode::CustomVariable {
                key: key.to_string(),
                operand: Operand::parse(raw_operand)?,
            })
        }
        "user" => {
            let ids = expect_str(operator, operand)?
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            Ok(SegmentNode::User(ids))
        }
        "ua" => Ok(SegmentNode::Ua(Operand::parse(operand)?)),
        "featureId" => {
            let (id, state) = single_entry(operand)?;
            let feature_id = id
                .trim()
                .parse::<FeatureId>()
                .map_err(|_| SegmentationError::InvalidNumber(id.to_string()))?;
            let expected_on = match expect_str(operator, state)?.trim() {
                s if s.eq_ignore_ascii_case("on") => true,
                s if s.eq_ignore_ascii_case("off") => false,
                other => {
                    return Err(SegmentationError::MalformedNode(format!(
                        "featureId state must be on or off, got {}",
                        other
                    )))
                }
            };
            Ok(SegmentNode::FeatureId { feature_id, expected_on })
        }
        other => {
            if let Ok(field) = LocationField::from_str(other) {
                let expected = match operand {
                    Value::String(s) => s.clone(),
                    Value::Number(_) | Value::Bool(_) => operand.to_string(),
                    _ => return Err(malformed(other, operand)),
                };
                return Ok(SegmentNode::Location(field, expected));
            }
            if let Ok(field) = UserAgentField::from_str(other) {
                let patterns = match operand {
                    Value::String(s) => vec![UserAgentPattern::parse(s)?],
                    Value::Array(values) => values
                        .iter()
                        .map(|v| UserAgentPattern::parse(expect_str(other, v)?))
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => return Err(malformed(other, operand)),
                };
                return Ok(SegmentNode::UserAgent(field, patterns));
            }
            Err(SegmentationError::UnknownOperator(other.to_string()))
        }
    }
}

fn single_entry(value: &Value) -> Result<(&str, &Value), SegmentationError> {
    let object = value.as_object().ok_or_else(|| {
        SegmentationError::MalformedNode(format!("expected an object, got {}", value))
    })?;
    let mut entries = object.iter();
    match (entries.next(), entries.next()) {
        (Some((key, operand)), None) => Ok((key.as_str(), operand)),
        _ => Err(SegmentationError::MalformedNode(format!(
            "expected exactly one operator, got {} keys",
            object.len()
        ))),
    }
}

fn parse_children(operator: &str, operand: &Value) -> Result<Vec<SegmentNode>, SegmentationError> {
    let children = operand.as_array().ok_or_else(|| malformed(operator, operand))?;
    Ok(children.iter().map(SegmentNode::parse).collect())
}

fn expect_str<'v>(operator: &str, value: &'v Value) -> Result<&'v str, SegmentationError> {
    value.as_str().ok_or_else(|| malformed(operator, value))
}

fn malformed(operator: &str, operand: &Value) -> SegmentationError {
    SegmentationError::MalformedNode(format!("unexpected operand for {}: {}", operator, operand))
}
