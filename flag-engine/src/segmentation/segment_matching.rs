use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use serde_json::Value;

use crate::api::errors::{FlagError, SegmentationError};
use crate::context::UserContext;
use crate::metrics::consts::SEGMENTATION_ERROR_COUNTER;
use crate::metrics::utils::inc;
use crate::segmentation::list_membership::ListMembership;
use crate::segmentation::operand_matching::{normalize_value, UserAgentPattern};
use crate::segmentation::segment_models::{LocationField, SegmentNode, Segments, UserAgentField};
use crate::settings::settings_models::FeatureId;

/// Property injected into evaluation maps with the (possibly hashed) user id.
pub const VWO_USER_ID_PROPERTY: &str = "_vwoUserId";

/// Resolves `featureId` predicates against stored decisions.
pub trait FeatureStateLookup {
    fn has_stored_decision(&self, feature_id: FeatureId) -> bool;
}

/// Evaluates segment trees for one user and one property map.
pub struct SegmentEvaluator<'a> {
    properties: &'a HashMap<String, Value>,
    context: &'a UserContext,
    lists: &'a dyn ListMembership,
    features: Option<&'a dyn FeatureStateLookup>,
}

impl<'a> SegmentEvaluator<'a> {
    pub fn new(
        properties: &'a HashMap<String, Value>,
        context: &'a UserContext,
        lists: &'a dyn ListMembership,
    ) -> Self {
        SegmentEvaluator {
            properties,
            context,
            lists,
            features: None,
        }
    }

    pub fn with_feature_lookup(mut self, features: &'a dyn FeatureStateLookup) -> Self {
        self.features = Some(features);
        self
    }

    /// Empty segments always match.
    pub fn matches(&self, segments: &Segments) -> bool {
        segments.root().map_or(true, |root| self.evaluate(root))
    }

    pub fn evaluate(&self, node: &SegmentNode) -> bool {
        match node {
            SegmentNode::And(children) => self.evaluate_and(children),
            SegmentNode::Or(children) => self.evaluate_or(children),
            SegmentNode::Not(child) => !self.evaluate(child),
            leaf => downgrade(self.match_leaf(leaf)),
        }
    }

    fn evaluate_and(&self, children: &[SegmentNode]) -> bool {
        let mut location = Vec::new();
        for child in children {
            match child {
                SegmentNode::Location(field, value) => location.push((*field, value.as_str())),
                other => {
                    if !self.evaluate(other) {
                        return false;
                    }
                }
            }
        }
        location.is_empty() || downgrade(self.match_location(&location))
    }

    fn evaluate_or(&self, children: &[SegmentNode]) -> bool {
        if !children.is_empty() && children.iter().all(SegmentNode::is_user_agent) {
            let expected: Vec<(UserAgentField, &[UserAgentPattern])> = children
                .iter()
                .filter_map(|child| match child {
                    SegmentNode::UserAgent(field, patterns) => Some((*field, patterns.as_slice())),
                    _ => None,
                })
                .collect();
            return downgrade(self.match_user_agent(&expected));
        }
        children.iter().any(|child| self.evaluate(child))
    }

    fn match_leaf(&self, node: &SegmentNode) -> Result<bool, FlagError> {
        match node {
            SegmentNode::CustomVariable { key, operand } => {
                let value = self
                    .properties
                    .get(key)
                    .ok_or_else(|| SegmentationError::MissingProperty(key.clone()))?;
                Ok(operand.matches(&normalize_value(value), self.lists))
            }
            SegmentNode::User(ids) => {
                let actual = self
                    .properties
                    .get(VWO_USER_ID_PROPERTY)
                    .map(normalize_value)
                    .unwrap_or_else(|| self.context.id.clone());
                Ok(ids.iter().any(|id| *id == actual))
            }
            SegmentNode::Location(field, value) => self.match_location(&[(*field, value.as_str())]),
            SegmentNode::UserAgent(field, patterns) => {
                self.match_user_agent(&[(*field, patterns.as_slice())])
            }
            SegmentNode::Ua(operand) => {
                let raw = self
                    .context
                    .user_agent
                    .as_deref()
                    .ok_or(FlagError::EnrichmentUnavailable("user agent"))?;
                let decoded = percent_decode_str(raw).decode_utf8_lossy();
                Ok(operand.matches(decoded.trim(), self.lists))
            }
            SegmentNode::FeatureId {
                feature_id,
                expected_on,
            } => {
                let stored = self
                    .features
                    .is_some_and(|features| features.has_stored_decision(*feature_id));
                Ok(stored == *expected_on)
            }
            SegmentNode::Invalid(err) => Err(err.clone().into()),
            composite => Ok(self.evaluate(composite)),
        }
    }

    fn match_location(&self, expected: &[(LocationField, &str)]) -> Result<bool, FlagError> {
        let location = self
            .context
            .location()
            .ok_or(FlagError::EnrichmentUnavailable("location"))?;
        Ok(expected.iter().all(|(field, value)| {
            location
                .get(*field)
                .is_some_and(|actual| normalize_location(actual) == normalize_location(value))
        }))
    }

    fn match_user_agent(
        &self,
        expected: &[(UserAgentField, &[UserAgentPattern])],
    ) -> Result<bool, FlagError> {
        let parsed = self
            .context
            .parsed_user_agent()
            .ok_or(FlagError::EnrichmentUnavailable("parsed user agent"))?;
        Ok(expected.iter().any(|(field, patterns)| {
            parsed
                .get(*field)
                .is_some_and(|actual| patterns.iter().any(|pattern| pattern.matches(actual)))
        }))
    }
}

fn normalize_location(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_lowercase()
}

fn downgrade(result: Result<bool, FlagError>) -> bool {
    match result {
        Ok(matched) => matched,
        Err(err) => {
            tracing::debug!(error = %err, "segment predicate evaluated to false");
            if let FlagError::SegmentationError(_) = err {
                inc(
                    SEGMENTATION_ERROR_COUNTER,
                    &[("reason".to_string(), err.error_code().to_string())],
                    1,
                );
            }
            false
        }
    }
}
