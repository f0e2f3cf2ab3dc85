pub mod errors;
pub mod types;

use std::collections::HashMap;

use serde_json::Value;

use crate::context::UserContext;
use crate::events::NoopEventSink;
use crate::flags::flag_evaluation::evaluate_with;
use crate::segmentation::list_membership::NoListMembership;
use crate::segmentation::segment_matching::SegmentEvaluator;
use crate::segmentation::segment_models::Segments;
use crate::settings::settings_models::Settings;
use crate::storage::StorageConnector;
use types::FlagResult;

/// Decides whether `feature_key` is enabled for the user described by
/// `context`, reading and writing sticky decisions through `storage`.
///
/// Events are dropped and `inlist` operands never match. Use
/// [`crate::FlagEvaluator`] to plug in an event sink or list membership.
pub fn evaluate_flag(
    settings: &Settings,
    feature_key: &str,
    context: &UserContext,
    storage: &dyn StorageConnector,
) -> FlagResult {
    evaluate_with(
        settings,
        feature_key,
        context,
        storage,
        &NoopEventSink,
        &NoListMembership,
    )
}

/// Evaluates a segmentation DSL document against `properties` and the
/// enrichment already present on `context`. Malformed DSL yields `false`.
pub fn evaluate_segmentation(
    dsl: &Value,
    properties: &HashMap<String, Value>,
    context: &UserContext,
) -> bool {
    let segments = Segments::from(dsl.clone());
    SegmentEvaluator::new(properties, context, &NoListMembership).matches(&segments)
}
