use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::api::errors::FlagError;
use crate::api::types::{DecidedVariation, FlagDecisionReason, FlagResult};
use crate::campaigns::campaign_decision::get_variation_allotted;
use crate::context::UserContext;
use crate::events::{DecisionEvent, EventSink, NoopEventSink};
use crate::flags::evaluation_state::{EvaluationContext, EvaluationState, RolloutDecision};
use crate::flags::rule_evaluation::evaluate_rule;
use crate::metrics::consts::{
    FLAG_EVALUATION_COUNTER, FLAG_EVALUATION_ERROR_COUNTER, FLAG_EVALUATION_TIME,
};
use crate::metrics::utils::{inc, TimingGuard};
use crate::segmentation::list_membership::{ListMembership, NoListMembership};
use crate::segmentation::segment_matching::SegmentEvaluator;
use crate::segmentation::segment_models::Segments;
use crate::settings::settings_models::{
    Campaign, Feature, Settings, Variable, Variation, VariationId,
};
use crate::storage::{StickyRecord, StickyStore, StorageConnector};

/// Variation ids reported for a feature's impact campaign.
const IMPACT_VARIATION_ENABLED: i64 = 2;
const IMPACT_VARIATION_DISABLED: i64 = 1;

/// A cheap, shareable evaluator. Holds the collaborators only; every call
/// builds its own scratch state, so one instance can serve many threads.
#[derive(Clone)]
pub struct FlagEvaluator {
    storage: Arc<dyn StorageConnector>,
    events: Arc<dyn EventSink>,
    lists: Arc<dyn ListMembership>,
}

impl FlagEvaluator {
    pub fn new(storage: Arc<dyn StorageConnector>) -> Self {
        FlagEvaluator {
            storage,
            events: Arc::new(NoopEventSink),
            lists: Arc::new(NoListMembership),
        }
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_list_membership(mut self, lists: Arc<dyn ListMembership>) -> Self {
        self.lists = lists;
        self
    }

    pub fn evaluate(
        &self,
        settings: &Settings,
        feature_key: &str,
        user: &UserContext,
    ) -> FlagResult {
        evaluate_with(
            settings,
            feature_key,
            user,
            self.storage.as_ref(),
            self.events.as_ref(),
            self.lists.as_ref(),
        )
    }

    pub fn evaluate_segmentation(
        &self,
        dsl: &Value,
        properties: &HashMap<String, Value>,
        user: &UserContext,
    ) -> bool {
        let segments = Segments::from(dsl.clone());
        SegmentEvaluator::new(properties, user, self.lists.as_ref()).matches(&segments)
    }
}

/// Evaluates one feature for one user. Never fails: any error turns into a
/// disabled result with [`FlagDecisionReason::Error`].
pub fn evaluate_with(
    settings: &Settings,
    feature_key: &str,
    user: &UserContext,
    storage: &dyn StorageConnector,
    events: &dyn EventSink,
    lists: &dyn ListMembership,
) -> FlagResult {
    let _timer = TimingGuard::new(FLAG_EVALUATION_TIME);

    if let Err(err) = validate_input(feature_key, user) {
        warn!(feature_key, error = %err, "rejecting flag evaluation");
        record_error(&err);
        return finish(FlagResult::disabled(feature_key, FlagDecisionReason::InvalidContext));
    }

    let ctx = EvaluationContext {
        settings,
        user,
        store: StickyStore::new(storage),
        lists,
        events,
    };

    let result = match FlagEvaluation::new(&ctx).run(feature_key) {
        Ok(result) => result,
        Err(err) => {
            error!(
                feature_key,
                user_id = %user.id,
                error = %err,
                "flag evaluation failed, returning disabled"
            );
            record_error(&err);
            FlagResult::disabled(feature_key, FlagDecisionReason::Error)
        }
    };
    finish(result)
}

fn validate_input(feature_key: &str, user: &UserContext) -> Result<(), FlagError> {
    if feature_key.trim().is_empty() {
        return Err(FlagError::InputValidationError("feature key is required".to_string()));
    }
    if user.id.trim().is_empty() {
        return Err(FlagError::InputValidationError("user id is required".to_string()));
    }
    Ok(())
}

fn record_error(err: &FlagError) {
    inc(
        FLAG_EVALUATION_ERROR_COUNTER,
        &[("reason".to_string(), err.error_code().to_string())],
        1,
    );
}

fn finish(result: FlagResult) -> FlagResult {
    inc(
        FLAG_EVALUATION_COUNTER,
        &[
            ("enabled".to_string(), result.is_enabled.to_string()),
            ("reason".to_string(), result.reason.to_string()),
        ],
        1,
    );
    result
}

/// A campaign and variation picked during evaluation.
#[derive(Debug, Clone)]
struct Selection {
    decided: DecidedVariation,
    variables: Vec<Variable>,
}

impl Selection {
    fn new(campaign: &Campaign, variation: &Variation) -> Self {
        Selection {
            decided: DecidedVariation::new(campaign, variation),
            variables: variation.variables.clone(),
        }
    }

    /// Rebuilds a stored selection, preferring the feature's linked campaign
    /// so the rule key is kept.
    fn restore(
        settings: &Settings,
        feature: &Feature,
        campaign_key: &str,
        variation_id: VariationId,
    ) -> Option<Self> {
        let campaign = feature
            .linked_campaigns
            .iter()
            .find(|c| c.key == campaign_key)
            .or_else(|| settings.campaign_by_key(campaign_key))?;
        let variation = campaign.variation_by_id(variation_id)?;
        Some(Selection::new(campaign, variation))
    }
}

struct FlagEvaluation<'e, 'a> {
    ctx: &'e EvaluationContext<'a>,
    state: EvaluationState,
    rollout: Option<Selection>,
    experiment: Option<Selection>,
    reason: FlagDecisionReason,
}

impl<'e, 'a> FlagEvaluation<'e, 'a> {
    fn new(ctx: &'e EvaluationContext<'a>) -> Self {
        FlagEvaluation {
            ctx,
            state: EvaluationState::default(),
            rollout: None,
            experiment: None,
            reason: FlagDecisionReason::NoRuleMatched,
        }
    }

    fn run(mut self, feature_key: &str) -> Result<FlagResult, FlagError> {
        let ctx = self.ctx;
        let Some(feature) = ctx.settings.feature_by_key(feature_key) else {
            debug!(feature_key, "feature not found in settings");
            return Ok(FlagResult::disabled(feature_key, FlagDecisionReason::FeatureNotFound));
        };

        let stored = ctx.store.get(&feature.key, &ctx.user.id);
        let stored_rollout = stored
            .as_ref()
            .filter(|r| r.has_rollout())
            .is_some_and(|record| self.restore_rollout(feature, record));

        if let Some(record) = stored.as_ref().filter(|r| r.has_experiment()) {
            if let Some(selection) = record
                .experiment_key
                .as_deref()
                .zip(record.experiment_variation_id)
                .and_then(|(key, id)| Selection::restore(ctx.settings, feature, key, id))
            {
                debug!(feature_key, user_id = %ctx.user.id, "returning stored experiment decision");
                self.experiment = Some(selection);
                self.reason = FlagDecisionReason::StoredExperiment;
                return Ok(self.conclude(feature, true));
            }
            warn!(feature_key, "stored experiment no longer exists in settings, re-evaluating");
        }

        let experiments_unlocked = if stored_rollout {
            self.reason = FlagDecisionReason::StoredRollout;
            true
        } else if feature.has_rollout_rules() {
            self.evaluate_rollouts(feature)?
        } else {
            true
        };

        if experiments_unlocked {
            self.evaluate_experiments(feature)?;
        }

        let enabled = self.rollout.is_some() || self.experiment.is_some();
        if enabled {
            self.persist(feature, stored.as_ref());
        }
        if let Some(campaign_id) = feature.impact_campaign.as_ref().and_then(|c| c.campaign_id) {
            let variation_id = if enabled {
                IMPACT_VARIATION_ENABLED
            } else {
                IMPACT_VARIATION_DISABLED
            };
            ctx.events.emit_variation_shown(campaign_id, variation_id, ctx.user);
        }
        Ok(self.conclude(feature, enabled))
    }

    /// Restores a stored rollout decision into this call's state. Returns
    /// false when the stored campaign or variation is gone from settings.
    fn restore_rollout(&mut self, feature: &Feature, record: &StickyRecord) -> bool {
        let (Some(key), Some(variation_id)) =
            (record.rollout_key.as_deref(), record.rollout_variation_id)
        else {
            return false;
        };
        let Some(selection) = Selection::restore(self.ctx.settings, feature, key, variation_id)
        else {
            warn!(
                feature_key = %feature.key,
                rollout_key = key,
                "stored rollout no longer exists in settings"
            );
            return false;
        };
        debug!(feature_key = %feature.key, rollout_key = key, "using stored rollout decision");
        self.state.record_rollout(
            &feature.key,
            Some(RolloutDecision {
                campaign_id: selection.decided.campaign_id,
                campaign_key: key.to_string(),
                variation_id,
            }),
        );
        self.rollout = Some(selection);
        true
    }

    /// Runs rollout rules until one passes pre-segmentation; that rule alone
    /// decides, through traffic membership, whether experiments unlock.
    fn evaluate_rollouts(&mut self, feature: &Feature) -> Result<bool, FlagError> {
        let ctx = self.ctx;
        for campaign in feature.rollout_rules() {
            let outcome = evaluate_rule(ctx, &mut self.state, campaign)?;
            if !outcome.pre_segmentation_passed {
                continue;
            }
            if let Some(variation) =
                get_variation_allotted(&ctx.user.id, ctx.settings.account_id, campaign)?
            {
                debug!(
                    feature_key = %feature.key,
                    campaign_id = campaign.id,
                    "rollout rule passed"
                );
                ctx.events
                    .emit_variation_shown(campaign.id, variation.id, ctx.user);
                self.state.record_rollout(
                    &feature.key,
                    Some(RolloutDecision {
                        campaign_id: campaign.id,
                        campaign_key: campaign.key.clone(),
                        variation_id: variation.id,
                    }),
                );
                self.rollout = Some(Selection::new(campaign, variation));
                self.reason = FlagDecisionReason::RolloutMatched;
                return Ok(true);
            }
            break;
        }
        self.state.record_rollout(&feature.key, None);
        Ok(false)
    }

    fn evaluate_experiments(&mut self, feature: &Feature) -> Result<(), FlagError> {
        let ctx = self.ctx;
        for campaign in feature.experiment_rules() {
            let outcome = evaluate_rule(ctx, &mut self.state, campaign)?;
            if let Some(variation) = outcome.whitelisted_variation {
                ctx.events
                    .emit_variation_shown(campaign.id, variation.id, ctx.user);
                self.experiment = Some(Selection::new(campaign, &variation));
                self.reason = FlagDecisionReason::Whitelisted;
                return Ok(());
            }
            if !outcome.pre_segmentation_passed {
                continue;
            }
            if let Some(variation) =
                get_variation_allotted(&ctx.user.id, ctx.settings.account_id, campaign)?
            {
                debug!(
                    feature_key = %feature.key,
                    campaign_id = campaign.id,
                    variation_id = variation.id,
                    "experiment rule bucketed user"
                );
                ctx.events
                    .emit_variation_shown(campaign.id, variation.id, ctx.user);
                self.experiment = Some(Selection::new(campaign, variation));
                self.reason = FlagDecisionReason::ExperimentMatched;
            }
            return Ok(());
        }
        Ok(())
    }

    fn persist(&self, feature: &Feature, stored: Option<&StickyRecord>) {
        let ctx = self.ctx;
        let mut record = StickyRecord::new(&feature.key, &ctx.user.id);
        if let Some(rollout) = self.state.rollout_decision(&feature.key) {
            record = record.with_rollout(
                rollout.campaign_id,
                &rollout.campaign_key,
                rollout.variation_id,
            );
        }
        if let Some(experiment) = &self.experiment {
            record = record.with_experiment(
                experiment.decided.campaign_id,
                &experiment.decided.campaign_key,
                experiment.decided.id,
            );
        }
        if stored == Some(&record) {
            return;
        }
        ctx.store.set(&record);
    }

    fn conclude(self, feature: &Feature, enabled: bool) -> FlagResult {
        let ctx = self.ctx;
        let rollout_decision = self.state.rollout_decision(&feature.key);
        let event = DecisionEvent {
            feature_id: feature.id,
            feature_key: feature.key.clone(),
            user_id: ctx.user.id.clone(),
            is_enabled: enabled,
            reason: self.reason,
            rollout_id: rollout_decision.map(|r| r.campaign_id),
            rollout_key: rollout_decision.map(|r| r.campaign_key.clone()),
            rollout_variation_id: rollout_decision.map(|r| r.variation_id),
            experiment_id: self.experiment.as_ref().map(|e| e.decided.campaign_id),
            experiment_key: self.experiment.as_ref().map(|e| e.decided.campaign_key.clone()),
            experiment_variation_id: self.experiment.as_ref().map(|e| e.decided.id),
        };
        ctx.events.emit_decision(&event);

        let selection = self.experiment.or(self.rollout);
        FlagResult {
            feature_key: feature.key.clone(),
            is_enabled: enabled,
            variables: selection
                .as_ref()
                .map(|s| s.variables.clone())
                .unwrap_or_default(),
            variation: selection.map(|s| s.decided),
            reason: self.reason,
        }
    }
}
