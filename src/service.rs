//! Request-level operations exposed to the transport layer.
//!
//! Every operation takes the authenticated caller, if any. Ownership is
//! enforced here: a resource belonging to someone else is reported exactly
//! like a missing one. Input is validated before anything is evaluated.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::RuleCatalog;
use crate::config::DseConfig;
use crate::context::{ContextBuilder, FarmDataSource, FarmId, UserId};
use crate::engine::RulesEngine;
use crate::error::{DseError, DseResult, ValidationError};
use crate::explain::{Explainer, Explanation};
use crate::lifecycle::{
    FeedbackInput, RecommendationFilters, RecommendationLifecycle, RecommendationSet,
    RefreshSummary, WindowFreshness,
};
use crate::recommendation::{Priority, RecommendationId};
use crate::rule::RuleCategory;
use crate::storage::{FeedbackOutcome, RecommendationStore};
use crate::time::Clock;

/// Feedback as submitted by a caller.
pub type FeedbackRequest = FeedbackInput;

/// Parameters of [`DecisionSupport::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListRequest {
    pub farm_id: Option<FarmId>,
    pub category: Option<RuleCategory>,
    pub priority: Option<Priority>,
    pub include_expired: bool,
}

impl ListRequest {
    #[must_use]
    pub fn for_farm(farm_id: FarmId) -> Self {
        Self {
            farm_id: Some(farm_id),
            ..Self::default()
        }
    }

    fn filters(self) -> RecommendationFilters {
        RecommendationFilters {
            category: self.category,
            priority: self.priority,
            include_expired: self.include_expired,
        }
    }
}

/// The decision-support facade.
#[derive(Debug)]
pub struct DecisionSupport {
    lifecycle: RecommendationLifecycle,
    explainer: Explainer,
    max_comment_len: usize,
}

impl DecisionSupport {
    #[must_use]
    pub fn new(lifecycle: RecommendationLifecycle, explainer: Explainer) -> Self {
        Self {
            lifecycle,
            explainer,
            max_comment_len: DseConfig::default().max_feedback_comment_len,
        }
    }

    /// Wire every component from configuration.
    ///
    /// # Errors
    ///
    /// `Validation` if the configuration is out of range.
    pub fn from_config(
        config: &DseConfig,
        catalog: Arc<RuleCatalog>,
        source: Arc<dyn FarmDataSource>,
        store: Arc<dyn RecommendationStore>,
    ) -> DseResult<Self> {
        config.validate()?;
        let engine = Arc::new(RulesEngine::new(
            Arc::clone(&catalog),
            &config.model_version_label,
        ));
        let contexts = ContextBuilder::new(source).with_finance_window(config.finance_window());
        let lifecycle = RecommendationLifecycle::new(Arc::clone(&store), engine, contexts)
            .with_freshness(Arc::new(WindowFreshness::new(config.freshness_window())))
            .with_suppression_window(config.suppression_window());
        let explainer = Explainer::new(store, catalog);
        Ok(Self {
            lifecycle,
            explainer,
            max_comment_len: config.max_feedback_comment_len,
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.lifecycle = self.lifecycle.with_clock(clock);
        self
    }

    #[must_use]
    pub fn lifecycle(&self) -> &RecommendationLifecycle {
        &self.lifecycle
    }

    /// The caller's recommendations, from cache when fresh.
    ///
    /// # Errors
    ///
    /// `Unauthenticated`, `NotFound` for a farm the caller does not own, and
    /// whatever a regeneration surfaces.
    pub fn list(&self, caller: Option<UserId>, request: ListRequest) -> DseResult<RecommendationSet> {
        let user_id = authenticate(caller)?;
        self.lifecycle
            .get_or_refresh(user_id, request.farm_id, request.filters())
    }

    /// Force regeneration.
    ///
    /// # Errors
    ///
    /// `Unauthenticated`, `NotFound`, `LifecycleConflict`.
    pub fn refresh(&self, caller: Option<UserId>, farm_id: Option<FarmId>) -> DseResult<RefreshSummary> {
        let user_id = authenticate(caller)?;
        self.lifecycle.refresh(user_id, farm_id)
    }

    /// Explain one of the caller's recommendations.
    ///
    /// # Errors
    ///
    /// `Unauthenticated`; `NotFound` if absent or not the caller's.
    pub fn explain(&self, caller: Option<UserId>, id: RecommendationId) -> DseResult<Explanation> {
        let user_id = authenticate(caller)?;
        let rec = self
            .lifecycle
            .store()
            .get(id)?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| DseError::not_found("recommendation", id))?;
        Ok(self.explainer.explain_recommendation(&rec))
    }

    /// Record feedback on one of the caller's recommendations.
    ///
    /// # Errors
    ///
    /// `Unauthenticated`; `Validation` with field detail; `NotFound` if the
    /// recommendation is absent or not the caller's.
    pub fn feedback(&self, caller: Option<UserId>, request: FeedbackRequest) -> DseResult<FeedbackOutcome> {
        let user_id = authenticate(caller)?;
        self.validate_feedback(&request)?;
        self.lifecycle.apply_feedback(user_id, request)
    }

    fn validate_feedback(&self, request: &FeedbackRequest) -> Result<(), ValidationError> {
        if let Some(rating) = request.rating {
            if !(1..=5).contains(&rating) {
                return Err(ValidationError::RatingOutOfRange { rating });
            }
        }
        if let Some(comment) = &request.comment {
            if comment.chars().count() > self.max_comment_len {
                return Err(ValidationError::FieldTooLong {
                    field: "comment".to_string(),
                    max_length: self.max_comment_len,
                });
            }
        }
        for (field, value) in [
            ("comment", &request.comment),
            ("actionTaken", &request.action_taken),
            ("outcomeNotes", &request.outcome_notes),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ValidationError::InvalidField {
                    field: field.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn authenticate(caller: Option<UserId>) -> DseResult<UserId> {
    caller.ok_or_else(|| {
        debug!("rejecting unauthenticated request");
        DseError::Unauthenticated
    })
}
