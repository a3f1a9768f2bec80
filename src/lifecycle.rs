//! Recommendation lifecycle: cache-or-regenerate, forced refresh and
//! feedback transitions.
//!
//! The lifecycle owns no state of its own. Everything durable lives in the
//! [`RecommendationStore`]; the only per-user coordination is the store's
//! generation compare-and-swap.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::{ContextBuilder, FactSourceKind, FarmId, UserId};
use crate::engine::{rank_order, RuleFailure, RulesEngine};
use crate::error::{DseError, DseResult};
use crate::recommendation::{
    Feedback, FeedbackId, FeedbackType, Priority, Recommendation, RecommendationId,
    RecommendationStatus,
};
use crate::rule::RuleCategory;
use crate::storage::{
    FeedbackOutcome, RecommendationQuery, RecommendationStore, RefreshCommit, StorageError,
};
use crate::time::{Clock, SystemClock};

/// Decides whether a persisted set is recent enough to serve without
/// re-evaluating.
pub trait FreshnessPolicy: Send + Sync {
    /// Whether a row created at `created_at` is still fresh at `now`.
    fn is_fresh(&self, now: DateTime<Utc>, created_at: DateTime<Utc>) -> bool;
}

/// Fresh while `created_at` is within a fixed window before `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFreshness {
    window: Duration,
}

impl WindowFreshness {
    /// Default window: one hour.
    pub const DEFAULT_WINDOW_SECS: i64 = 3600;

    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self { window }
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}

impl Default for WindowFreshness {
    fn default() -> Self {
        Self::new(Duration::seconds(Self::DEFAULT_WINDOW_SECS))
    }
}

impl FreshnessPolicy for WindowFreshness {
    fn is_fresh(&self, now: DateTime<Utc>, created_at: DateTime<Utc>) -> bool {
        now.signed_duration_since(created_at) < self.window
    }
}

/// Where a returned set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetSource {
    /// Served from persisted rows; no evaluation ran.
    Cache,
    /// A refresh ran for this request.
    Generated,
}

/// Read-path filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecommendationFilters {
    pub category: Option<RuleCategory>,
    pub priority: Option<Priority>,
    /// Also return EXPIRED rows. Freshness is always judged on ACTIVE rows.
    pub include_expired: bool,
}

impl RecommendationFilters {
    fn query(self, farm_id: Option<FarmId>) -> RecommendationQuery {
        RecommendationQuery::active()
            .with_farm(farm_id)
            .with_category(self.category)
            .with_priority(self.priority)
    }

    fn output_query(self, farm_id: Option<FarmId>) -> RecommendationQuery {
        let statuses = if self.include_expired {
            vec![RecommendationStatus::Active, RecommendationStatus::Expired]
        } else {
            vec![RecommendationStatus::Active]
        };
        self.query(farm_id).with_statuses(statuses)
    }
}

/// Result of [`RecommendationLifecycle::get_or_refresh`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationSet {
    /// Ranked.
    pub recommendations: Vec<Recommendation>,
    pub source: SetSource,
}

/// Result of a committed refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub generation: u64,
    /// Rows moved from ACTIVE to EXPIRED by this refresh.
    pub expired: usize,
    /// Newly inserted ACTIVE rows, ranked.
    pub inserted: Vec<Recommendation>,
    /// Candidates dropped because the user recently resolved the same thing.
    pub suppressed: usize,
    pub failures: Vec<RuleFailure>,
    pub degraded: Vec<FactSourceKind>,
}

impl RefreshSummary {
    /// Number of recommendations now active from this refresh.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inserted.len()
    }
}

/// Caller-supplied feedback, before an id and timestamp are assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackInput {
    pub recommendation_id: RecommendationId,
    pub feedback_type: FeedbackType,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub action_taken: Option<String>,
    #[serde(default)]
    pub outcome_notes: Option<String>,
}

impl FeedbackInput {
    #[must_use]
    pub fn new(recommendation_id: RecommendationId, feedback_type: FeedbackType) -> Self {
        Self {
            recommendation_id,
            feedback_type,
            rating: None,
            comment: None,
            action_taken: None,
            outcome_notes: None,
        }
    }

    #[must_use]
    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Per-user recommendation lifecycle manager.
pub struct RecommendationLifecycle {
    store: Arc<dyn RecommendationStore>,
    engine: Arc<RulesEngine>,
    contexts: ContextBuilder,
    clock: Arc<dyn Clock>,
    freshness: Arc<dyn FreshnessPolicy>,
    suppression: Duration,
}

impl std::fmt::Debug for RecommendationLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendationLifecycle")
            .field("model_version", &self.engine.model_version())
            .field("suppression", &self.suppression)
            .finish_non_exhaustive()
    }
}

impl RecommendationLifecycle {
    /// Default suppression window for recently resolved recommendations.
    pub const DEFAULT_SUPPRESSION_DAYS: i64 = 7;

    /// Creates a lifecycle with the system clock, the one-hour freshness
    /// window and the default suppression window.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        engine: Arc<RulesEngine>,
        contexts: ContextBuilder,
    ) -> Self {
        Self {
            store,
            engine,
            contexts,
            clock: Arc::new(SystemClock),
            freshness: Arc::new(WindowFreshness::default()),
            suppression: Duration::days(Self::DEFAULT_SUPPRESSION_DAYS),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_freshness(mut self, freshness: Arc<dyn FreshnessPolicy>) -> Self {
        self.freshness = freshness;
        self
    }

    /// A zero window disables suppression.
    #[must_use]
    pub fn with_suppression_window(mut self, window: Duration) -> Self {
        self.suppression = window;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecommendationStore> {
        &self.store
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<RulesEngine> {
        &self.engine
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Serve the persisted set if it is fresh, otherwise regenerate.
    ///
    /// Elapsed rows are expired before freshness is judged. The set is fresh
    /// when it is non-empty and at least one ACTIVE row passes the freshness
    /// policy.
    ///
    /// # Errors
    ///
    /// Context and storage errors from a regeneration; see [`Self::refresh`].
    pub fn get_or_refresh(
        &self,
        user_id: UserId,
        farm_id: Option<FarmId>,
        filters: RecommendationFilters,
    ) -> DseResult<RecommendationSet> {
        let now = self.clock.now();
        let elapsed = self.store.expire_elapsed(user_id, now)?;
        if elapsed > 0 {
            debug!(user_id = %user_id, expired = elapsed, "expired elapsed recommendations");
        }

        let active = self.store.list(user_id, &filters.query(farm_id))?;
        let fresh = active
            .iter()
            .any(|r| self.freshness.is_fresh(now, r.created_at));

        let source = if fresh {
            debug!(user_id = %user_id, count = active.len(), "serving cached recommendations");
            SetSource::Cache
        } else {
            self.refresh(user_id, farm_id)?;
            SetSource::Generated
        };

        let mut recommendations = if fresh && !filters.include_expired {
            active
        } else {
            self.store.list(user_id, &filters.output_query(farm_id))?
        };
        recommendations.sort_by(|a, b| rank_order(&a.card, &b.card));

        Ok(RecommendationSet {
            recommendations,
            source,
        })
    }

    /// Regenerate unconditionally and commit expire-then-insert, even when
    /// no candidates match.
    ///
    /// A generation conflict retries the whole refresh once.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `UpstreamUnavailable` from context building.
    /// - `LifecycleConflict` if the retry also loses the race.
    /// - `Storage` for backend failures.
    pub fn refresh(&self, user_id: UserId, farm_id: Option<FarmId>) -> DseResult<RefreshSummary> {
        match self.try_refresh(user_id, farm_id) {
            Err(DseError::Storage(StorageError::GenerationConflict { expected, actual, .. })) => {
                warn!(
                    user_id = %user_id,
                    expected,
                    actual,
                    "refresh lost a generation race, retrying"
                );
            }
            other => return other,
        }
        match self.try_refresh(user_id, farm_id) {
            Err(DseError::Storage(StorageError::GenerationConflict { .. })) => {
                Err(DseError::LifecycleConflict {
                    user_id: user_id.to_string(),
                })
            }
            other => other,
        }
    }

    fn try_refresh(&self, user_id: UserId, farm_id: Option<FarmId>) -> DseResult<RefreshSummary> {
        let now = self.clock.now();
        let expected_generation = self.store.generation(user_id)?;
        let ctx = self.contexts.build(user_id, farm_id, now)?;
        let report = self.engine.evaluate(&ctx);

        let mut candidates = report.candidates;
        let mut suppressed = 0;
        if self.suppression > Duration::zero() {
            let resolved: HashSet<_> = self
                .store
                .resolved_since(
                    user_id,
                    now.checked_sub_signed(self.suppression)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                )?
                .iter()
                .map(|r| r.card.dedup_key())
                .collect();
            let before = candidates.len();
            candidates.retain(|c| !resolved.contains(&c.dedup_key()));
            suppressed = before - candidates.len();
        }

        let outcome = self.store.commit_refresh(RefreshCommit {
            user_id,
            farm_id,
            expected_generation,
            at: now,
            candidates,
        })?;

        info!(
            user_id = %user_id,
            generation = outcome.generation,
            expired = outcome.expired,
            inserted = outcome.inserted.len(),
            suppressed,
            failures = report.failures.len(),
            degraded = ctx.degraded().len(),
            "recommendations refreshed"
        );

        Ok(RefreshSummary {
            generation: outcome.generation,
            expired: outcome.expired,
            inserted: outcome.inserted,
            suppressed,
            failures: report.failures,
            degraded: ctx.degraded().to_vec(),
        })
    }

    /// Record feedback and apply its status transition.
    ///
    /// # Errors
    ///
    /// - `NotFound("recommendation")` if absent or owned by someone else.
    pub fn apply_feedback(&self, user_id: UserId, input: FeedbackInput) -> DseResult<FeedbackOutcome> {
        let id = input.recommendation_id;
        let feedback = Feedback {
            id: FeedbackId::new(),
            recommendation_id: id,
            user_id,
            feedback_type: input.feedback_type,
            rating: input.rating,
            comment: input.comment,
            action_taken: input.action_taken,
            outcome_notes: input.outcome_notes,
            created_at: self.clock.now(),
        };
        let outcome = self.store.record_feedback(feedback).map_err(|e| match e {
            StorageError::RecommendationNotFound(_) => DseError::not_found("recommendation", id),
            other => DseError::Storage(other),
        })?;
        if outcome.transitioned {
            info!(
                user_id = %user_id,
                recommendation_id = %id,
                status = outcome.recommendation.status.as_str(),
                "recommendation resolved by feedback"
            );
        }
        Ok(outcome)
    }
}
