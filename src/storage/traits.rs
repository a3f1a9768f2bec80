//! Abstract storage traits for recommendations and feedback.
//!
//! The relational store behind the real service lives outside this crate.
//! These traits define the contract it must meet; the in-memory backend is
//! the reference implementation used in tests and embedded use.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::context::{FarmId, UserId};
use crate::recommendation::{
    Feedback, Priority, Recommendation, RecommendationCard, RecommendationId,
    RecommendationStatus,
};
use crate::rule::RuleCategory;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Recommendation not found (or not owned by the acting user).
    #[error("Recommendation not found: {0}")]
    RecommendationNotFound(RecommendationId),

    /// The per-user generation moved since the refresh read it.
    #[error("Generation conflict for user {user_id}: expected {expected}, found {actual}")]
    GenerationConflict {
        user_id: UserId,
        expected: u64,
        actual: u64,
    },

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Filter for listing a user's recommendations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecommendationQuery {
    pub farm_id: Option<FarmId>,
    pub category: Option<RuleCategory>,
    pub priority: Option<Priority>,
    /// Empty means any status.
    pub statuses: Vec<RecommendationStatus>,
}

impl RecommendationQuery {
    /// ACTIVE rows only.
    #[must_use]
    pub fn active() -> Self {
        Self {
            statuses: vec![RecommendationStatus::Active],
            ..Self::default()
        }
    }

    /// Rows in any status.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_farm(mut self, farm_id: Option<FarmId>) -> Self {
        self.farm_id = farm_id;
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: Option<RuleCategory>) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Option<Priority>) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_statuses(mut self, statuses: Vec<RecommendationStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    /// Whether a row passes this filter.
    #[must_use]
    pub fn matches(&self, rec: &Recommendation) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&rec.status))
            && self.farm_id.map_or(true, |f| rec.card.farm_id == Some(f))
            && self.category.map_or(true, |c| rec.card.category == c)
            && self.priority.map_or(true, |p| rec.card.priority == p)
    }
}

/// One generation's worth of new recommendations.
#[derive(Debug, Clone)]
pub struct RefreshCommit {
    pub user_id: UserId,
    /// Farm the candidates were evaluated for, if scoped.
    pub farm_id: Option<FarmId>,
    /// Generation observed before evaluation started.
    pub expected_generation: u64,
    pub at: DateTime<Utc>,
    pub candidates: Vec<RecommendationCard>,
}

/// Result of a committed refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub generation: u64,
    pub expired: usize,
    pub inserted: Vec<Recommendation>,
}

/// Result of recording feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackOutcome {
    pub feedback: Feedback,
    /// The recommendation after any transition.
    pub recommendation: Recommendation,
    /// Whether this feedback changed the recommendation's status.
    pub transitioned: bool,
}

/// Storage for persisted recommendations and their feedback.
///
/// # Atomicity
/// - `commit_refresh` applies expire-then-insert as one unit guarded by a
///   compare-and-swap on the user's generation. Readers see the old set or
///   the new set, never a mixture.
/// - `record_feedback` inserts the feedback row and applies the lifecycle
///   transition as one unit.
pub trait RecommendationStore: Send + Sync {
    /// Current generation for a user (0 before the first refresh).
    fn generation(&self, user_id: UserId) -> Result<u64, StorageError>;

    /// A user's rows passing `query`, newest generation first, insertion
    /// order within a generation.
    fn list(
        &self,
        user_id: UserId,
        query: &RecommendationQuery,
    ) -> Result<Vec<Recommendation>, StorageError>;

    /// Get a row by ID.
    fn get(&self, id: RecommendationId) -> Result<Option<Recommendation>, StorageError>;

    /// Atomically expire every ACTIVE row of the user and insert
    /// `candidates` as ACTIVE under a new generation.
    ///
    /// The commit's farm scope narrows what was evaluated, not what is
    /// expired.
    ///
    /// # Errors
    /// - `GenerationConflict` if the generation is no longer
    ///   `expected_generation`; nothing is written.
    fn commit_refresh(&self, commit: RefreshCommit) -> Result<RefreshOutcome, StorageError>;

    /// Expire a user's ACTIVE rows whose `valid_until` has passed. Returns the
    /// number expired.
    fn expire_elapsed(&self, user_id: UserId, now: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Record feedback and apply its lifecycle transition, if any.
    ///
    /// Terminal rows are never transitioned again; the feedback is still
    /// recorded.
    ///
    /// # Errors
    /// - `RecommendationNotFound` if the row is absent or belongs to another
    ///   user.
    fn record_feedback(&self, feedback: Feedback) -> Result<FeedbackOutcome, StorageError>;

    /// Feedback rows for a recommendation, oldest first.
    fn list_feedback(&self, id: RecommendationId) -> Result<Vec<Feedback>, StorageError>;

    /// Rows the user COMPLETED or DISMISSED at or after `since`.
    fn resolved_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Recommendation>, StorageError>;
}
