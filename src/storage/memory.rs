//! In-memory storage backend.
//!
//! Thread-safe, partitioned per user: each user's rows live behind their own
//! `RwLock`, so refreshes for different users never contend. The only shared
//! locks are the partition directory and the id index, each held briefly.
//!
//! Lock order: partition, then index. Readers never hold both.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::context::UserId;
use crate::recommendation::{Feedback, Recommendation, RecommendationId};
use crate::storage::traits::{
    FeedbackOutcome, RecommendationQuery, RecommendationStore, RefreshCommit, RefreshOutcome,
    StorageError,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct UserPartition {
    generation: u64,
    /// Insertion order.
    rows: Vec<Recommendation>,
    feedback: Vec<Feedback>,
}

/// Thread-safe in-memory recommendation store.
#[derive(Debug, Default)]
pub struct InMemoryRecommendationStore {
    partitions: RwLock<HashMap<UserId, Arc<RwLock<UserPartition>>>>,
    index: RwLock<HashMap<RecommendationId, UserId>>,
}

impl InMemoryRecommendationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, user_id: UserId) -> Result<Option<Arc<RwLock<UserPartition>>>, StorageError> {
        let dir = self
            .partitions
            .read()
            .map_err(|_| lock_err("partitions.read"))?;
        Ok(dir.get(&user_id).cloned())
    }

    fn partition_or_create(&self, user_id: UserId) -> Result<Arc<RwLock<UserPartition>>, StorageError> {
        if let Some(p) = self.partition(user_id)? {
            return Ok(p);
        }
        let mut dir = self
            .partitions
            .write()
            .map_err(|_| lock_err("partitions.write"))?;
        Ok(dir.entry(user_id).or_default().clone())
    }

    fn owner_of(&self, id: RecommendationId) -> Result<Option<UserId>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("index.read"))?;
        Ok(index.get(&id).copied())
    }
}

impl RecommendationStore for InMemoryRecommendationStore {
    fn generation(&self, user_id: UserId) -> Result<u64, StorageError> {
        let Some(partition) = self.partition(user_id)? else {
            return Ok(0);
        };
        let state = partition.read().map_err(|_| lock_err("recommendation.generation"))?;
        Ok(state.generation)
    }

    fn list(
        &self,
        user_id: UserId,
        query: &RecommendationQuery,
    ) -> Result<Vec<Recommendation>, StorageError> {
        let Some(partition) = self.partition(user_id)? else {
            return Ok(Vec::new());
        };
        let state = partition.read().map_err(|_| lock_err("recommendation.list"))?;
        let mut out: Vec<Recommendation> = state
            .rows
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        // Stable: insertion order survives within a generation.
        out.sort_by(|a, b| b.generation.cmp(&a.generation));
        Ok(out)
    }

    fn get(&self, id: RecommendationId) -> Result<Option<Recommendation>, StorageError> {
        let Some(user_id) = self.owner_of(id)? else {
            return Ok(None);
        };
        let Some(partition) = self.partition(user_id)? else {
            return Ok(None);
        };
        let state = partition.read().map_err(|_| lock_err("recommendation.get"))?;
        Ok(state.rows.iter().find(|r| r.id == id).cloned())
    }

    fn commit_refresh(&self, commit: RefreshCommit) -> Result<RefreshOutcome, StorageError> {
        let partition = self.partition_or_create(commit.user_id)?;
        let mut state = partition
            .write()
            .map_err(|_| lock_err("recommendation.commit_refresh"))?;

        if state.generation != commit.expected_generation {
            return Err(StorageError::GenerationConflict {
                user_id: commit.user_id,
                expected: commit.expected_generation,
                actual: state.generation,
            });
        }

        let generation = state.generation + 1;
        let inserted: Vec<Recommendation> = commit
            .candidates
            .into_iter()
            .map(|card| Recommendation::new(commit.user_id, card, generation, commit.at))
            .collect();

        {
            let mut index = self.index.write().map_err(|_| lock_err("index.write"))?;
            if let Some(dup) = inserted.iter().find(|r| index.contains_key(&r.id)) {
                return Err(StorageError::DuplicateKey(dup.id.to_string()));
            }
            for rec in &inserted {
                index.insert(rec.id, commit.user_id);
            }
        }

        // Nothing below can fail.
        let mut expired = 0;
        for row in state.rows.iter_mut() {
            if row.is_active() && row.expire(commit.at) {
                expired += 1;
            }
        }

        state.rows.extend(inserted.iter().cloned());
        state.generation = generation;

        debug!(
            user_id = %commit.user_id,
            farm_id = ?commit.farm_id,
            generation,
            expired,
            inserted = inserted.len(),
            "refresh committed"
        );

        Ok(RefreshOutcome {
            generation,
            expired,
            inserted,
        })
    }

    fn expire_elapsed(&self, user_id: UserId, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let Some(partition) = self.partition(user_id)? else {
            return Ok(0);
        };
        let mut state = partition
            .write()
            .map_err(|_| lock_err("recommendation.expire_elapsed"))?;
        let mut expired = 0;
        for row in state.rows.iter_mut() {
            if row.is_active() && row.card.is_elapsed(now) && row.expire(now) {
                expired += 1;
            }
        }
        Ok(expired)
    }

    fn record_feedback(&self, feedback: Feedback) -> Result<FeedbackOutcome, StorageError> {
        let id = feedback.recommendation_id;
        let not_found = || StorageError::RecommendationNotFound(id);

        let owner = self.owner_of(id)?.ok_or_else(not_found)?;
        if owner != feedback.user_id {
            return Err(not_found());
        }
        let partition = self.partition(owner)?.ok_or_else(not_found)?;
        let mut state = partition
            .write()
            .map_err(|_| lock_err("recommendation.record_feedback"))?;

        if state.feedback.iter().any(|f| f.id == feedback.id) {
            return Err(StorageError::DuplicateKey(feedback.id.to_string()));
        }

        let row = state
            .rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(not_found)?;
        let transitioned = feedback
            .feedback_type
            .target_status()
            .is_some_and(|target| row.transition_to(target, feedback.created_at));
        let recommendation = row.clone();

        state.feedback.push(feedback.clone());
        Ok(FeedbackOutcome {
            feedback,
            recommendation,
            transitioned,
        })
    }

    fn list_feedback(&self, id: RecommendationId) -> Result<Vec<Feedback>, StorageError> {
        let Some(owner) = self.owner_of(id)? else {
            return Ok(Vec::new());
        };
        let Some(partition) = self.partition(owner)? else {
            return Ok(Vec::new());
        };
        let state = partition
            .read()
            .map_err(|_| lock_err("recommendation.list_feedback"))?;
        Ok(state
            .feedback
            .iter()
            .filter(|f| f.recommendation_id == id)
            .cloned()
            .collect())
    }

    fn resolved_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Recommendation>, StorageError> {
        let Some(partition) = self.partition(user_id)? else {
            return Ok(Vec::new());
        };
        let state = partition
            .read()
            .map_err(|_| lock_err("recommendation.resolved_since"))?;
        Ok(state
            .rows
            .iter()
            .filter(|r| r.resolved_at().is_some_and(|at| at >= since))
            .cloned()
            .collect())
    }
}
