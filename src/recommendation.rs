//! Recommendation data model: engine candidates, persisted rows and feedback.
//!
//! A [`RecommendationCard`] is what the engine emits. The lifecycle manager
//! wraps it into a [`Recommendation`] with status and timestamps. Status moves
//! only forward:
//!
//! ```text
//! ACTIVE ──(superseded / validUntil passed)──▶ EXPIRED
//!   │                                            │
//!   └──────(feedback)──▶ COMPLETED | DISMISSED ◀─┘
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::confidence::{Confidence, ConfidenceBand};
use crate::context::{FarmId, UserId};
use crate::rule::RuleCategory;
use crate::value::Value;

/// Unique identifier for a persisted recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecommendationId(Uuid);

impl RecommendationId {
    /// Creates a new random recommendation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for RecommendationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecommendationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a feedback row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(Uuid);

impl FeedbackId {
    /// Creates a new random feedback ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FeedbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Urgency on a fixed ordinal scale. `Urgent` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "URGENT",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of benefit acting on a recommendation brings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactType {
    YieldIncrease,
    CostSaving,
    RevenueGain,
    LossPrevention,
    RiskReduction,
    HealthImprovement,
}

impl ImpactType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::YieldIncrease => "YIELD_INCREASE",
            Self::CostSaving => "COST_SAVING",
            Self::RevenueGain => "REVENUE_GAIN",
            Self::LossPrevention => "LOSS_PREVENTION",
            Self::RiskReduction => "RISK_REDUCTION",
            Self::HealthImprovement => "HEALTH_IMPROVEMENT",
        }
    }
}

/// Estimated benefit of acting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Impact {
    #[serde(rename = "type")]
    pub impact_type: ImpactType,
    pub value: f64,
    pub unit: String,
}

/// Which rule fired and which facts it looked at.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Evidence {
    /// Never empty on an emitted candidate.
    pub rules_fired: Vec<String>,
    /// Field paths the rule read, sorted.
    pub features: Vec<String>,
    /// Resolved value of each feature at evaluation time. Absent paths are
    /// omitted.
    #[serde(default)]
    pub observed: BTreeMap<String, Value>,
    /// Version of the rule that fired.
    pub rule_version: u32,
}

impl Evidence {
    /// The firing rule code.
    #[must_use]
    pub fn primary_rule(&self) -> Option<&str> {
        self.rules_fired.first().map(String::as_str)
    }
}

/// Identity used for deduplication within one pass and across the active set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub category: RuleCategory,
    pub entity_type: String,
    pub entity_id: String,
    pub rule_code: String,
}

/// Engine output before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<FarmId>,
    pub category: RuleCategory,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    pub action_steps: Vec<String>,
    /// At least one entry.
    pub reason: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<Impact>,
    pub confidence: Confidence,
    pub confidence_label: ConfidenceBand,
    pub evidence: Evidence,
    pub model_version: String,
    pub valid_from: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    pub entity_type: String,
    pub entity_id: String,
}

impl RecommendationCard {
    #[must_use]
    pub fn rule_code(&self) -> &str {
        self.evidence.primary_rule().unwrap_or_default()
    }

    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            category: self.category,
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
            rule_code: self.rule_code().to_string(),
        }
    }

    /// True once `valid_until` has passed.
    #[must_use]
    pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|until| until <= now)
    }
}

/// Lifecycle status of a persisted recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationStatus {
    Active,
    Expired,
    Completed,
    Dismissed,
}

impl RecommendationStatus {
    /// COMPLETED and DISMISSED are never left.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Dismissed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Completed => "COMPLETED",
            Self::Dismissed => "DISMISSED",
        }
    }
}

impl fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate plus lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: RecommendationId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub card: RecommendationCard,
    pub status: RecommendationStatus,
    /// Per-user generation this row was inserted in.
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
}

impl Recommendation {
    /// A new ACTIVE row.
    #[must_use]
    pub fn new(user_id: UserId, card: RecommendationCard, generation: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: RecommendationId::new(),
            user_id,
            card,
            status: RecommendationStatus::Active,
            generation,
            created_at: now,
            updated_at: now,
            completed_at: None,
            dismissed_at: None,
            expired_at: None,
        }
    }

    pub const fn is_active(&self) -> bool {
        matches!(self.status, RecommendationStatus::Active)
    }

    /// ACTIVE → EXPIRED. Returns false for any other starting status.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = RecommendationStatus::Expired;
        self.expired_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Move to a terminal status.
    ///
    /// Returns false, leaving the row untouched, when the row is already
    /// terminal or `target` is not terminal.
    pub fn transition_to(&mut self, target: RecommendationStatus, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || !target.is_terminal() {
            return false;
        }
        self.status = target;
        match target {
            RecommendationStatus::Completed => self.completed_at = Some(now),
            RecommendationStatus::Dismissed => self.dismissed_at = Some(now),
            RecommendationStatus::Active | RecommendationStatus::Expired => {}
        }
        self.updated_at = now;
        true
    }

    /// When the row reached its current terminal status.
    #[must_use]
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            RecommendationStatus::Completed => self.completed_at,
            RecommendationStatus::Dismissed => self.dismissed_at,
            RecommendationStatus::Active | RecommendationStatus::Expired => None,
        }
    }
}

/// Kind of user reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackType {
    Helpful,
    NotHelpful,
    Completed,
    Dismissed,
    Incorrect,
}

impl FeedbackType {
    /// Lifecycle status this feedback moves a recommendation to, if any.
    #[must_use]
    pub const fn target_status(self) -> Option<RecommendationStatus> {
        match self {
            Self::Completed => Some(RecommendationStatus::Completed),
            Self::Dismissed | Self::NotHelpful => Some(RecommendationStatus::Dismissed),
            Self::Helpful | Self::Incorrect => None,
        }
    }
}

/// A recorded user reaction. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: FeedbackId,
    pub recommendation_id: RecommendationId,
    pub user_id: UserId,
    pub feedback_type: FeedbackType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn card(code: &str, entity_id: &str) -> RecommendationCard {
        let now = chrono::Utc::now();
        let confidence = Confidence::clamped(0.7);
        RecommendationCard {
            farm_id: None,
            category: RuleCategory::Crop,
            priority: Priority::Medium,
            title: format!("{code} title"),
            description: String::new(),
            action_steps: vec![],
            reason: vec!["because".to_string()],
            impact: None,
            confidence,
            confidence_label: confidence.band(),
            evidence: Evidence {
                rules_fired: vec![code.to_string()],
                features: vec![],
                observed: BTreeMap::new(),
                rule_version: 1,
            },
            model_version: "test".to_string(),
            valid_from: now,
            valid_until: None,
            entity_type: "CROP".to_string(),
            entity_id: entity_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordinal() {
        let mut ps = vec![Priority::Low, Priority::Urgent, Priority::Medium, Priority::High];
        ps.sort();
        assert_eq!(
            ps,
            vec![Priority::Urgent, Priority::High, Priority::Medium, Priority::Low]
        );
        assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), "\"URGENT\"");
    }

    #[test]
    fn test_first_terminal_transition_wins() {
        let now = Utc::now();
        let mut rec = Recommendation::new(UserId::new(), fixtures::card("R1", "c1"), 1, now);
        assert!(rec.transition_to(RecommendationStatus::Dismissed, now));
        assert!(!rec.transition_to(RecommendationStatus::Completed, now));
        assert_eq!(rec.status, RecommendationStatus::Dismissed);
        assert!(rec.completed_at.is_none());
        assert_eq!(rec.resolved_at(), Some(now));
    }

    #[test]
    fn test_expired_rows_can_still_be_resolved() {
        let now = Utc::now();
        let mut rec = Recommendation::new(UserId::new(), fixtures::card("R1", "c1"), 1, now);
        assert!(rec.expire(now));
        assert!(!rec.expire(now));
        assert!(!rec.transition_to(RecommendationStatus::Active, now));
        assert!(rec.transition_to(RecommendationStatus::Completed, now));
        assert_eq!(rec.status, RecommendationStatus::Completed);
    }

    #[test]
    fn test_feedback_targets() {
        assert_eq!(
            FeedbackType::NotHelpful.target_status(),
            Some(RecommendationStatus::Dismissed)
        );
        assert_eq!(FeedbackType::Helpful.target_status(), None);
        assert_eq!(FeedbackType::Incorrect.target_status(), None);
    }

    #[test]
    fn test_recommendation_serializes_flat() {
        let rec = Recommendation::new(UserId::new(), fixtures::card("R1", "c1"), 3, Utc::now());
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["status"], "ACTIVE");
        assert_eq!(json["priority"], "MEDIUM");
        assert_eq!(json["evidence"]["rules_fired"][0], "R1");
        let back: Recommendation = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }
}
