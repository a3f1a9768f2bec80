//! # farmdse - Decision Support Engine for farm management
//!
//! farmdse turns a snapshot of a farmer's state (crops, livestock, weather,
//! market prices, finances) into ranked, explainable recommendations by
//! evaluating a versioned catalog of authored rules.
//!
//! ## Core Concepts
//!
//! - **Context**: the read-only snapshot of one user's farm state
//! - **Rule**: a versioned condition tree paired with recommendation templates
//! - **Candidate**: an engine-produced recommendation card before persistence
//! - **Recommendation**: a persisted candidate with a lifecycle status
//! - **Evidence**: which rule fired and which context fields it read
//! - **Feedback**: a user reaction that may close a recommendation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use farmdse::{DecisionSupport, DseConfig, InMemoryFarmData, InMemoryRecommendationStore, ListRequest, RuleCatalog};
//!
//! let service = DecisionSupport::from_config(
//!     &DseConfig::default(),
//!     Arc::new(RuleCatalog::builtin()?),
//!     Arc::new(InMemoryFarmData::new()),
//!     Arc::new(InMemoryRecommendationStore::new()),
//! )?;
//! let set = service.list(Some(user_id), ListRequest::default())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod confidence;
pub mod error;
pub mod time;
pub mod value;

// Facts and rules
pub mod catalog;
pub mod condition;
pub mod context;
pub mod rule;

// Evaluation and persistence
pub mod engine;
pub mod recommendation;
pub mod storage;

// Request-level behaviour
pub mod config;
pub mod explain;
pub mod lifecycle;
pub mod service;

// Re-export primary types at crate root for convenience
pub use catalog::RuleCatalog;
pub use condition::{Condition, ConditionGroup, Operator};
pub use confidence::{Confidence, ConfidenceBand};
pub use config::DseConfig;
pub use context::{
	ContextBuilder, CropFact, EvaluationContext, FactSourceKind, FarmDataSource, FarmId,
	FarmRecord, FarmSnapshot, InMemoryFarmData, LivestockFact, UserId, UserProfile,
};
pub use engine::{EvaluationReport, RuleFailure, RulesEngine};
pub use error::{DseError, DseResult, EvaluationError, SourceError, ValidationError};
pub use explain::{Explainer, Explanation, RuleInfo};
pub use lifecycle::{
	FeedbackInput, FreshnessPolicy, RecommendationFilters, RecommendationLifecycle,
	RecommendationSet, RefreshSummary, SetSource, WindowFreshness,
};
pub use recommendation::{
	Evidence, Feedback, FeedbackType, Impact, ImpactType, Priority, Recommendation,
	RecommendationCard, RecommendationId, RecommendationStatus,
};
pub use rule::{Rule, RuleBuilder, RuleCategory, RuleScope};
pub use service::{DecisionSupport, FeedbackRequest, ListRequest};
pub use storage::{InMemoryRecommendationStore, RecommendationQuery, RecommendationStore, StorageError};
pub use time::{Clock, FixedClock, SystemClock};
pub use value::Value;
