//! Recommendation storage.
//!
//! [`RecommendationStore`] is the boundary with the external store;
//! [`InMemoryRecommendationStore`] is the in-process implementation.

mod memory;
mod traits;

pub use memory::InMemoryRecommendationStore;
pub use traits::{
    FeedbackOutcome, RecommendationQuery, RecommendationStore, RefreshCommit, RefreshOutcome,
    StorageError,
};
