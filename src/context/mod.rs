//! Fact/context building.
//!
//! An [`EvaluationContext`] is the read-only snapshot of one user's farm
//! state. It is assembled by [`ContextBuilder`] from a [`FarmDataSource`] and
//! read by the condition evaluator through a [`FactView`].

mod builder;
mod facts;
mod source;
mod view;

pub use builder::ContextBuilder;
pub use facts::{
    CropFact, CropStatus, EvaluationContext, FactSourceKind, FarmId, FarmRecord, FinanceSummary,
    LivestockFact, LivestockStatus, MarketPrice, MarketSummary, Season, SeasonFact, UserId,
    UserProfile, WeatherSummary,
};
pub use source::{FarmDataSource, FarmSnapshot, InMemoryFarmData, LedgerEntry, LedgerKind};
pub use view::{Binding, FactView};
