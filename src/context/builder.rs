//! Assembles an [`EvaluationContext`] from a [`FarmDataSource`].
//!
//! Identity is mandatory. Every other sub-source is optional: a failure is
//! logged, recorded in [`EvaluationContext::degraded`] and replaced with the
//! neutral default, so conditions over it degrade to "not matched".

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::context::facts::{
    EvaluationContext, FactSourceKind, FarmId, FinanceSummary, MarketSummary, UserId,
    WeatherSummary,
};
use crate::context::source::FarmDataSource;
use crate::error::{DseError, DseResult, SourceError};

/// Builds immutable evaluation contexts.
#[derive(Clone)]
pub struct ContextBuilder {
    source: Arc<dyn FarmDataSource>,
    finance_window: Duration,
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("finance_window", &self.finance_window)
            .finish_non_exhaustive()
    }
}

impl ContextBuilder {
    /// Default trailing window for finance aggregates.
    pub const DEFAULT_FINANCE_WINDOW_DAYS: i64 = 90;

    #[must_use]
    pub fn new(source: Arc<dyn FarmDataSource>) -> Self {
        Self {
            source,
            finance_window: Duration::days(Self::DEFAULT_FINANCE_WINDOW_DAYS),
        }
    }

    /// Override the trailing finance window.
    #[must_use]
    pub fn with_finance_window(mut self, window: Duration) -> Self {
        self.finance_window = window;
        self
    }

    /// Build a context for `user_id`, optionally scoped to one farm.
    ///
    /// # Errors
    ///
    /// - `NotFound("user")` if the identity source does not know the user.
    /// - `NotFound("farm")` if `farm_id` is not owned by the user.
    /// - `UpstreamUnavailable` if identity resolution itself fails, or if the
    ///   farm list cannot be read while a farm scope was requested.
    pub fn build(
        &self,
        user_id: UserId,
        farm_id: Option<FarmId>,
        now: DateTime<Utc>,
    ) -> DseResult<EvaluationContext> {
        let profile = self
            .source
            .user_profile(user_id)?
            .ok_or_else(|| DseError::not_found("user", user_id))?;

        let mut degraded = Vec::new();

        let farms = match self.source.farms(user_id) {
            Ok(farms) => farms,
            Err(e) if farm_id.is_some() => return Err(e.into()),
            Err(e) => {
                note_degraded(&mut degraded, user_id, &e);
                Vec::new()
            }
        };
        let farms = match farm_id {
            Some(id) => {
                let farm = farms
                    .into_iter()
                    .find(|f| f.id == id)
                    .ok_or_else(|| DseError::not_found("farm", id))?;
                vec![farm]
            }
            None => farms,
        };

        let crops = self
            .source
            .crops(user_id, farm_id)
            .unwrap_or_else(|e| {
                note_degraded(&mut degraded, user_id, &e);
                Vec::new()
            });
        let livestock = self
            .source
            .livestock(user_id, farm_id)
            .unwrap_or_else(|e| {
                note_degraded(&mut degraded, user_id, &e);
                Vec::new()
            });

        let region = farm_id
            .and_then(|id| farms.iter().find(|f| f.id == id))
            .and_then(|f| f.region.clone())
            .or_else(|| profile.region.clone());
        let weather = match self.source.weather(region.as_deref()) {
            Ok(Some(w)) => w,
            Ok(None) => WeatherSummary::unavailable(),
            Err(e) => {
                note_degraded(&mut degraded, user_id, &e);
                WeatherSummary::unavailable()
            }
        };

        let products: Vec<String> = crops
            .iter()
            .filter(|c| !c.status.is_terminal())
            .map(|c| c.crop_type.clone())
            .chain(
                livestock
                    .iter()
                    .filter(|l| !l.status.is_terminal())
                    .map(|l| l.species.clone()),
            )
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let market = if products.is_empty() {
            MarketSummary::default()
        } else {
            match self.source.market_prices(&products) {
                Ok(prices) => MarketSummary::from_prices(prices),
                Err(e) => {
                    note_degraded(&mut degraded, user_id, &e);
                    MarketSummary::default()
                }
            }
        };

        let since = now
            .checked_sub_signed(self.finance_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let finance = match self.source.finance(user_id, farm_id, since, now) {
            Ok(Some(f)) => f,
            Ok(None) => FinanceSummary::unavailable(),
            Err(e) => {
                note_degraded(&mut degraded, user_id, &e);
                FinanceSummary::unavailable()
            }
        };

        debug!(
            user_id = %user_id,
            crops = crops.len(),
            livestock = livestock.len(),
            degraded = degraded.len(),
            "evaluation context assembled"
        );

        Ok(EvaluationContext::new(profile, now)
            .with_farm_scope(farm_id)
            .with_farms(farms)
            .with_crops(crops)
            .with_livestock(livestock)
            .with_weather(weather)
            .with_market(market)
            .with_finance(finance)
            .with_degraded(degraded))
    }
}

fn note_degraded(degraded: &mut Vec<FactSourceKind>, user_id: UserId, err: &SourceError) {
    let kind = err.source_kind();
    warn!(user_id = %user_id, source = %kind, error = %err, "fact source degraded to neutral default");
    if !degraded.contains(&kind) {
        degraded.push(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::facts::{
        CropFact, CropStatus, FarmRecord, LivestockFact, MarketPrice, UserProfile,
    };
    use crate::context::source::{FarmSnapshot, InMemoryFarmData};
    use chrono::TimeZone;

    struct Fixture {
        source: Arc<InMemoryFarmData>,
        user: UserId,
        farm: FarmId,
        now: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let user = UserId::new();
        let farm = FarmId::new();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let mut weather = std::collections::BTreeMap::new();
        weather.insert(
            "highlands".to_string(),
            WeatherSummary {
                available: true,
                temperature_c: Some(21.0),
                ..WeatherSummary::default()
            },
        );
        let snapshot = FarmSnapshot {
            users: vec![UserProfile::new(user).with_region("highlands")],
            farms: vec![FarmRecord {
                id: farm,
                owner_id: user,
                name: "Home".to_string(),
                region: None,
                size_hectares: Some(12.0),
            }],
            crops: vec![
                CropFact::new("c1", farm, "North", "maize"),
                CropFact::new("c2", farm, "South", "beans").with_status(CropStatus::Failed),
            ],
            livestock: vec![LivestockFact::new("l1", farm, "Herd", "cattle")],
            weather,
            market: vec![MarketPrice {
                product_type: "maize".to_string(),
                price: 310.0,
                previous_price: None,
                unit: "t".to_string(),
                observed_at: now,
            }],
            ..FarmSnapshot::default()
        };
        Fixture {
            source: Arc::new(InMemoryFarmData::from_snapshot(snapshot)),
            user,
            farm,
            now,
        }
    }

    #[test]
    fn test_build_full_context() {
        let fx = fixture();
        let builder = ContextBuilder::new(fx.source.clone());
        let ctx = builder.build(fx.user, None, fx.now).unwrap();
        assert_eq!(ctx.crops().len(), 1);
        assert_eq!(ctx.livestock().len(), 1);
        assert!(ctx.weather().available);
        assert!(ctx.market().get("maize").is_some());
        assert!(!ctx.finance().available);
        assert!(!ctx.is_degraded());
        assert_eq!(ctx.evaluated_at(), fx.now);
    }

    #[test]
    fn test_unknown_user_is_not_found() {
        let fx = fixture();
        let builder = ContextBuilder::new(fx.source.clone());
        let err = builder.build(UserId::new(), None, fx.now).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_identity_failure_surfaces() {
        let fx = fixture();
        fx.source.set_failing(FactSourceKind::Identity, true);
        let builder = ContextBuilder::new(fx.source.clone());
        let err = builder.build(fx.user, None, fx.now).unwrap_err();
        assert!(matches!(err, DseError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_foreign_farm_is_not_found() {
        let fx = fixture();
        let builder = ContextBuilder::new(fx.source.clone());
        let err = builder.build(fx.user, Some(FarmId::new()), fx.now).unwrap_err();
        assert!(err.is_not_found());
        assert!(builder.build(fx.user, Some(fx.farm), fx.now).is_ok());
    }

    #[test]
    fn test_optional_source_failure_degrades() {
        let fx = fixture();
        fx.source.set_failing(FactSourceKind::Weather, true);
        fx.source.set_failing(FactSourceKind::Market, true);
        let builder = ContextBuilder::new(fx.source.clone());
        let ctx = builder.build(fx.user, None, fx.now).unwrap();
        assert!(!ctx.weather().available);
        assert!(ctx.market().is_empty());
        assert_eq!(
            ctx.degraded(),
            &[FactSourceKind::Weather, FactSourceKind::Market]
        );
        assert_eq!(ctx.crops().len(), 1);
    }
}
