//! The fact-source boundary and an in-memory implementation.
//!
//! Persistent storage of farms, crops, livestock, weather, prices and finance
//! lives outside this crate. The context builder reads it only through
//! [`FarmDataSource`].

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::facts::{
    normalize_product, CropFact, FactSourceKind, FarmId, FarmRecord, FinanceSummary,
    LivestockFact, MarketPrice, UserId, UserProfile, WeatherSummary,
};
use crate::error::SourceError;

/// Read access to the external store of farm facts.
///
/// Implementations must be safe to share across request threads.
pub trait FarmDataSource: Send + Sync {
    /// Resolve the user's profile. `Ok(None)` means the user is unknown.
    fn user_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, SourceError>;

    /// Farms owned by the user.
    fn farms(&self, user_id: UserId) -> Result<Vec<FarmRecord>, SourceError>;

    /// Crops on the user's farms, optionally restricted to one farm.
    fn crops(&self, user_id: UserId, farm_id: Option<FarmId>) -> Result<Vec<CropFact>, SourceError>;

    /// Livestock on the user's farms, optionally restricted to one farm.
    fn livestock(
        &self,
        user_id: UserId,
        farm_id: Option<FarmId>,
    ) -> Result<Vec<LivestockFact>, SourceError>;

    /// Latest weather summary for a region. `Ok(None)` when nothing is known.
    fn weather(&self, region: Option<&str>) -> Result<Option<WeatherSummary>, SourceError>;

    /// Latest prices for the given product types.
    fn market_prices(&self, product_types: &[String]) -> Result<Vec<MarketPrice>, SourceError>;

    /// Income and expense totals over `[since, until)`.
    fn finance(
        &self,
        user_id: UserId,
        farm_id: Option<FarmId>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<FinanceSummary>, SourceError>;
}

/// Direction of a finance ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerKind {
    Income,
    Expense,
}

/// One income or expense transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<FarmId>,
    pub kind: LedgerKind,
    pub amount: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Everything the in-memory source knows, in a JSON-loadable shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FarmSnapshot {
    #[serde(default)]
    pub users: Vec<UserProfile>,
    #[serde(default)]
    pub farms: Vec<FarmRecord>,
    #[serde(default)]
    pub crops: Vec<CropFact>,
    #[serde(default)]
    pub livestock: Vec<LivestockFact>,
    /// Weather keyed by region.
    #[serde(default)]
    pub weather: BTreeMap<String, WeatherSummary>,
    #[serde(default)]
    pub market: Vec<MarketPrice>,
    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
}

impl FarmSnapshot {
    /// Parse a snapshot from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Malformed` if the JSON does not match the shape.
    pub fn from_json_str(json: &str) -> Result<Self, SourceError> {
        serde_json::from_str(json).map_err(|e| SourceError::Malformed {
            kind: FactSourceKind::Identity,
            message: e.to_string(),
        })
    }

    /// Read and parse a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Unavailable` if the file cannot be read and
    /// `SourceError::Malformed` if it cannot be parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SourceError::Unavailable {
            kind: FactSourceKind::Identity,
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }
}

fn lock_err(kind: FactSourceKind) -> SourceError {
    SourceError::Unavailable {
        kind,
        message: "poisoned lock".to_string(),
    }
}

/// Thread-safe in-memory fact source.
///
/// Individual sub-sources can be switched into a failing state to exercise
/// degraded context building.
#[derive(Debug, Default)]
pub struct InMemoryFarmData {
    snapshot: RwLock<FarmSnapshot>,
    failing: RwLock<HashSet<FactSourceKind>>,
}

impl InMemoryFarmData {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source serving `snapshot`.
    #[must_use]
    pub fn from_snapshot(snapshot: FarmSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            failing: RwLock::new(HashSet::new()),
        }
    }

    /// Apply a mutation to the underlying snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn update<F>(&self, f: F) -> Result<(), SourceError>
    where
        F: FnOnce(&mut FarmSnapshot),
    {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| lock_err(FactSourceKind::Identity))?;
        f(&mut guard);
        Ok(())
    }

    /// Make one sub-source fail (or recover).
    pub fn set_failing(&self, kind: FactSourceKind, failing: bool) {
        let mut guard = match self.failing.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if failing {
            guard.insert(kind);
        } else {
            guard.remove(&kind);
        }
    }

    fn check(&self, kind: FactSourceKind) -> Result<(), SourceError> {
        let guard = self.failing.read().map_err(|_| lock_err(kind))?;
        if guard.contains(&kind) {
            return Err(SourceError::Unavailable {
                kind,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn read<T>(
        &self,
        kind: FactSourceKind,
        f: impl FnOnce(&FarmSnapshot) -> T,
    ) -> Result<T, SourceError> {
        self.check(kind)?;
        let guard = self.snapshot.read().map_err(|_| lock_err(kind))?;
        Ok(f(&guard))
    }
}

fn owned_farm_ids(snapshot: &FarmSnapshot, user_id: UserId) -> HashSet<FarmId> {
    snapshot
        .farms
        .iter()
        .filter(|f| f.owner_id == user_id)
        .map(|f| f.id)
        .collect()
}

impl FarmDataSource for InMemoryFarmData {
    fn user_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, SourceError> {
        self.read(FactSourceKind::Identity, |s| {
            s.users.iter().find(|u| u.user_id == user_id).cloned()
        })
    }

    fn farms(&self, user_id: UserId) -> Result<Vec<FarmRecord>, SourceError> {
        self.read(FactSourceKind::Farms, |s| {
            s.farms
                .iter()
                .filter(|f| f.owner_id == user_id)
                .cloned()
                .collect()
        })
    }

    fn crops(&self, user_id: UserId, farm_id: Option<FarmId>) -> Result<Vec<CropFact>, SourceError> {
        self.read(FactSourceKind::Crops, |s| {
            let owned = owned_farm_ids(s, user_id);
            s.crops
                .iter()
                .filter(|c| owned.contains(&c.farm_id))
                .filter(|c| farm_id.map_or(true, |f| f == c.farm_id))
                .cloned()
                .collect()
        })
    }

    fn livestock(
        &self,
        user_id: UserId,
        farm_id: Option<FarmId>,
    ) -> Result<Vec<LivestockFact>, SourceError> {
        self.read(FactSourceKind::Livestock, |s| {
            let owned = owned_farm_ids(s, user_id);
            s.livestock
                .iter()
                .filter(|l| owned.contains(&l.farm_id))
                .filter(|l| farm_id.map_or(true, |f| f == l.farm_id))
                .cloned()
                .collect()
        })
    }

    fn weather(&self, region: Option<&str>) -> Result<Option<WeatherSummary>, SourceError> {
        self.read(FactSourceKind::Weather, |s| {
            let region = region?;
            s.weather
                .iter()
                .find(|(r, _)| r.eq_ignore_ascii_case(region))
                .map(|(_, w)| w.clone())
        })
    }

    fn market_prices(&self, product_types: &[String]) -> Result<Vec<MarketPrice>, SourceError> {
        self.read(FactSourceKind::Market, |s| {
            let wanted: HashSet<String> = product_types.iter().map(|p| normalize_product(p)).collect();
            s.market
                .iter()
                .filter(|p| wanted.contains(&normalize_product(&p.product_type)))
                .cloned()
                .collect()
        })
    }

    fn finance(
        &self,
        user_id: UserId,
        farm_id: Option<FarmId>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<FinanceSummary>, SourceError> {
        self.read(FactSourceKind::Finance, |s| {
            let entries: Vec<&LedgerEntry> = s
                .ledger
                .iter()
                .filter(|e| e.user_id == user_id)
                .filter(|e| farm_id.map_or(true, |f| e.farm_id == Some(f)))
                .filter(|e| e.occurred_at >= since && e.occurred_at < until)
                .collect();
            if entries.is_empty() {
                return None;
            }
            let (income, expense) = entries.iter().fold((0.0, 0.0), |(i, x), e| match e.kind {
                LedgerKind::Income => (i + e.amount, x),
                LedgerKind::Expense => (i, x + e.amount),
            });
            let days = u32::try_from((until - since).num_days().max(0)).unwrap_or(u32::MAX);
            Some(FinanceSummary::new(days, income, expense))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn snapshot() -> (FarmSnapshot, UserId, FarmId) {
        let user = UserId::new();
        let farm = FarmId::new();
        let other_farm = FarmId::new();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let snap = FarmSnapshot {
            users: vec![UserProfile::new(user).with_region("coast")],
            farms: vec![
                FarmRecord {
                    id: farm,
                    owner_id: user,
                    name: "Mine".to_string(),
                    region: None,
                    size_hectares: None,
                },
                FarmRecord {
                    id: other_farm,
                    owner_id: UserId::new(),
                    name: "Not mine".to_string(),
                    region: None,
                    size_hectares: None,
                },
            ],
            crops: vec![
                CropFact::new("c1", farm, "Plot", "maize"),
                CropFact::new("c2", other_farm, "Plot", "maize"),
            ],
            ledger: vec![
                LedgerEntry {
                    user_id: user,
                    farm_id: Some(farm),
                    kind: LedgerKind::Income,
                    amount: 500.0,
                    occurred_at: now - Duration::days(10),
                },
                LedgerEntry {
                    user_id: user,
                    farm_id: Some(farm),
                    kind: LedgerKind::Expense,
                    amount: 200.0,
                    occurred_at: now - Duration::days(5),
                },
                LedgerEntry {
                    user_id: user,
                    farm_id: Some(farm),
                    kind: LedgerKind::Expense,
                    amount: 9999.0,
                    occurred_at: now - Duration::days(400),
                },
            ],
            ..FarmSnapshot::default()
        };
        (snap, user, farm)
    }

    #[test]
    fn test_crops_are_scoped_to_owner() {
        let (snap, user, _) = snapshot();
        let source = InMemoryFarmData::from_snapshot(snap);
        let crops = source.crops(user, None).unwrap();
        assert_eq!(crops.len(), 1);
        assert_eq!(crops[0].id, "c1");
    }

    #[test]
    fn test_finance_aggregates_window() {
        let (snap, user, farm) = snapshot();
        let source = InMemoryFarmData::from_snapshot(snap);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let summary = source
            .finance(user, Some(farm), now - Duration::days(90), now)
            .unwrap()
            .unwrap();
        assert!((summary.income_total - 500.0).abs() < f64::EPSILON);
        assert!((summary.expense_total - 200.0).abs() < f64::EPSILON);
        assert_eq!(summary.period_days, 90);
    }

    #[test]
    fn test_injected_failure() {
        let (snap, _, _) = snapshot();
        let source = InMemoryFarmData::from_snapshot(snap);
        source.set_failing(FactSourceKind::Weather, true);
        let err = source.weather(Some("coast")).unwrap_err();
        assert_eq!(err.source_kind(), FactSourceKind::Weather);
        source.set_failing(FactSourceKind::Weather, false);
        assert_eq!(source.weather(Some("coast")).unwrap(), None);
    }

    #[test]
    fn test_snapshot_from_json() {
        let user = UserId::new();
        let json = format!(r#"{{"users":[{{"user_id":"{user}","region":"coast"}}]}}"#);
        let snap = FarmSnapshot::from_json_str(&json).unwrap();
        assert_eq!(snap.users.len(), 1);
        assert!(FarmSnapshot::from_json_str("{not json").is_err());
    }
}
