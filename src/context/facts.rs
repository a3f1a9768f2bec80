//! Fact types: the read-only snapshot of a user's farm state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// Identity of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random user ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a farm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FarmId(Uuid);

impl FarmId {
    /// Creates a new random farm ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for FarmId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The sub-sources a context is assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactSourceKind {
    Identity,
    Farms,
    Crops,
    Livestock,
    Weather,
    Market,
    Finance,
}

impl fmt::Display for FactSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Identity => "identity",
            Self::Farms => "farms",
            Self::Crops => "crops",
            Self::Livestock => "livestock",
            Self::Weather => "weather",
            Self::Market => "market",
            Self::Finance => "finance",
        };
        f.write_str(s)
    }
}

/// Profile of the user whose farm is being evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Negative latitudes place the user in the southern hemisphere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
}

impl UserProfile {
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            region: None,
            latitude: None,
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn with_latitude(mut self, latitude: f64) -> Self {
        self.latitude = Some(latitude);
        self
    }

    #[must_use]
    pub fn is_southern_hemisphere(&self) -> bool {
        self.latitude.is_some_and(|lat| lat < 0.0)
    }
}

/// A farm owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmRecord {
    pub id: FarmId,
    pub owner_id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_hectares: Option<f64>,
}

/// Crop lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CropStatus {
    Planned,
    Planted,
    Growing,
    Flowering,
    HarvestReady,
    Harvested,
    Failed,
}

impl CropStatus {
    /// Terminal crops are never evaluated.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Harvested | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "PLANNED",
            Self::Planted => "PLANTED",
            Self::Growing => "GROWING",
            Self::Flowering => "FLOWERING",
            Self::HarvestReady => "HARVEST_READY",
            Self::Harvested => "HARVESTED",
            Self::Failed => "FAILED",
        }
    }
}

/// A crop in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropFact {
    pub id: String,
    pub farm_id: FarmId,
    pub name: String,
    pub crop_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variety: Option<String>,
    pub status: CropStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_harvest_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_hectares: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fertilized_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_irrigated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<String>,
    /// Free-form facts not covered by the typed fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl CropFact {
    /// Creates a growing crop with only the identifying fields set.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        farm_id: FarmId,
        name: impl Into<String>,
        crop_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            farm_id,
            name: name.into(),
            crop_type: crop_type.into(),
            variety: None,
            status: CropStatus::Growing,
            planted_at: None,
            expected_harvest_at: None,
            area_hectares: None,
            last_fertilized_at: None,
            last_irrigated_at: None,
            health_status: None,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: CropStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn planted_at(mut self, at: DateTime<Utc>) -> Self {
        self.planted_at = Some(at);
        self
    }

    #[must_use]
    pub fn expected_harvest_at(mut self, at: DateTime<Utc>) -> Self {
        self.expected_harvest_at = Some(at);
        self
    }

    #[must_use]
    pub fn last_fertilized_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_fertilized_at = Some(at);
        self
    }

    #[must_use]
    pub fn with_area(mut self, hectares: f64) -> Self {
        self.area_hectares = Some(hectares);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Livestock group lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivestockStatus {
    Active,
    Sick,
    Quarantined,
    Sold,
    Deceased,
}

impl LivestockStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sold | Self::Deceased)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Sick => "SICK",
            Self::Quarantined => "QUARANTINED",
            Self::Sold => "SOLD",
            Self::Deceased => "DECEASED",
        }
    }
}

/// A livestock animal or herd in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivestockFact {
    pub id: String,
    pub farm_id: FarmId,
    pub name: String,
    pub species: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(default = "default_head_count")]
    pub head_count: u32,
    pub status: LivestockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub born_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_vaccinated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_vaccination_due: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

const fn default_head_count() -> u32 {
    1
}

impl LivestockFact {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        farm_id: FarmId,
        name: impl Into<String>,
        species: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            farm_id,
            name: name.into(),
            species: species.into(),
            breed: None,
            head_count: 1,
            status: LivestockStatus::Active,
            born_at: None,
            last_vaccinated_at: None,
            next_vaccination_due: None,
            health_status: None,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: LivestockStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_head_count(mut self, head_count: u32) -> Self {
        self.head_count = head_count;
        self
    }

    #[must_use]
    pub fn born_at(mut self, at: DateTime<Utc>) -> Self {
        self.born_at = Some(at);
        self
    }

    #[must_use]
    pub fn next_vaccination_due(mut self, at: DateTime<Utc>) -> Self {
        self.next_vaccination_due = Some(at);
        self
    }

    #[must_use]
    pub fn with_health_status(mut self, status: impl Into<String>) -> Self {
        self.health_status = Some(status.into());
        self
    }
}

/// Latest weather summary for the user's region.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherSummary {
    /// False for the neutral default substituted when the source fails.
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_temperature_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temperature_c: Option<f64>,
    /// Forecast rainfall over the next seven days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rainfall_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frost_risk: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl WeatherSummary {
    /// The neutral default: nothing is known.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// Latest observed price for one product type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPrice {
    pub product_type: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_price: Option<f64>,
    pub unit: String,
    pub observed_at: DateTime<Utc>,
}

impl MarketPrice {
    /// Percent change against the previous observation.
    #[must_use]
    pub fn change_pct(&self) -> Option<f64> {
        let prev = self.previous_price?;
        if prev.abs() < f64::EPSILON {
            return None;
        }
        Some((self.price - prev) / prev * 100.0)
    }
}

/// Latest prices keyed by normalized product type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketSummary {
    prices: BTreeMap<String, MarketPrice>,
}

impl MarketSummary {
    /// Builds a summary, keeping the most recent observation per product.
    #[must_use]
    pub fn from_prices(prices: impl IntoIterator<Item = MarketPrice>) -> Self {
        let mut map: BTreeMap<String, MarketPrice> = BTreeMap::new();
        for price in prices {
            let key = normalize_product(&price.product_type);
            match map.get(&key) {
                Some(existing) if existing.observed_at >= price.observed_at => {}
                _ => {
                    map.insert(key, price);
                }
            }
        }
        Self { prices: map }
    }

    #[must_use]
    pub fn get(&self, product_type: &str) -> Option<&MarketPrice> {
        self.prices.get(&normalize_product(product_type))
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }
}

pub(crate) fn normalize_product(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// Trailing finance aggregates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FinanceSummary {
    pub available: bool,
    pub period_days: u32,
    pub income_total: f64,
    pub expense_total: f64,
}

impl FinanceSummary {
    #[must_use]
    pub fn new(period_days: u32, income_total: f64, expense_total: f64) -> Self {
        Self {
            available: true,
            period_days,
            income_total,
            expense_total,
        }
    }

    /// The neutral default: no aggregates are exposed.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn net_income(&self) -> f64 {
        self.income_total - self.expense_total
    }

    /// Expenses as a fraction of income. `None` without income.
    #[must_use]
    pub fn expense_ratio(&self) -> Option<f64> {
        if self.income_total.abs() < f64::EPSILON {
            return None;
        }
        Some(self.expense_total / self.income_total)
    }
}

/// Meteorological season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    /// Season for a calendar month (1-12).
    #[must_use]
    pub const fn from_month(month: u32, southern_hemisphere: bool) -> Self {
        let northern = match month {
            3..=5 => Self::Spring,
            6..=8 => Self::Summer,
            9..=11 => Self::Autumn,
            _ => Self::Winter,
        };
        if southern_hemisphere {
            northern.opposite()
        } else {
            northern
        }
    }

    const fn opposite(self) -> Self {
        match self {
            Self::Spring => Self::Autumn,
            Self::Summer => Self::Winter,
            Self::Autumn => Self::Spring,
            Self::Winter => Self::Summer,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spring => "SPRING",
            Self::Summer => "SUMMER",
            Self::Autumn => "AUTUMN",
            Self::Winter => "WINTER",
        }
    }
}

/// Current season/period indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonFact {
    pub season: Season,
    pub month: u32,
}

impl SeasonFact {
    #[must_use]
    pub fn at(now: DateTime<Utc>, southern_hemisphere: bool) -> Self {
        let month = now.month();
        Self {
            season: Season::from_month(month, southern_hemisphere),
            month,
        }
    }
}

/// Immutable snapshot used as evaluator input.
///
/// Assembled by [`ContextBuilder`](crate::context::ContextBuilder) with the
/// `with_*` methods below; once handed to the engine it is only ever read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    user: UserProfile,
    farm_id: Option<FarmId>,
    farms: Vec<FarmRecord>,
    crops: Vec<CropFact>,
    livestock: Vec<LivestockFact>,
    season: SeasonFact,
    weather: WeatherSummary,
    market: MarketSummary,
    finance: FinanceSummary,
    evaluated_at: DateTime<Utc>,
    degraded: Vec<FactSourceKind>,
}

impl EvaluationContext {
    /// Starts an empty context for `user` captured at `evaluated_at`.
    ///
    /// Every optional source begins at its neutral default.
    #[must_use]
    pub fn new(user: UserProfile, evaluated_at: DateTime<Utc>) -> Self {
        let season = SeasonFact::at(evaluated_at, user.is_southern_hemisphere());
        Self {
            user,
            farm_id: None,
            farms: Vec::new(),
            crops: Vec::new(),
            livestock: Vec::new(),
            season,
            weather: WeatherSummary::unavailable(),
            market: MarketSummary::default(),
            finance: FinanceSummary::unavailable(),
            evaluated_at,
            degraded: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_farm_scope(mut self, farm_id: Option<FarmId>) -> Self {
        self.farm_id = farm_id;
        self
    }

    #[must_use]
    pub fn with_farms(mut self, farms: Vec<FarmRecord>) -> Self {
        self.farms = farms;
        self
    }

    /// Sets crops, dropping terminal ones.
    #[must_use]
    pub fn with_crops(mut self, crops: Vec<CropFact>) -> Self {
        self.crops = crops.into_iter().filter(|c| !c.status.is_terminal()).collect();
        self
    }

    /// Sets livestock, dropping terminal entries.
    #[must_use]
    pub fn with_livestock(mut self, livestock: Vec<LivestockFact>) -> Self {
        self.livestock = livestock
            .into_iter()
            .filter(|l| !l.status.is_terminal())
            .collect();
        self
    }

    #[must_use]
    pub fn with_weather(mut self, weather: WeatherSummary) -> Self {
        self.weather = weather;
        self
    }

    #[must_use]
    pub fn with_market(mut self, market: MarketSummary) -> Self {
        self.market = market;
        self
    }

    #[must_use]
    pub fn with_finance(mut self, finance: FinanceSummary) -> Self {
        self.finance = finance;
        self
    }

    #[must_use]
    pub fn with_degraded(mut self, degraded: Vec<FactSourceKind>) -> Self {
        self.degraded = degraded;
        self
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub const fn user_id(&self) -> UserId {
        self.user.user_id
    }

    pub const fn farm_id(&self) -> Option<FarmId> {
        self.farm_id
    }

    pub fn farms(&self) -> &[FarmRecord] {
        &self.farms
    }

    pub fn crops(&self) -> &[CropFact] {
        &self.crops
    }

    pub fn livestock(&self) -> &[LivestockFact] {
        &self.livestock
    }

    pub const fn season(&self) -> SeasonFact {
        self.season
    }

    pub fn weather(&self) -> &WeatherSummary {
        &self.weather
    }

    pub fn market(&self) -> &MarketSummary {
        &self.market
    }

    pub fn finance(&self) -> &FinanceSummary {
        &self.finance
    }

    /// The single "now" shared by every date-relative computation in a pass.
    pub const fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    /// Sub-sources that fell back to neutral defaults.
    pub fn degraded(&self) -> &[FactSourceKind] {
        &self.degraded
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Looks up a farm by id among the farms in scope.
    #[must_use]
    pub fn farm(&self, id: FarmId) -> Option<&FarmRecord> {
        self.farms.iter().find(|f| f.id == id)
    }
}
