//! Field-path resolution over an evaluation context.
//!
//! A [`FactView`] is the context seen through one binding: nothing (user
//! level rules), one farm, one crop, or one livestock entry. Field paths such as
//! `crop.daysSincePlanting` resolve against the bound entity; paths that do
//! not exist, or that refer to an unbound entity, resolve to `None`.

use crate::context::facts::{
    normalize_product, CropFact, EvaluationContext, FarmRecord, LivestockFact, MarketPrice,
};
use crate::time::{days_since, days_until, whole_months_between};
use crate::value::Value;

/// The entity a rule is being evaluated for.
#[derive(Debug, Clone, Copy)]
pub enum Binding<'a> {
    /// User-level evaluation.
    None,
    Farm(&'a FarmRecord),
    Crop(&'a CropFact),
    Livestock(&'a LivestockFact),
}

/// Read-only view of a context under one binding.
#[derive(Debug, Clone, Copy)]
pub struct FactView<'a> {
    ctx: &'a EvaluationContext,
    binding: Binding<'a>,
}

impl<'a> FactView<'a> {
    /// View with no bound entity.
    #[must_use]
    pub const fn unbound(ctx: &'a EvaluationContext) -> Self {
        Self {
            ctx,
            binding: Binding::None,
        }
    }

    #[must_use]
    pub const fn farm(ctx: &'a EvaluationContext, farm: &'a FarmRecord) -> Self {
        Self {
            ctx,
            binding: Binding::Farm(farm),
        }
    }

    #[must_use]
    pub const fn crop(ctx: &'a EvaluationContext, crop: &'a CropFact) -> Self {
        Self {
            ctx,
            binding: Binding::Crop(crop),
        }
    }

    #[must_use]
    pub const fn livestock(ctx: &'a EvaluationContext, livestock: &'a LivestockFact) -> Self {
        Self {
            ctx,
            binding: Binding::Livestock(livestock),
        }
    }

    pub const fn context(&self) -> &'a EvaluationContext {
        self.ctx
    }

    pub const fn binding(&self) -> Binding<'a> {
        self.binding
    }

    /// Resolves a dotted field path. Unknown paths yield `None`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let (namespace, rest) = path.split_once('.').unwrap_or((path, ""));
        match namespace {
            "crop" => match self.binding {
                Binding::Crop(crop) => self.crop_field(crop, rest),
                _ => None,
            },
            "livestock" => match self.binding {
                Binding::Livestock(l) => self.livestock_field(l, rest),
                _ => None,
            },
            "weather" => self.weather_field(rest),
            "market" => self.market_field(rest),
            "finance" => self.finance_field(rest),
            "season" => self.season_field(rest),
            "farm" => self.farm_field(rest),
            "user" => match rest {
                "region" => self.ctx.user().region.clone().map(Value::String),
                _ => None,
            },
            _ => None,
        }
    }

    fn crop_field(&self, crop: &CropFact, field: &str) -> Option<Value> {
        let now = self.ctx.evaluated_at();
        let v = match field {
            "id" => Value::String(crop.id.clone()),
            "name" => Value::String(crop.name.clone()),
            "cropType" => Value::String(crop.crop_type.clone()),
            "variety" => Value::String(crop.variety.clone()?),
            "status" => Value::String(crop.status.as_str().to_string()),
            "plantedAt" => Value::Date(crop.planted_at?),
            "expectedHarvestAt" => Value::Date(crop.expected_harvest_at?),
            "daysSincePlanting" => Value::Int(days_since(crop.planted_at?, now)),
            "daysUntilHarvest" => Value::Int(days_until(crop.expected_harvest_at?, now)),
            "areaHectares" => Value::Float(crop.area_hectares?),
            "lastFertilizedAt" => Value::Date(crop.last_fertilized_at?),
            "lastIrrigatedAt" => Value::Date(crop.last_irrigated_at?),
            "healthStatus" => Value::String(crop.health_status.clone()?),
            other => {
                let key = other.strip_prefix("attributes.").unwrap_or(other);
                return crop.attributes.get(key).cloned();
            }
        };
        Some(v)
    }

    fn livestock_field(&self, l: &LivestockFact, field: &str) -> Option<Value> {
        let now = self.ctx.evaluated_at();
        let v = match field {
            "id" => Value::String(l.id.clone()),
            "name" => Value::String(l.name.clone()),
            "species" => Value::String(l.species.clone()),
            "breed" => Value::String(l.breed.clone()?),
            "headCount" => Value::Int(i64::from(l.head_count)),
            "status" => Value::String(l.status.as_str().to_string()),
            "bornAt" => Value::Date(l.born_at?),
            "ageMonths" => Value::Int(whole_months_between(l.born_at?, now)),
            "lastVaccinatedAt" => Value::Date(l.last_vaccinated_at?),
            "nextVaccinationDue" => Value::Date(l.next_vaccination_due?),
            "daysSinceVaccination" => Value::Int(days_since(l.last_vaccinated_at?, now)),
            "healthStatus" => Value::String(l.health_status.clone()?),
            other => {
                let key = other.strip_prefix("attributes.").unwrap_or(other);
                return l.attributes.get(key).cloned();
            }
        };
        Some(v)
    }

    fn weather_field(&self, field: &str) -> Option<Value> {
        let w = self.ctx.weather();
        if field == "available" {
            return Some(Value::Bool(w.available));
        }
        if !w.available {
            return None;
        }
        let v = match field {
            "temperatureC" => Value::Float(w.temperature_c?),
            "minTemperatureC" => Value::Float(w.min_temperature_c?),
            "maxTemperatureC" => Value::Float(w.max_temperature_c?),
            "rainfallMm" => Value::Float(w.rainfall_mm?),
            "humidityPct" => Value::Float(w.humidity_pct?),
            "frostRisk" => Value::Bool(w.frost_risk?),
            "condition" => Value::String(w.condition.clone()?),
            "observedAt" => Value::Date(w.observed_at?),
            _ => return None,
        };
        Some(v)
    }

    /// The product type of the bound entity, used for `market.<field>`.
    fn bound_product(&self) -> Option<&'a str> {
        match self.binding {
            Binding::Crop(c) => Some(&c.crop_type),
            Binding::Livestock(l) => Some(&l.species),
            Binding::Farm(_) | Binding::None => None,
        }
    }

    fn market_field(&self, rest: &str) -> Option<Value> {
        let market = self.ctx.market();
        match rest.rsplit_once('.') {
            Some((product, field)) => price_field(market.get(&normalize_product(product))?, field),
            None => price_field(market.get(self.bound_product()?)?, rest),
        }
    }

    fn finance_field(&self, field: &str) -> Option<Value> {
        let f = self.ctx.finance();
        if field == "available" {
            return Some(Value::Bool(f.available));
        }
        if !f.available {
            return None;
        }
        let v = match field {
            "periodDays" => Value::Int(i64::from(f.period_days)),
            "incomeTotal" => Value::Float(f.income_total),
            "expenseTotal" => Value::Float(f.expense_total),
            "netIncome" => Value::Float(f.net_income()),
            "expenseRatio" => Value::Float(f.expense_ratio()?),
            _ => return None,
        };
        Some(v)
    }

    fn season_field(&self, field: &str) -> Option<Value> {
        let s = self.ctx.season();
        match field {
            "" | "name" => Some(Value::String(s.season.as_str().to_string())),
            "month" => Some(Value::Int(i64::from(s.month))),
            _ => None,
        }
    }

    /// The farm this view is about: the bound farm or the bound entity's
    /// farm, else the scoped farm, else the only farm the user has.
    fn bound_farm(&self) -> Option<&'a FarmRecord> {
        let id = match self.binding {
            Binding::Farm(f) => return Some(f),
            Binding::Crop(c) => Some(c.farm_id),
            Binding::Livestock(l) => Some(l.farm_id),
            Binding::None => self.ctx.farm_id(),
        };
        match id {
            Some(id) => self.ctx.farm(id),
            None => match self.ctx.farms() {
                [only] => Some(only),
                _ => None,
            },
        }
    }

    fn farm_field(&self, field: &str) -> Option<Value> {
        match field {
            "activeCropCount" => {
                let count = match self.bound_farm() {
                    Some(farm) => self.ctx.crops().iter().filter(|c| c.farm_id == farm.id).count(),
                    None => self.ctx.crops().len(),
                };
                Some(Value::Int(i64::try_from(count).ok()?))
            }
            "livestockHeadCount" => {
                let total: u64 = self
                    .ctx
                    .livestock()
                    .iter()
                    .filter(|l| self.bound_farm().map_or(true, |f| f.id == l.farm_id))
                    .map(|l| u64::from(l.head_count))
                    .sum();
                Some(Value::Int(i64::try_from(total).ok()?))
            }
            _ => {
                let farm = self.bound_farm()?;
                let v = match field {
                    "id" => Value::String(farm.id.to_string()),
                    "name" => Value::String(farm.name.clone()),
                    "region" => Value::String(farm.region.clone()?),
                    "sizeHectares" => Value::Float(farm.size_hectares?),
                    _ => return None,
                };
                Some(v)
            }
        }
    }
}

fn price_field(price: &MarketPrice, field: &str) -> Option<Value> {
    let v = match field {
        "price" => Value::Float(price.price),
        "previousPrice" => Value::Float(price.previous_price?),
        "changePct" => Value::Float(price.change_pct()?),
        "unit" => Value::String(price.unit.clone()),
        "observedAt" => Value::Date(price.observed_at),
        _ => return None,
    };
    Some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::facts::{
        FarmId, FinanceSummary, MarketSummary, UserId, UserProfile, WeatherSummary,
    };
    use chrono::{Duration, TimeZone, Utc};

    fn ctx() -> (EvaluationContext, FarmId) {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let farm_id = FarmId::new();
        let user = UserProfile::new(UserId::new()).with_region("rift-valley");
        let farm = FarmRecord {
            id: farm_id,
            owner_id: user.user_id,
            name: "Green Acres".to_string(),
            region: Some("rift-valley".to_string()),
            size_hectares: Some(12.5),
        };
        let crop = CropFact::new("c1", farm_id, "North field", "Maize")
            .planted_at(now - Duration::days(35))
            .expected_harvest_at(now + Duration::days(60))
            .with_attribute("soilMoisturePct", 18.0);
        let ctx = EvaluationContext::new(user, now)
            .with_farms(vec![farm])
            .with_crops(vec![crop])
            .with_weather(WeatherSummary {
                available: true,
                max_temperature_c: Some(33.0),
                ..WeatherSummary::default()
            })
            .with_market(MarketSummary::from_prices(vec![MarketPrice {
                product_type: "maize".to_string(),
                price: 330.0,
                previous_price: Some(300.0),
                unit: "t".to_string(),
                observed_at: now,
            }]))
            .with_finance(FinanceSummary::new(90, 2000.0, 1900.0));
        (ctx, farm_id)
    }

    #[test]
    fn test_crop_fields_resolve_only_when_bound() {
        let (ctx, _) = ctx();
        let crop = &ctx.crops()[0];
        let view = FactView::crop(&ctx, crop);
        assert_eq!(view.resolve("crop.daysSincePlanting"), Some(Value::Int(35)));
        assert_eq!(view.resolve("crop.daysUntilHarvest"), Some(Value::Int(60)));
        assert_eq!(view.resolve("crop.soilMoisturePct"), Some(Value::Float(18.0)));
        assert_eq!(
            view.resolve("crop.attributes.soilMoisturePct"),
            Some(Value::Float(18.0))
        );
        assert_eq!(view.resolve("crop.lastFertilizedAt"), None);

        let unbound = FactView::unbound(&ctx);
        assert_eq!(unbound.resolve("crop.daysSincePlanting"), None);
    }

    #[test]
    fn test_market_resolves_for_bound_product_and_explicit_product() {
        let (ctx, _) = ctx();
        let view = FactView::crop(&ctx, &ctx.crops()[0]);
        let change = view.resolve("market.changePct").unwrap().as_float().unwrap();
        assert!((change - 10.0).abs() < 1e-9);

        let unbound = FactView::unbound(&ctx);
        assert_eq!(unbound.resolve("market.price"), None);
        assert_eq!(unbound.resolve("market.maize.price"), Some(Value::Float(330.0)));
        assert_eq!(unbound.resolve("market.wheat.price"), None);
    }

    #[test]
    fn test_unavailable_sources_resolve_to_absent() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let ctx = EvaluationContext::new(UserProfile::new(UserId::new()), now);
        let view = FactView::unbound(&ctx);
        assert_eq!(view.resolve("weather.available"), Some(Value::Bool(false)));
        assert_eq!(view.resolve("weather.maxTemperatureC"), None);
        assert_eq!(view.resolve("finance.netIncome"), None);
        assert_eq!(view.resolve("season.name"), Some(Value::from("SUMMER")));
        assert_eq!(view.resolve("nonsense.path"), None);
    }

    #[test]
    fn test_farm_fields() {
        let (ctx, farm_id) = ctx();
        let view = FactView::unbound(&ctx);
        assert_eq!(view.resolve("farm.id"), Some(Value::String(farm_id.to_string())));
        assert_eq!(view.resolve("farm.activeCropCount"), Some(Value::Int(1)));
        assert_eq!(view.resolve("farm.livestockHeadCount"), Some(Value::Int(0)));
        let farm = &ctx.farms()[0];
        let bound = FactView::farm(&ctx, farm);
        assert_eq!(bound.resolve("farm.name"), Some(Value::from("Green Acres")));
        assert_eq!(bound.resolve("market.price"), None);
        let ratio = view.resolve("finance.expenseRatio").unwrap().as_float().unwrap();
        assert!((ratio - 0.95).abs() < 1e-9);
    }
}
