//! Authored default farm rules.

use crate::condition::{ConditionGroup, Operator};
use crate::error::ValidationError;
use crate::recommendation::{ImpactType, Priority};
use crate::rule::{
    ConfidenceTemplate, Magnitude, Metric, PriorityTemplate, PriorityThreshold, Rule,
    RuleCategory, RuleScope, ValidityRule,
};
use crate::value::Value;

fn leaf(field: &str, op: Operator, value: impl Into<Value>) -> ConditionGroup {
    ConditionGroup::leaf(field, op, value)
}

fn field(path: &str) -> Metric {
    Metric::Field {
        path: path.to_string(),
    }
}

fn step(at_least: f64, priority: Priority) -> PriorityThreshold {
    PriorityThreshold { at_least, priority }
}

const GROWING: [&str; 3] = ["PLANTED", "GROWING", "FLOWERING"];

/// The default catalog contents.
///
/// # Errors
///
/// Only if an authored rule is structurally invalid.
#[allow(clippy::too_many_lines)]
pub fn default_rules() -> Result<Vec<Rule>, ValidationError> {
    Ok(vec![
        // Crops
        Rule::builder("CROP_TOPDRESS_FERTILIZER", "Top-dress fertilizer")
            .description("Crops three to six weeks after planting benefit from a nitrogen top-dressing if none was applied in the last month.")
            .category(RuleCategory::Crop)
            .scope(RuleScope::EachCrop)
            .condition(ConditionGroup::and(vec![
                leaf("crop.status", Operator::In, GROWING.to_vec()),
                leaf("crop.daysSincePlanting", Operator::Between, vec![21, 45]),
                ConditionGroup::or(vec![
                    ConditionGroup::check("crop.lastFertilizedAt", Operator::NotExists),
                    leaf("crop.lastFertilizedAt", Operator::DaysSinceGreaterThan, 30),
                ]),
            ]))
            .title("Top-dress {crop.name}")
            .summary("{crop.name} ({crop.cropType}) is at the stage where a nitrogen top-dressing has the most effect.")
            .reason("{crop.name} was planted {crop.daysSincePlanting} days ago.")
            .reason("No fertilizer has been recorded in the last 30 days.")
            .action_step("Apply a nitrogen top-dressing along the rows.")
            .action_step("Record the application so the next reminder is accurate.")
            .priority_template(PriorityTemplate::Thresholds {
                metric: field("crop.daysSincePlanting"),
                thresholds: vec![step(38.0, Priority::High)],
                otherwise: Priority::Medium,
            })
            .confidence(0.75)
            .impact(ImpactType::YieldIncrease, Magnitude::Fixed { value: 10.0 }, "%")
            .validity(ValidityRule::ForDays { days: 7 })
            .build()?,
        Rule::builder("CROP_HARVEST_WINDOW", "Harvest window approaching")
            .description("The expected harvest date is within two weeks.")
            .category(RuleCategory::Crop)
            .scope(RuleScope::EachCrop)
            .condition(leaf("crop.expectedHarvestAt", Operator::DaysUntilLessThan, 14))
            .title("Prepare to harvest {crop.name}")
            .summary("{crop.name} is expected to be ready on {crop.expectedHarvestAt}.")
            .reason("Expected harvest is in {crop.daysUntilHarvest} days.")
            .action_step("Book labour and transport for harvest.")
            .action_step("Check storage space and drying capacity.")
            .priority_template(PriorityTemplate::Thresholds {
                metric: Metric::DaysUntil {
                    path: "crop.expectedHarvestAt".to_string(),
                },
                thresholds: vec![step(7.0, Priority::Medium)],
                otherwise: Priority::High,
            })
            .confidence(0.8)
            .validity(ValidityRule::UntilDateField {
                path: "crop.expectedHarvestAt".to_string(),
                fallback_days: Some(3),
            })
            .build()?,
        Rule::builder("CROP_OVERDUE_HARVEST", "Harvest overdue")
            .description("The expected harvest date has passed and the crop is still in the field.")
            .category(RuleCategory::Crop)
            .scope(RuleScope::EachCrop)
            .condition(leaf("crop.expectedHarvestAt", Operator::DaysUntilLessThan, 0))
            .title("Harvest {crop.name} now")
            .summary("{crop.name} is past its expected harvest date; quality and yield losses increase every day.")
            .reason("Expected harvest was {crop.expectedHarvestAt}.")
            .action_step("Harvest as soon as field conditions allow.")
            .priority_template(PriorityTemplate::Thresholds {
                metric: Metric::DaysSince {
                    path: "crop.expectedHarvestAt".to_string(),
                },
                thresholds: vec![step(14.0, Priority::Urgent)],
                otherwise: Priority::High,
            })
            .confidence(0.85)
            .impact(ImpactType::LossPrevention, Magnitude::Fixed { value: 15.0 }, "%")
            .validity(ValidityRule::ForDays { days: 3 })
            .supersedes("CROP_HARVEST_WINDOW")
            .build()?,
        Rule::builder("CROP_IRRIGATE_DRY_SPELL", "Irrigate during dry spell")
            .description("Little rain combined with high temperatures stresses growing crops.")
            .category(RuleCategory::Crop)
            .scope(RuleScope::EachCrop)
            .condition(ConditionGroup::and(vec![
                leaf("crop.status", Operator::In, GROWING.to_vec()),
                leaf("weather.rainfallMm", Operator::LessThan, 10),
                leaf("weather.maxTemperatureC", Operator::GreaterThan, 28),
            ]))
            .title("Irrigate {crop.name}")
            .summary("Hot, dry weather is forecast. {crop.name} will need water to avoid stress.")
            .reason("Only {weather.rainfallMm} mm of rain is forecast this week.")
            .reason("Temperatures will reach {weather.maxTemperatureC}°C.")
            .action_step("Irrigate early in the morning or in the evening.")
            .action_step("Mulch around plants to hold soil moisture.")
            .priority(Priority::High)
            .confidence_template(ConfidenceTemplate::Linear {
                metric: field("weather.maxTemperatureC"),
                base: 0.2,
                per_unit: 0.02,
                min: 0.5,
                max: 0.9,
            })
            .impact(ImpactType::LossPrevention, Magnitude::Fixed { value: 20.0 }, "%")
            .validity(ValidityRule::ForDays { days: 2 })
            .build()?,
        Rule::builder("CROP_FROST_PROTECTION", "Frost protection")
            .description("Frost can kill seedlings and damage flowering crops overnight.")
            .category(RuleCategory::Crop)
            .scope(RuleScope::EachCrop)
            .condition(ConditionGroup::or(vec![
                leaf("weather.frostRisk", Operator::Equals, true),
                leaf("weather.minTemperatureC", Operator::LessOrEqual, 2),
            ]))
            .title("Protect {crop.name} from frost")
            .summary("Frost conditions are forecast for your area.")
            .reason("The forecast indicates a frost risk.")
            .action_step("Cover sensitive plants overnight.")
            .action_step("Irrigate lightly before the cold night to retain soil heat.")
            .priority(Priority::Urgent)
            .confidence(0.85)
            .impact(ImpactType::LossPrevention, Magnitude::Fixed { value: 30.0 }, "%")
            .validity(ValidityRule::ForHours { hours: 48 })
            .build()?,
        Rule::builder("CROP_PEST_SCOUTING", "Scout for pests and disease")
            .description("Poor crop health, or warm and humid weather, favours pests and fungal disease.")
            .category(RuleCategory::Crop)
            .scope(RuleScope::EachCrop)
            .condition(ConditionGroup::or(vec![
                leaf(
                    "crop.healthStatus",
                    Operator::In,
                    vec!["POOR", "DISEASED", "PEST_DAMAGE"],
                ),
                ConditionGroup::and(vec![
                    leaf("weather.humidityPct", Operator::GreaterThan, 85),
                    leaf("weather.temperatureC", Operator::Between, vec![20, 30]),
                ]),
            ]))
            .title("Scout {crop.name} for pests")
            .summary("Conditions favour pest or disease pressure on {crop.name}.")
            .reason("Crop health or current weather indicates elevated pest risk.")
            .action_step("Walk the field and inspect leaves on at least 20 plants.")
            .action_step("Treat only if damage exceeds the action threshold.")
            .priority(Priority::Medium)
            .confidence(0.6)
            .validity(ValidityRule::ForDays { days: 5 })
            .build()?,
        // Livestock
        Rule::builder("LIVESTOCK_VACCINATION_DUE", "Vaccination due")
            .description("A scheduled vaccination falls within the next week.")
            .category(RuleCategory::Livestock)
            .scope(RuleScope::EachLivestock)
            .condition(leaf(
                "livestock.nextVaccinationDue",
                Operator::DaysUntilLessThan,
                8,
            ))
            .title("Vaccinate {livestock.name}")
            .summary("{livestock.name} ({livestock.species}) has a vaccination due on {livestock.nextVaccinationDue}.")
            .reason("Vaccination is due on {livestock.nextVaccinationDue}.")
            .action_step("Book the veterinarian or prepare vaccines.")
            .action_step("Record the vaccination once given.")
            .priority(Priority::High)
            .confidence(0.9)
            .impact(ImpactType::HealthImprovement, Magnitude::Fixed { value: 1.0 }, "herd")
            .validity(ValidityRule::UntilDateField {
                path: "livestock.nextVaccinationDue".to_string(),
                fallback_days: Some(1),
            })
            .build()?,
        Rule::builder("LIVESTOCK_VACCINATION_OVERDUE", "Vaccination overdue")
            .description("A scheduled vaccination date has passed.")
            .category(RuleCategory::Livestock)
            .scope(RuleScope::EachLivestock)
            .condition(leaf(
                "livestock.nextVaccinationDue",
                Operator::DaysUntilLessThan,
                0,
            ))
            .title("Vaccination overdue for {livestock.name}")
            .summary("{livestock.name} missed a vaccination scheduled for {livestock.nextVaccinationDue}.")
            .reason("Vaccination was due on {livestock.nextVaccinationDue}.")
            .action_step("Vaccinate as soon as possible.")
            .priority(Priority::Urgent)
            .confidence(0.9)
            .impact(ImpactType::RiskReduction, Magnitude::Fixed { value: 1.0 }, "herd")
            .validity(ValidityRule::ForDays { days: 2 })
            .supersedes("LIVESTOCK_VACCINATION_DUE")
            .build()?,
        Rule::builder("LIVESTOCK_HEAT_STRESS", "Heat stress risk")
            .description("High temperatures reduce feed intake and productivity and can be fatal.")
            .category(RuleCategory::Livestock)
            .scope(RuleScope::EachLivestock)
            .condition(leaf("weather.maxTemperatureC", Operator::GreaterOrEqual, 32))
            .title("Protect {livestock.name} from heat")
            .summary("Temperatures of {weather.maxTemperatureC}°C are forecast.")
            .reason("Forecast maximum is {weather.maxTemperatureC}°C.")
            .action_step("Provide shade and extra clean water.")
            .action_step("Avoid moving or handling animals in the hottest hours.")
            .priority(Priority::High)
            .confidence_template(ConfidenceTemplate::Linear {
                metric: field("weather.maxTemperatureC"),
                base: -0.6,
                per_unit: 0.04,
                min: 0.5,
                max: 0.95,
            })
            .validity(ValidityRule::ForDays { days: 2 })
            .build()?,
        Rule::builder("LIVESTOCK_HEALTH_CHECK", "Health check")
            .description("Animals recorded as sick, quarantined or in poor health need attention.")
            .category(RuleCategory::Livestock)
            .scope(RuleScope::EachLivestock)
            .condition(ConditionGroup::or(vec![
                leaf("livestock.status", Operator::In, vec!["SICK", "QUARANTINED"]),
                leaf(
                    "livestock.healthStatus",
                    Operator::In,
                    vec!["POOR", "SICK", "INJURED"],
                ),
            ]))
            .title("Check on {livestock.name}")
            .summary("{livestock.name} is flagged with a health concern.")
            .reason("{livestock.name} has status {livestock.status}.")
            .action_step("Examine the animals and isolate any that are unwell.")
            .action_step("Call a veterinarian if symptoms persist.")
            .priority(Priority::High)
            .confidence(0.7)
            .validity(ValidityRule::ForDays { days: 3 })
            .build()?,
        // Market
        Rule::builder("MARKET_SELL_CROP", "Favourable crop price")
            .description("The latest market price for this crop is notably above the previous observation.")
            .category(RuleCategory::Market)
            .scope(RuleScope::EachCrop)
            .condition(ConditionGroup::and(vec![
                ConditionGroup::or(vec![
                    leaf("crop.status", Operator::Equals, "HARVEST_READY"),
                    leaf("crop.daysUntilHarvest", Operator::LessThan, 21),
                ]),
                leaf("market.changePct", Operator::GreaterOrEqual, 5),
            ]))
            .title("Consider selling {crop.cropType}")
            .summary("{crop.cropType} prices are up {market.changePct}% to {market.price} per {market.unit}.")
            .reason("{crop.cropType} prices rose {market.changePct}% since the last observation.")
            .action_step("Compare offers from at least two buyers.")
            .action_step("Consider forward-selling part of the expected harvest.")
            .priority_template(PriorityTemplate::Thresholds {
                metric: field("market.changePct"),
                thresholds: vec![step(15.0, Priority::High)],
                otherwise: Priority::Medium,
            })
            .confidence(0.6)
            .impact(
                ImpactType::RevenueGain,
                Magnitude::Scaled {
                    metric: field("market.changePct"),
                    factor: 1.0,
                },
                "%",
            )
            .validity(ValidityRule::ForDays { days: 3 })
            .build()?,
        Rule::builder("MARKET_SELL_LIVESTOCK", "Favourable livestock price")
            .description("The latest market price for this species is notably above the previous observation.")
            .category(RuleCategory::Market)
            .scope(RuleScope::EachLivestock)
            .condition(leaf("market.changePct", Operator::GreaterOrEqual, 5))
            .title("Consider selling {livestock.species}")
            .summary("{livestock.species} prices are up {market.changePct}% to {market.price} per {market.unit}.")
            .reason("{livestock.species} prices rose {market.changePct}% since the last observation.")
            .action_step("Review which animals are at market weight.")
            .priority(Priority::Medium)
            .confidence(0.55)
            .impact(
                ImpactType::RevenueGain,
                Magnitude::Scaled {
                    metric: field("market.changePct"),
                    factor: 1.0,
                },
                "%",
            )
            .validity(ValidityRule::ForDays { days: 3 })
            .build()?,
        // Finance
        Rule::builder("FINANCE_EXPENSE_RATIO", "High expense ratio")
            .description("Expenses are consuming most of the income over the trailing period.")
            .category(RuleCategory::Finance)
            .scope(RuleScope::User)
            .condition(leaf("finance.expenseRatio", Operator::GreaterThan, 0.9))
            .title("Review farm expenses")
            .summary("Expenses are {finance.expenseTotal} against income of {finance.incomeTotal} over the last {finance.periodDays} days.")
            .reason("Expenses are {finance.expenseRatio} times income.")
            .action_step("Review the largest expense categories.")
            .action_step("Look for inputs that can be bought in bulk or shared.")
            .priority_template(PriorityTemplate::Thresholds {
                metric: field("finance.expenseRatio"),
                thresholds: vec![step(1.2, Priority::Urgent), step(1.0, Priority::High)],
                otherwise: Priority::Medium,
            })
            .confidence(0.7)
            .validity(ValidityRule::ForDays { days: 7 })
            .build()?,
        Rule::builder("FINANCE_NEGATIVE_CASHFLOW", "Negative cash flow")
            .description("Expenses exceeded income over the trailing period.")
            .category(RuleCategory::Finance)
            .scope(RuleScope::User)
            .condition(leaf("finance.netIncome", Operator::LessThan, 0))
            .title("Cash flow is negative")
            .summary("Net income over the last {finance.periodDays} days is {finance.netIncome}.")
            .reason("Net income over the last {finance.periodDays} days is {finance.netIncome}.")
            .action_step("Postpone non-essential purchases.")
            .action_step("Check for unpaid invoices and upcoming sales.")
            .priority(Priority::High)
            .confidence(0.8)
            .impact(
                ImpactType::CostSaving,
                Magnitude::Scaled {
                    metric: field("finance.netIncome"),
                    factor: -0.1,
                },
                "currency",
            )
            .validity(ValidityRule::ForDays { days: 7 })
            .supersedes("FINANCE_EXPENSE_RATIO")
            .build()?,
        // Weather and season
        Rule::builder("WEATHER_HEAVY_RAIN", "Heavy rain forecast")
            .description("Heavy rain can waterlog fields, wash out fertilizer and damage stored produce.")
            .category(RuleCategory::Weather)
            .scope(RuleScope::Farm)
            .condition(leaf("weather.rainfallMm", Operator::GreaterOrEqual, 80))
            .title("Prepare {farm.name} for heavy rain")
            .summary("{weather.rainfallMm} mm of rain is forecast over the next seven days.")
            .reason("{weather.rainfallMm} mm of rain is forecast.")
            .action_step("Clear drainage channels.")
            .action_step("Delay fertilizer application until after the rain.")
            .priority(Priority::High)
            .confidence(0.75)
            .impact(ImpactType::RiskReduction, Magnitude::Fixed { value: 1.0 }, "farm")
            .validity(ValidityRule::ForDays { days: 3 })
            .build()?,
        Rule::builder("SEASON_PLANTING_WINDOW", "Planting window open")
            .description("Spring is the main planting window and the farm has no active crops.")
            .category(RuleCategory::General)
            .scope(RuleScope::Farm)
            .condition(ConditionGroup::and(vec![
                leaf("season.name", Operator::Equals, "SPRING"),
                leaf("farm.activeCropCount", Operator::Equals, 0),
            ]))
            .title("Plan planting on {farm.name}")
            .summary("It is spring and no crops are recorded on {farm.name}.")
            .reason("No active crops are recorded on {farm.name}.")
            .action_step("Choose crops and varieties for this season.")
            .action_step("Prepare seedbeds and order inputs.")
            .priority(Priority::Low)
            .confidence(0.55)
            .validity(ValidityRule::ForDays { days: 14 })
            .build()?,
    ])
}
