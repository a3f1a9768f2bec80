//! The rules engine: catalog × context → ranked recommendation candidates.
//!
//! One pass:
//! 1. For each active rule, bind it per its scope and evaluate the condition
//!    tree with the context's single captured `now`.
//! 2. Instantiate a card for each match. A template failure skips that
//!    rule/binding only and is recorded as a [`RuleFailure`].
//! 3. Collapse duplicates on `(category, entityType, entityId, rule code)`.
//! 4. Drop candidates superseded by another candidate for the same entity.
//! 5. Rank: priority, then confidence descending, then rule code, then entity.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::RuleCatalog;
use crate::context::{EvaluationContext, FactView, FarmId};
use crate::error::EvaluationError;
use crate::recommendation::{DedupKey, Evidence, RecommendationCard};
use crate::rule::{Rule, RuleScope};

/// Default model-version label.
pub const DEFAULT_MODEL_LABEL: &str = "dse-rules";

/// A rule that matched but could not be turned into a card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFailure {
    pub rule_code: String,
    pub rule_version: u32,
    pub entity_type: &'static str,
    pub entity_id: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: EvaluationError,
}

fn serialize_display<S: serde::Serializer>(
    err: &EvaluationError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(err)
}

/// Output of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Ranked, deduplicated candidates.
    pub candidates: Vec<RecommendationCard>,
    /// Rules skipped because instantiation failed.
    pub failures: Vec<RuleFailure>,
    /// Active rules considered.
    pub rules_evaluated: usize,
    /// Candidates dropped by dedup or supersession.
    pub dropped: usize,
    pub evaluated_at: DateTime<Utc>,
}

struct Target<'a> {
    view: FactView<'a>,
    entity_id: String,
    farm_id: Option<FarmId>,
}

/// Evaluates a catalog against contexts.
///
/// Cheap to clone; the catalog is shared.
#[derive(Debug, Clone)]
pub struct RulesEngine {
    catalog: Arc<RuleCatalog>,
    model_version: String,
}

impl RulesEngine {
    /// Create an engine. The model version is `label` plus the catalog
    /// fingerprint.
    #[must_use]
    pub fn new(catalog: Arc<RuleCatalog>, label: &str) -> Self {
        let model_version = format!("{label}+{}", catalog.fingerprint());
        Self {
            catalog,
            model_version,
        }
    }

    #[must_use]
    pub fn with_default_label(catalog: Arc<RuleCatalog>) -> Self {
        Self::new(catalog, DEFAULT_MODEL_LABEL)
    }

    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        &self.catalog
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Run every active rule against `ctx`.
    ///
    /// Never fails: rule-level problems are reported in
    /// [`EvaluationReport::failures`].
    #[must_use]
    pub fn evaluate(&self, ctx: &EvaluationContext) -> EvaluationReport {
        let now = ctx.evaluated_at();
        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        let mut rules_evaluated = 0;

        for rule in self.catalog.active_rules() {
            rules_evaluated += 1;
            for binding in targets(rule.scope, ctx) {
                if !rule.condition.evaluate(&binding.view, now) {
                    continue;
                }
                match self.instantiate(rule, &binding, now) {
                    Ok(card) => candidates.push(card),
                    Err(error) => {
                        warn!(
                            rule = %rule.code,
                            version = rule.version,
                            entity_id = %binding.entity_id,
                            error = %error,
                            "rule skipped: template instantiation failed"
                        );
                        failures.push(RuleFailure {
                            rule_code: rule.code.clone(),
                            rule_version: rule.version,
                            entity_type: rule.scope.entity_type(),
                            entity_id: binding.entity_id,
                            error,
                        });
                    }
                }
            }
        }

        let matched = candidates.len();
        let mut candidates = self.apply_supersession(dedup(candidates));
        rank(&mut candidates);

        debug!(
            user_id = %ctx.user_id(),
            rules = rules_evaluated,
            matched,
            emitted = candidates.len(),
            failed = failures.len(),
            "evaluation pass complete"
        );

        EvaluationReport {
            dropped: matched - candidates.len(),
            candidates,
            failures,
            rules_evaluated,
            evaluated_at: now,
        }
    }

    fn instantiate(
        &self,
        rule: &Rule,
        binding: &Target<'_>,
        now: DateTime<Utc>,
    ) -> Result<RecommendationCard, EvaluationError> {
        let view = &binding.view;
        let priority = rule.priority.compute(view, now)?;
        let confidence = rule.confidence.compute(view, now)?;
        let impact = rule
            .impact
            .as_ref()
            .map(|t| t.compute(view, now))
            .transpose()?;
        let title = rule.title.render(view)?;
        let description = rule.summary.render(view)?;
        let reason = rule
            .reasons
            .iter()
            .map(|t| t.render(view))
            .collect::<Result<Vec<_>, _>>()?;
        let action_steps = rule
            .action_steps
            .iter()
            .map(|t| t.render(view))
            .collect::<Result<Vec<_>, _>>()?;

        let valid_until = rule.validity.valid_until(view, now)?;
        let features = rule.features();
        let observed = features
            .iter()
            .filter_map(|p| {
                view.resolve(p)
                    .filter(|v| !v.is_null())
                    .map(|v| (p.clone(), v))
            })
            .collect::<BTreeMap<_, _>>();

        Ok(RecommendationCard {
            farm_id: binding.farm_id,
            category: rule.category,
            priority,
            title,
            description,
            action_steps,
            reason,
            impact,
            confidence,
            confidence_label: confidence.band(),
            evidence: Evidence {
                rules_fired: vec![rule.code.clone()],
                features,
                observed,
                rule_version: rule.version,
            },
            model_version: self.model_version.clone(),
            valid_from: now,
            valid_until,
            entity_type: rule.scope.entity_type().to_string(),
            entity_id: binding.entity_id.clone(),
        })
    }

    /// Drop any candidate whose rule code is superseded by another candidate
    /// for the same entity.
    fn apply_supersession(&self, candidates: Vec<RecommendationCard>) -> Vec<RecommendationCard> {
        let mut superseded: HashMap<(String, String), HashSet<String>> = HashMap::new();
        for card in &candidates {
            let Some(rule) = self.catalog.get(card.rule_code()) else {
                continue;
            };
            if rule.supersedes.is_empty() {
                continue;
            }
            superseded
                .entry((card.entity_type.clone(), card.entity_id.clone()))
                .or_default()
                .extend(rule.supersedes.iter().cloned());
        }
        if superseded.is_empty() {
            return candidates;
        }
        candidates
            .into_iter()
            .filter(|card| {
                let key = (card.entity_type.clone(), card.entity_id.clone());
                let dropped = superseded
                    .get(&key)
                    .is_some_and(|codes| codes.contains(card.rule_code()));
                if dropped {
                    debug!(rule = %card.rule_code(), entity_id = %card.entity_id, "candidate superseded");
                }
                !dropped
            })
            .collect()
    }
}

fn targets(scope: RuleScope, ctx: &EvaluationContext) -> Vec<Target<'_>> {
    match scope {
        RuleScope::EachCrop => ctx
            .crops()
            .iter()
            .map(|c| Target {
                view: FactView::crop(ctx, c),
                entity_id: c.id.clone(),
                farm_id: Some(c.farm_id),
            })
            .collect(),
        RuleScope::EachLivestock => ctx
            .livestock()
            .iter()
            .map(|l| Target {
                view: FactView::livestock(ctx, l),
                entity_id: l.id.clone(),
                farm_id: Some(l.farm_id),
            })
            .collect(),
        RuleScope::Farm => ctx
            .farms()
            .iter()
            .map(|f| Target {
                view: FactView::farm(ctx, f),
                entity_id: f.id.to_string(),
                farm_id: Some(f.id),
            })
            .collect(),
        RuleScope::User => vec![Target {
            view: FactView::unbound(ctx),
            entity_id: ctx.user_id().to_string(),
            farm_id: ctx.farm_id(),
        }],
    }
}

/// Keep the first candidate per dedup key, preserving order.
fn dedup(candidates: Vec<RecommendationCard>) -> Vec<RecommendationCard> {
    let mut seen: HashSet<DedupKey> = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.dedup_key()))
        .collect()
}

/// Priority ascending, confidence descending, rule code, entity id.
#[must_use]
pub fn rank_order(a: &RecommendationCard, b: &RecommendationCard) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.confidence.value().total_cmp(&a.confidence.value()))
        .then_with(|| a.rule_code().cmp(b.rule_code()))
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

/// Sort candidates into presentation order. See [`rank_order`].
pub fn rank(candidates: &mut [RecommendationCard]) {
    candidates.sort_by(rank_order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionGroup, Operator};
    use crate::context::{CropFact, FarmRecord, UserId, UserProfile};
    use crate::recommendation::Priority;
    use crate::rule::RuleCategory;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn crop_rule(code: &str, priority: Priority, confidence: f64) -> crate::rule::RuleBuilder {
        Rule::builder(code, code)
            .category(RuleCategory::Crop)
            .scope(RuleScope::EachCrop)
            .condition(ConditionGroup::check("crop.plantedAt", Operator::Exists))
            .title("{crop.name}")
            .reason("planted")
            .priority(priority)
            .confidence(confidence)
    }

    fn ctx(crops: Vec<CropFact>) -> EvaluationContext {
        let user = UserId::new();
        let farm = FarmRecord {
            id: crops.first().map_or_else(FarmId::new, |c| c.farm_id),
            owner_id: user,
            name: "Home".to_string(),
            region: None,
            size_hectares: None,
        };
        EvaluationContext::new(UserProfile::new(user), now())
            .with_farms(vec![farm])
            .with_crops(crops)
    }

    fn planted(id: &str, farm: FarmId, days: i64) -> CropFact {
        CropFact::new(id, farm, format!("Field {id}"), "maize").planted_at(now() - Duration::days(days))
    }

    #[test]
    fn test_one_candidate_per_matching_entity() {
        let farm = FarmId::new();
        let catalog = RuleCatalog::new(vec![crop_rule("R1", Priority::Medium, 0.7).build().unwrap()]).unwrap();
        let engine = RulesEngine::with_default_label(Arc::new(catalog));
        let report = engine.evaluate(&ctx(vec![planted("a", farm, 3), planted("b", farm, 5)]));
        assert_eq!(report.candidates.len(), 2);
        assert_eq!(report.candidates[0].entity_id, "a");
        assert_eq!(report.candidates[0].farm_id, Some(farm));
        assert!(report.candidates[0].model_version.starts_with("dse-rules+"));
    }

    #[test]
    fn test_duplicate_entities_collapse() {
        let farm = FarmId::new();
        let catalog = RuleCatalog::new(vec![crop_rule("R1", Priority::Medium, 0.7).build().unwrap()]).unwrap();
        let engine = RulesEngine::with_default_label(Arc::new(catalog));
        let report = engine.evaluate(&ctx(vec![planted("a", farm, 3), planted("a", farm, 3)]));
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn test_different_rules_same_entity_both_kept() {
        let farm = FarmId::new();
        let catalog = RuleCatalog::new(vec![
            crop_rule("R1", Priority::Medium, 0.7).build().unwrap(),
            crop_rule("R2", Priority::Medium, 0.7).build().unwrap(),
        ])
        .unwrap();
        let engine = RulesEngine::with_default_label(Arc::new(catalog));
        let report = engine.evaluate(&ctx(vec![planted("a", farm, 3)]));
        let codes: Vec<&str> = report.candidates.iter().map(|c| c.rule_code()).collect();
        assert_eq!(codes, vec!["R1", "R2"]);
    }

    #[test]
    fn test_supersession_drops_only_same_entity() {
        let farm = FarmId::new();
        let catalog = RuleCatalog::new(vec![
            crop_rule("R1", Priority::Medium, 0.7).build().unwrap(),
            crop_rule("R2", Priority::High, 0.7)
                .condition(ConditionGroup::leaf(
                    "crop.daysSincePlanting",
                    Operator::GreaterThan,
                    10,
                ))
                .supersedes("R1")
                .build()
                .unwrap(),
        ])
        .unwrap();
        let engine = RulesEngine::with_default_label(Arc::new(catalog));
        let report = engine.evaluate(&ctx(vec![planted("old", farm, 20), planted("new", farm, 2)]));
        let got: Vec<(&str, &str)> = report
            .candidates
            .iter()
            .map(|c| (c.rule_code(), c.entity_id.as_str()))
            .collect();
        assert_eq!(got, vec![("R2", "old"), ("R1", "new")]);
    }

    #[test]
    fn test_ranking_order() {
        let farm = FarmId::new();
        let catalog = RuleCatalog::new(vec![
            crop_rule("B_LOW", Priority::Low, 0.9).build().unwrap(),
            crop_rule("A_MED_LOWCONF", Priority::Medium, 0.5).build().unwrap(),
            crop_rule("Z_MED_HIGHCONF", Priority::Medium, 0.9).build().unwrap(),
            crop_rule("C_URGENT", Priority::Urgent, 0.1).build().unwrap(),
        ])
        .unwrap();
        let engine = RulesEngine::with_default_label(Arc::new(catalog));
        let report = engine.evaluate(&ctx(vec![planted("a", farm, 3)]));
        let codes: Vec<&str> = report.candidates.iter().map(|c| c.rule_code()).collect();
        assert_eq!(codes, vec!["C_URGENT", "Z_MED_HIGHCONF", "A_MED_LOWCONF", "B_LOW"]);
    }

    #[test]
    fn test_failing_rule_is_isolated() {
        let farm = FarmId::new();
        let catalog = RuleCatalog::new(vec![
            crop_rule("BROKEN", Priority::Medium, 0.7)
                .reason("fertilized {crop.lastFertilizedAt}")
                .build()
                .unwrap(),
            crop_rule("OK", Priority::Medium, 0.7).build().unwrap(),
        ])
        .unwrap();
        let engine = RulesEngine::with_default_label(Arc::new(catalog));
        let report = engine.evaluate(&ctx(vec![planted("a", farm, 3)]));
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].rule_code(), "OK");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].rule_code, "BROKEN");
        assert_eq!(report.rules_evaluated, 2);
    }

    #[test]
    fn test_unrepresentable_validity_is_isolated() {
        let late = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        let farm = FarmId::new();
        let catalog = RuleCatalog::new(vec![
            crop_rule("BAD", Priority::Medium, 0.7)
                .validity(crate::rule::ValidityRule::ForDays { days: 1 })
                .build()
                .unwrap(),
            crop_rule("OK", Priority::Medium, 0.7).build().unwrap(),
        ])
        .unwrap();
        let engine = RulesEngine::with_default_label(Arc::new(catalog));
        let crop = CropFact::new("a", farm, "Field a", "maize").planted_at(late - Duration::days(3));
        let ctx = EvaluationContext::new(UserProfile::new(UserId::new()), late).with_crops(vec![crop]);

        let report = engine.evaluate(&ctx);
        let codes: Vec<&str> = report.candidates.iter().map(|c| c.rule_code()).collect();
        assert_eq!(codes, vec!["OK"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].rule_code, "BAD");
        assert!(matches!(
            report.failures[0].error,
            EvaluationError::ValidityOutOfRange { .. }
        ));
    }

    #[test]
    fn test_evidence_records_observed_values() {
        let farm = FarmId::new();
        let catalog = RuleCatalog::new(vec![crop_rule("R1", Priority::Medium, 0.7).build().unwrap()]).unwrap();
        let engine = RulesEngine::with_default_label(Arc::new(catalog));
        let report = engine.evaluate(&ctx(vec![planted("a", farm, 3)]));
        let evidence = &report.candidates[0].evidence;
        assert_eq!(evidence.rules_fired, vec!["R1".to_string()]);
        assert_eq!(
            evidence.features,
            vec!["crop.name".to_string(), "crop.plantedAt".to_string()]
        );
        assert_eq!(
            evidence.observed.get("crop.name"),
            Some(&crate::value::Value::from("Field a"))
        );
    }

    #[test]
    fn test_farm_and_user_scopes() {
        let farm = FarmId::new();
        let farm_rule = Rule::builder("F", "farm")
            .category(RuleCategory::General)
            .scope(RuleScope::Farm)
            .condition(ConditionGroup::check("farm.name", Operator::Exists))
            .title("{farm.name}")
            .reason("r")
            .build()
            .unwrap();
        let user_rule = Rule::builder("U", "user")
            .category(RuleCategory::General)
            .scope(RuleScope::User)
            .condition(ConditionGroup::leaf("season.month", Operator::Equals, 6))
            .title("June")
            .reason("r")
            .build()
            .unwrap();
        let catalog = RuleCatalog::new(vec![farm_rule, user_rule]).unwrap();
        let engine = RulesEngine::with_default_label(Arc::new(catalog));
        let context = ctx(vec![planted("a", farm, 3)]);
        let report = engine.evaluate(&context);
        assert_eq!(report.candidates.len(), 2);
        let farm_card = report.candidates.iter().find(|c| c.rule_code() == "F").unwrap();
        assert_eq!(farm_card.entity_type, "FARM");
        assert_eq!(farm_card.entity_id, farm.to_string());
        assert_eq!(farm_card.title, "Home");
        let user_card = report.candidates.iter().find(|c| c.rule_code() == "U").unwrap();
        assert_eq!(user_card.entity_id, context.user_id().to_string());
    }
}
