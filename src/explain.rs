//! Rebuilds a human-readable explanation for a persisted recommendation.
//!
//! Pure read. The rule is looked up by code in the *current* catalog, so a
//! rule that has since moved to a newer version reports its current
//! description. A rule that no longer exists yields an explanation marked
//! unavailable that still carries the stored reasons.

use std::sync::Arc;

use serde::Serialize;

use crate::catalog::RuleCatalog;
use crate::confidence::{Confidence, ConfidenceBand};
use crate::error::{DseError, DseResult};
use crate::recommendation::{Impact, ImpactType, Recommendation, RecommendationId};
use crate::rule::display_value;
use crate::storage::RecommendationStore;
use crate::value::Value;

/// What the current catalog knows about the rule that fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleInfo {
    Available {
        name: String,
        description: String,
        current_version: u32,
        fired_version: u32,
    },
    Unavailable,
}

impl RuleInfo {
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// Explanation of a single recommendation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub recommendation_id: RecommendationId,
    /// Empty only if the stored evidence is empty.
    pub rule_code: String,
    pub rule: RuleInfo,
    pub reasons: Vec<String>,
    pub confidence: Confidence,
    pub confidence_band: ConfidenceBand,
    pub confidence_explanation: String,
    pub impact_sentence: Option<String>,
    /// `path = value`, sorted by path.
    pub evidence: Vec<String>,
    pub summary: String,
}

/// Builds explanations from stored recommendations and the current catalog.
pub struct Explainer {
    store: Arc<dyn RecommendationStore>,
    catalog: Arc<RuleCatalog>,
}

impl std::fmt::Debug for Explainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Explainer")
            .field("catalog", &self.catalog.fingerprint())
            .finish_non_exhaustive()
    }
}

impl Explainer {
    #[must_use]
    pub fn new(store: Arc<dyn RecommendationStore>, catalog: Arc<RuleCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Explain a stored recommendation.
    ///
    /// # Errors
    ///
    /// - `NotFound("recommendation")` if no such row exists.
    pub fn explain(&self, id: RecommendationId) -> DseResult<Explanation> {
        let rec = self
            .store
            .get(id)?
            .ok_or_else(|| DseError::not_found("recommendation", id))?;
        Ok(self.explain_recommendation(&rec))
    }

    /// Explain an already loaded recommendation.
    #[must_use]
    pub fn explain_recommendation(&self, rec: &Recommendation) -> Explanation {
        let card = &rec.card;
        let rule_code = card.rule_code().to_string();
        let rule = match self.catalog.get(&rule_code) {
            Some(r) => RuleInfo::Available {
                name: r.name.clone(),
                description: r.description.clone(),
                current_version: r.version,
                fired_version: card.evidence.rule_version,
            },
            None => RuleInfo::Unavailable,
        };

        let band = card.confidence.band();
        let evidence = card
            .evidence
            .observed
            .iter()
            .map(|(path, value)| format!("{path} = {}", display_value(value)))
            .collect();

        let summary = match &rule {
            RuleInfo::Available { name, .. } => format!(
                "{} Suggested by rule \"{name}\" with {} confidence ({:.0}%).",
                card.title,
                band.label().to_lowercase(),
                card.confidence.value() * 100.0
            ),
            RuleInfo::Unavailable => format!(
                "{} The rule that produced this recommendation ({rule_code}) is no longer available; the original reasons are shown.",
                card.title
            ),
        };

        Explanation {
            recommendation_id: rec.id,
            rule_code,
            rule,
            reasons: card.reason.clone(),
            confidence: card.confidence,
            confidence_band: band,
            confidence_explanation: band.explanation().to_string(),
            impact_sentence: card.impact.as_ref().map(impact_sentence),
            evidence,
            summary,
        }
    }
}

/// One sentence describing an impact estimate.
#[must_use]
pub fn impact_sentence(impact: &Impact) -> String {
    let amount = display_value(&Value::Float(impact.value));
    let unit = if impact.unit.is_empty() {
        String::new()
    } else {
        format!(" {}", impact.unit)
    };
    match impact.impact_type {
        ImpactType::YieldIncrease => format!("Acting on this could increase yield by about {amount}{unit}."),
        ImpactType::CostSaving => format!("Acting on this could save about {amount}{unit}."),
        ImpactType::RevenueGain => format!("Acting on this could add about {amount}{unit} in revenue."),
        ImpactType::LossPrevention => format!("Acting on this could prevent losses of about {amount}{unit}."),
        ImpactType::RiskReduction => format!("Acting on this could reduce risk by about {amount}{unit}."),
        ImpactType::HealthImprovement => {
            format!("Acting on this could improve animal health by about {amount}{unit}.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionGroup, Operator};
    use crate::context::UserId;
    use crate::recommendation::fixtures::card;
    use crate::rule::{Rule, RuleCategory, RuleScope};
    use crate::storage::{InMemoryRecommendationStore, RefreshCommit};
    use chrono::Utc;

    fn rule(code: &str, version: u32) -> Rule {
        Rule::builder(code, "Top-dress maize")
            .description("Maize benefits from nitrogen four to six weeks after planting.")
            .version(version)
            .category(RuleCategory::Crop)
            .scope(RuleScope::EachCrop)
            .condition(ConditionGroup::check("crop.plantedAt", Operator::Exists))
            .title("Fertilize")
            .reason("planted")
            .build()
            .unwrap()
    }

    fn stored(store: &InMemoryRecommendationStore, code: &str) -> Recommendation {
        let mut c = card(code, "c1");
        c.evidence
            .observed
            .insert("crop.daysSincePlanting".to_string(), Value::Int(35));
        c.impact = Some(Impact {
            impact_type: ImpactType::YieldIncrease,
            value: 12.5,
            unit: "%".to_string(),
        });
        store
            .commit_refresh(RefreshCommit {
                user_id: UserId::new(),
                farm_id: None,
                expected_generation: 0,
                at: Utc::now(),
                candidates: vec![c],
            })
            .unwrap()
            .inserted
            .remove(0)
    }

    #[test]
    fn test_explain_reports_current_version() {
        let store = Arc::new(InMemoryRecommendationStore::new());
        let rec = stored(&store, "R1");
        let catalog = Arc::new(RuleCatalog::new(vec![rule("R1", 1), rule("R1", 3)]).unwrap());
        let explainer = Explainer::new(store, catalog);

        let ex = explainer.explain(rec.id).unwrap();
        assert_eq!(ex.rule_code, "R1");
        assert!(matches!(
            ex.rule,
            RuleInfo::Available {
                current_version: 3,
                fired_version: 1,
                ..
            }
        ));
        assert_eq!(ex.evidence, vec!["crop.daysSincePlanting = 35".to_string()]);
        assert_eq!(ex.confidence_band, ConfidenceBand::Medium);
        assert_eq!(
            ex.impact_sentence.as_deref(),
            Some("Acting on this could increase yield by about 12.5 %.")
        );
    }

    #[test]
    fn test_missing_recommendation_is_not_found() {
        let explainer = Explainer::new(
            Arc::new(InMemoryRecommendationStore::new()),
            Arc::new(RuleCatalog::empty()),
        );
        assert!(explainer.explain(RecommendationId::new()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_removed_rule_is_unavailable_with_reasons() {
        let store = Arc::new(InMemoryRecommendationStore::new());
        let rec = stored(&store, "GONE");
        let explainer = Explainer::new(store, Arc::new(RuleCatalog::empty()));
        let ex = explainer.explain(rec.id).unwrap();
        assert_eq!(ex.rule, RuleInfo::Unavailable);
        assert_eq!(ex.reasons, vec!["because".to_string()]);
        assert!(ex.summary.contains("GONE"));
    }
}
