//! Rule types: an authored, versioned condition tree plus the templates that
//! turn a match into a recommendation card.
//!
//! Rules are data. They never change after authoring; new behavior ships as a
//! new `version` under the same `code`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::condition::ConditionGroup;
use crate::confidence::Confidence;
use crate::context::FactView;
use crate::error::{EvaluationError, ValidationError};
use crate::recommendation::{Impact, ImpactType, Priority};
use crate::time::{days_since, days_until};
use crate::value::Value;

/// Category a rule (and its recommendations) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleCategory {
    Crop,
    Livestock,
    Weather,
    Finance,
    Market,
    General,
}

impl RuleCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crop => "CROP",
            Self::Livestock => "LIVESTOCK",
            Self::Weather => "WEATHER",
            Self::Finance => "FINANCE",
            Self::Market => "MARKET",
            Self::General => "GENERAL",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule is evaluated against; also resolves `entityType`/`entityId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleScope {
    /// Once per non-terminal crop, with `crop.*` bound.
    EachCrop,
    /// Once per non-terminal livestock entry, with `livestock.*` bound.
    EachLivestock,
    /// Once per farm in scope.
    Farm,
    /// Once per context.
    User,
}

impl RuleScope {
    /// The `entityType` written on cards.
    #[must_use]
    pub const fn entity_type(self) -> &'static str {
        match self {
            Self::EachCrop => "CROP",
            Self::EachLivestock => "LIVESTOCK",
            Self::Farm => "FARM",
            Self::User => "USER",
        }
    }
}

/// A number derived from the facts, used by priority, confidence and impact
/// templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Metric {
    /// A numeric field.
    Field { path: String },
    /// Whole days since a date field.
    DaysSince { path: String },
    /// Whole days until a date field.
    DaysUntil { path: String },
}

impl Metric {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Field { path } | Self::DaysSince { path } | Self::DaysUntil { path } => path,
        }
    }

    /// Compute the metric for a bound view.
    ///
    /// # Errors
    ///
    /// `MissingField` if the path does not resolve, `TypeMismatch` if it is
    /// not a number (or date, for the day metrics).
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(&self, view: &FactView<'_>, now: DateTime<Utc>) -> Result<f64, EvaluationError> {
        let path = self.path();
        let value = view
            .resolve(path)
            .filter(|v| !v.is_null())
            .ok_or_else(|| EvaluationError::MissingField {
                path: path.to_string(),
            })?;
        let mismatch = |expected: &'static str| EvaluationError::TypeMismatch {
            path: path.to_string(),
            expected,
            actual: value.type_name(),
        };
        match self {
            Self::Field { .. } => value.as_float().ok_or_else(|| mismatch("number")),
            Self::DaysSince { .. } => value
                .as_date()
                .map(|d| days_since(d, now) as f64)
                .ok_or_else(|| mismatch("date")),
            Self::DaysUntil { .. } => value
                .as_date()
                .map(|d| days_until(d, now) as f64)
                .ok_or_else(|| mismatch("date")),
        }
    }
}

/// One step of a threshold priority ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityThreshold {
    /// Applies when the metric is `>= at_least`.
    pub at_least: f64,
    pub priority: Priority,
}

/// How a card's priority is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityTemplate {
    Fixed { priority: Priority },
    /// The first threshold (in authored order) the metric reaches wins;
    /// `otherwise` applies when none does.
    Thresholds {
        metric: Metric,
        thresholds: Vec<PriorityThreshold>,
        otherwise: Priority,
    },
}

impl PriorityTemplate {
    /// # Errors
    ///
    /// Propagates metric failures.
    pub fn compute(&self, view: &FactView<'_>, now: DateTime<Utc>) -> Result<Priority, EvaluationError> {
        match self {
            Self::Fixed { priority } => Ok(*priority),
            Self::Thresholds {
                metric,
                thresholds,
                otherwise,
            } => {
                let m = metric.compute(view, now)?;
                Ok(thresholds
                    .iter()
                    .find(|t| m >= t.at_least)
                    .map_or(*otherwise, |t| t.priority))
            }
        }
    }
}

/// How a card's confidence is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTemplate {
    Fixed { value: f64 },
    /// `base + per_unit * metric`, clamped to `[min, max]` and then to `[0, 1]`.
    Linear {
        metric: Metric,
        base: f64,
        per_unit: f64,
        #[serde(default)]
        min: f64,
        #[serde(default = "one")]
        max: f64,
    },
}

const fn one() -> f64 {
    1.0
}

impl ConfidenceTemplate {
    /// # Errors
    ///
    /// Propagates metric failures; `InvalidConfidence` for a non-finite result.
    pub fn compute(
        &self,
        view: &FactView<'_>,
        now: DateTime<Utc>,
    ) -> Result<Confidence, EvaluationError> {
        let (raw, bounds) = match self {
            Self::Fixed { value } => (*value, None),
            Self::Linear {
                metric,
                base,
                per_unit,
                min,
                max,
            } => (base + per_unit * metric.compute(view, now)?, Some((*min, *max))),
        };
        if !raw.is_finite() {
            return Err(EvaluationError::InvalidConfidence { value: raw });
        }
        let raw = bounds.map_or(raw, |(min, max)| raw.max(min).min(max));
        Ok(Confidence::clamped(raw))
    }
}

/// Magnitude of an impact estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Magnitude {
    Fixed { value: f64 },
    /// `metric * factor`.
    Scaled { metric: Metric, factor: f64 },
}

/// How a card's impact is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactTemplate {
    #[serde(rename = "type")]
    pub impact_type: ImpactType,
    pub magnitude: Magnitude,
    pub unit: String,
}

impl ImpactTemplate {
    /// # Errors
    ///
    /// Propagates metric failures; `InvalidImpact` for a non-finite result.
    pub fn compute(&self, view: &FactView<'_>, now: DateTime<Utc>) -> Result<Impact, EvaluationError> {
        let value = match &self.magnitude {
            Magnitude::Fixed { value } => *value,
            Magnitude::Scaled { metric, factor } => metric.compute(view, now)? * factor,
        };
        if !value.is_finite() {
            return Err(EvaluationError::InvalidImpact { value });
        }
        Ok(Impact {
            impact_type: self.impact_type,
            value: (value * 100.0).round() / 100.0,
            unit: self.unit.clone(),
        })
    }
}

/// Longest window a validity rule may author: ten years.
pub const MAX_VALIDITY_DAYS: u32 = 3650;

/// How long a card stays valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidityRule {
    ForHours { hours: u32 },
    ForDays { days: u32 },
    /// Valid until the date in a field; `fallback_days` applies when the field
    /// is absent or already past.
    UntilDateField {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback_days: Option<u32>,
    },
    /// No end date; replaced by the next evaluation.
    UntilNextEvaluation,
}

impl ValidityRule {
    /// `valid_until` for a card created at `now`.
    ///
    /// # Errors
    ///
    /// `ValidityOutOfRange` when the end date is not representable.
    pub fn valid_until(
        &self,
        view: &FactView<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, EvaluationError> {
        match self {
            Self::ForHours { hours } => {
                let delta = Duration::try_hours(i64::from(*hours));
                offset(now, delta, || format!("{hours} hours")).map(Some)
            }
            Self::ForDays { days } => {
                let delta = Duration::try_days(i64::from(*days));
                offset(now, delta, || format!("{days} days")).map(Some)
            }
            Self::UntilDateField {
                path,
                fallback_days,
            } => {
                let field = view.resolve(path).and_then(|v| v.as_date());
                if let Some(date) = field.filter(|d| *d > now) {
                    return Ok(Some(date));
                }
                fallback_days
                    .map(|d| offset(now, Duration::try_days(i64::from(d)), || format!("{d} days")))
                    .transpose()
            }
            Self::UntilNextEvaluation => Ok(None),
        }
    }

    /// Authored window length in days, if fixed.
    fn window_days(&self) -> Option<f64> {
        match self {
            Self::ForHours { hours } => Some(f64::from(*hours) / 24.0),
            Self::ForDays { days } => Some(f64::from(*days)),
            Self::UntilDateField { fallback_days, .. } => fallback_days.map(f64::from),
            Self::UntilNextEvaluation => None,
        }
    }
}

fn offset(
    now: DateTime<Utc>,
    delta: Option<Duration>,
    window: impl FnOnce() -> String,
) -> Result<DateTime<Utc>, EvaluationError> {
    delta
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| EvaluationError::ValidityOutOfRange { window: window() })
}

fn placeholder_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_.]+)\}").ok())
        .as_ref()
}

/// Text with `{field.path}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextTemplate(String);

impl TextTemplate {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Field paths referenced by placeholders, in order of appearance.
    #[must_use]
    pub fn placeholders(&self) -> Vec<String> {
        let Some(re) = placeholder_regex() else {
            return Vec::new();
        };
        re.captures_iter(&self.0)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Substitute every placeholder.
    ///
    /// # Errors
    ///
    /// `MissingField` for a placeholder that does not resolve.
    pub fn render(&self, view: &FactView<'_>) -> Result<String, EvaluationError> {
        let Some(re) = placeholder_regex() else {
            return Ok(self.0.clone());
        };
        let mut out = String::with_capacity(self.0.len());
        let mut last = 0;
        for caps in re.captures_iter(&self.0) {
            let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = view
                .resolve(path.as_str())
                .filter(|v| !v.is_null())
                .ok_or_else(|| EvaluationError::MissingField {
                    path: path.as_str().to_string(),
                })?;
            out.push_str(&self.0[last..whole.start()]);
            out.push_str(&display_value(&value));
            last = whole.end();
        }
        out.push_str(&self.0[last..]);
        Ok(out)
    }
}

impl From<&str> for TextTemplate {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TextTemplate {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Human-facing rendering: floats to at most two decimals, dates as days.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Float(f) if f.fract() == 0.0 => format!("{f:.0}"),
        Value::Float(f) => {
            let s = format!("{f:.2}");
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        other => other.to_string(),
    }
}

/// An authored rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Stable across versions.
    pub code: String,
    pub name: String,
    /// Static explanation of what the rule looks for.
    pub description: String,
    pub category: RuleCategory,
    pub version: u32,
    pub scope: RuleScope,
    pub condition: ConditionGroup,
    pub title: TextTemplate,
    /// Card description.
    pub summary: TextTemplate,
    pub reasons: Vec<TextTemplate>,
    #[serde(default)]
    pub action_steps: Vec<TextTemplate>,
    pub priority: PriorityTemplate,
    pub confidence: ConfidenceTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactTemplate>,
    pub validity: ValidityRule,
    /// Codes of rules whose candidates for the same entity this rule replaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<String>,
}

impl Rule {
    /// Creates a new rule builder.
    #[must_use]
    pub fn builder(code: impl Into<String>, name: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(code, name)
    }

    /// Every field path this rule reads: condition leaves, template
    /// placeholders and metric inputs. Sorted and deduplicated.
    #[must_use]
    pub fn features(&self) -> Vec<String> {
        let mut paths: BTreeSet<String> = self.condition.field_paths().into_iter().collect();
        let texts = std::iter::once(&self.title)
            .chain(std::iter::once(&self.summary))
            .chain(&self.reasons)
            .chain(&self.action_steps);
        for t in texts {
            paths.extend(t.placeholders());
        }
        if let PriorityTemplate::Thresholds { metric, .. } = &self.priority {
            paths.insert(metric.path().to_string());
        }
        if let ConfidenceTemplate::Linear { metric, .. } = &self.confidence {
            paths.insert(metric.path().to_string());
        }
        if let Some(ImpactTemplate {
            magnitude: Magnitude::Scaled { metric, .. },
            ..
        }) = &self.impact
        {
            paths.insert(metric.path().to_string());
        }
        paths.into_iter().collect()
    }

    /// Structural checks shared by the builder and catalog loading.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidRule` describing the first defect.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidRule {
            code: self.code.clone(),
            reason,
        };
        if self.code.trim().is_empty() {
            return Err(invalid("code is empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if self.version == 0 {
            return Err(invalid("version must be at least 1".to_string()));
        }
        if self.reasons.is_empty() {
            return Err(invalid("at least one reason template is required".to_string()));
        }
        if let ConfidenceTemplate::Fixed { value } = self.confidence {
            if Confidence::new(value).is_err() {
                return Err(invalid(format!("fixed confidence {value} is out of range")));
            }
        }
        if self
            .validity
            .window_days()
            .is_some_and(|d| d > f64::from(MAX_VALIDITY_DAYS))
        {
            return Err(invalid(format!(
                "validity window exceeds {MAX_VALIDITY_DAYS} days"
            )));
        }
        if self.supersedes.iter().any(|c| c == &self.code) {
            return Err(invalid("a rule cannot supersede itself".to_string()));
        }
        self.condition.validate().map_err(invalid)
    }
}

/// Builder for [`Rule`].
///
/// Required: code, name, category, scope, condition, title, one reason.
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    code: String,
    name: String,
    description: String,
    category: Option<RuleCategory>,
    version: u32,
    scope: Option<RuleScope>,
    condition: Option<ConditionGroup>,
    title: Option<TextTemplate>,
    summary: Option<TextTemplate>,
    reasons: Vec<TextTemplate>,
    action_steps: Vec<TextTemplate>,
    priority: PriorityTemplate,
    confidence: ConfidenceTemplate,
    impact: Option<ImpactTemplate>,
    validity: ValidityRule,
    supersedes: Vec<String>,
}

impl RuleBuilder {
    #[must_use]
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: String::new(),
            category: None,
            version: 1,
            scope: None,
            condition: None,
            title: None,
            summary: None,
            reasons: Vec::new(),
            action_steps: Vec::new(),
            priority: PriorityTemplate::Fixed {
                priority: Priority::Medium,
            },
            confidence: ConfidenceTemplate::Fixed { value: 0.7 },
            impact: None,
            validity: ValidityRule::UntilNextEvaluation,
            supersedes: Vec::new(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn category(mut self, category: RuleCategory) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: RuleScope) -> Self {
        self.scope = Some(scope);
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: ConditionGroup) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<TextTemplate>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn summary(mut self, summary: impl Into<TextTemplate>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<TextTemplate>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    #[must_use]
    pub fn action_step(mut self, step: impl Into<TextTemplate>) -> Self {
        self.action_steps.push(step.into());
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = PriorityTemplate::Fixed { priority };
        self
    }

    #[must_use]
    pub fn priority_template(mut self, template: PriorityTemplate) -> Self {
        self.priority = template;
        self
    }

    #[must_use]
    pub fn confidence(mut self, value: f64) -> Self {
        self.confidence = ConfidenceTemplate::Fixed { value };
        self
    }

    #[must_use]
    pub fn confidence_template(mut self, template: ConfidenceTemplate) -> Self {
        self.confidence = template;
        self
    }

    #[must_use]
    pub fn impact(mut self, impact_type: ImpactType, magnitude: Magnitude, unit: impl Into<String>) -> Self {
        self.impact = Some(ImpactTemplate {
            impact_type,
            magnitude,
            unit: unit.into(),
        });
        self
    }

    #[must_use]
    pub fn validity(mut self, validity: ValidityRule) -> Self {
        self.validity = validity;
        self
    }

    #[must_use]
    pub fn supersedes(mut self, code: impl Into<String>) -> Self {
        self.supersedes.push(code.into());
        self
    }

    /// Builds the rule.
    ///
    /// # Errors
    ///
    /// `MissingField` for an unset required field; otherwise whatever
    /// [`Rule::validate`] reports.
    pub fn build(self) -> Result<Rule, ValidationError> {
        let missing = |field: &str| ValidationError::MissingField {
            field: field.to_string(),
        };
        let category = self.category.ok_or_else(|| missing("category"))?;
        let scope = self.scope.ok_or_else(|| missing("scope"))?;
        let condition = self.condition.ok_or_else(|| missing("condition"))?;
        let title = self.title.ok_or_else(|| missing("title"))?;
        let summary = self.summary.unwrap_or_else(|| title.clone());

        let rule = Rule {
            code: self.code,
            name: self.name,
            description: self.description,
            category,
            version: self.version,
            scope,
            condition,
            title,
            summary,
            reasons: self.reasons,
            action_steps: self.action_steps,
            priority: self.priority,
            confidence: self.confidence,
            impact: self.impact,
            validity: self.validity,
            supersedes: self.supersedes,
        };
        rule.validate()?;
        Ok(rule)
    }
}
