//! Condition trees and their evaluation.
//!
//! Evaluation is total: an unresolvable field path, a type mismatch or a
//! malformed operand makes a leaf evaluate to `false`. Nothing here returns an
//! error, so a defective rule can at worst fail to match.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{OnceLock, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::FactView;
use crate::time::{days_since, days_until};
use crate::value::Value;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, regex::Regex>>> = OnceLock::new();

/// Compile `pattern`, reusing a process-wide bounded cache.
///
/// Returns `None` for invalid patterns.
fn cached_regex(pattern: &str) -> Option<regex::Regex> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Ok(guard) = cache.read() {
        if let Some(re) = guard.get(pattern) {
            return Some(re.clone());
        }
    }

    let compiled = regex::Regex::new(pattern).ok()?;

    if let Ok(mut guard) = cache.write() {
        if guard.len() >= REGEX_CACHE_MAX {
            guard.clear();
        }
        guard
            .entry(pattern.to_string())
            .or_insert_with(|| compiled.clone());
    }
    Some(compiled)
}

/// The closed set of leaf operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    /// Inclusive; operand is a two-element list `[low, high]`.
    Between,
    /// Operand is a list.
    In,
    NotIn,
    /// Substring for strings, membership for lists.
    Contains,
    NotContains,
    /// Operand is a regular expression.
    Matches,
    Exists,
    NotExists,
    DaysSinceGreaterThan,
    DaysSinceLessThan,
    DaysUntilLessThan,
    DaysUntilGreaterThan,
}

impl Operator {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "EQUALS",
            Self::NotEquals => "NOT_EQUALS",
            Self::GreaterThan => "GREATER_THAN",
            Self::LessThan => "LESS_THAN",
            Self::GreaterOrEqual => "GREATER_OR_EQUAL",
            Self::LessOrEqual => "LESS_OR_EQUAL",
            Self::Between => "BETWEEN",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::Matches => "MATCHES",
            Self::Exists => "EXISTS",
            Self::NotExists => "NOT_EXISTS",
            Self::DaysSinceGreaterThan => "DAYS_SINCE_GREATER_THAN",
            Self::DaysSinceLessThan => "DAYS_SINCE_LESS_THAN",
            Self::DaysUntilLessThan => "DAYS_UNTIL_LESS_THAN",
            Self::DaysUntilGreaterThan => "DAYS_UNTIL_GREATER_THAN",
        }
    }

    /// Operators that need no operand.
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Exists | Self::NotExists)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leaf predicate `(field, operator, operand)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl Condition {
    #[must_use]
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluate this leaf against a view.
    #[must_use]
    pub fn matches(&self, view: &FactView<'_>, now: DateTime<Utc>) -> bool {
        let resolved = view.resolve(&self.field).filter(|v| !v.is_null());

        match self.operator {
            Operator::Exists => return resolved.is_some(),
            Operator::NotExists => return resolved.is_none(),
            _ => {}
        }

        let Some(actual) = resolved else {
            return false;
        };
        apply(self.operator, &actual, &self.value, now)
    }
}

fn apply(op: Operator, actual: &Value, operand: &Value, now: DateTime<Utc>) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};

    match op {
        Operator::Equals => actual.loosely_equals(operand),
        Operator::NotEquals => {
            // Incomparable types are a mismatch, not an inequality.
            same_kind(actual, operand) && !actual.loosely_equals(operand)
        }
        Operator::GreaterThan => matches!(actual.compare(operand), Some(Greater)),
        Operator::LessThan => matches!(actual.compare(operand), Some(Less)),
        Operator::GreaterOrEqual => matches!(actual.compare(operand), Some(Greater | Equal)),
        Operator::LessOrEqual => matches!(actual.compare(operand), Some(Less | Equal)),
        Operator::Between => match operand.as_list() {
            Some([low, high]) => {
                matches!(actual.compare(low), Some(Greater | Equal))
                    && matches!(actual.compare(high), Some(Less | Equal))
            }
            _ => false,
        },
        Operator::In => operand
            .as_list()
            .is_some_and(|items| items.iter().any(|i| actual.loosely_equals(i))),
        Operator::NotIn => operand
            .as_list()
            .is_some_and(|items| !items.iter().any(|i| actual.loosely_equals(i))),
        Operator::Contains => contains(actual, operand).unwrap_or(false),
        Operator::NotContains => contains(actual, operand).is_some_and(|c| !c),
        Operator::Matches => match (actual.as_str(), operand.as_str()) {
            (Some(text), Some(pattern)) => cached_regex(pattern).is_some_and(|re| re.is_match(text)),
            _ => false,
        },
        Operator::DaysSinceGreaterThan => {
            day_delta(actual, operand, |d| days_since(d, now)).is_some_and(|(n, t)| n > t)
        }
        Operator::DaysSinceLessThan => {
            day_delta(actual, operand, |d| days_since(d, now)).is_some_and(|(n, t)| n < t)
        }
        Operator::DaysUntilLessThan => {
            day_delta(actual, operand, |d| days_until(d, now)).is_some_and(|(n, t)| n < t)
        }
        Operator::DaysUntilGreaterThan => {
            day_delta(actual, operand, |d| days_until(d, now)).is_some_and(|(n, t)| n > t)
        }
        Operator::Exists | Operator::NotExists => false,
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    (a.is_number() && b.is_number())
        || (a.as_date().is_some() && b.as_date().is_some())
        || std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// `None` when the operand types make the question meaningless.
fn contains(actual: &Value, operand: &Value) -> Option<bool> {
    match actual {
        Value::String(s) => Some(s.contains(operand.as_str()?)),
        Value::List(items) => Some(items.iter().any(|i| i.loosely_equals(operand))),
        _ => None,
    }
}

/// Day count computed from the fact date, paired with the numeric threshold.
#[allow(clippy::cast_precision_loss)]
fn day_delta(
    actual: &Value,
    operand: &Value,
    days: impl Fn(DateTime<Utc>) -> i64,
) -> Option<(f64, f64)> {
    let date = actual.as_date()?;
    let threshold = operand.as_float()?;
    Some((days(date) as f64, threshold))
}

/// A node in a condition tree.
///
/// # Examples
///
/// ```
/// use farmdse::{ConditionGroup, Operator};
///
/// let tree = ConditionGroup::and(vec![
///     ConditionGroup::leaf("crop.daysSincePlanting", Operator::GreaterOrEqual, 30),
///     ConditionGroup::leaf("crop.daysSincePlanting", Operator::LessThan, 40),
/// ]);
/// assert_eq!(tree.field_paths(), vec!["crop.daysSincePlanting".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionGroup {
    Leaf(Condition),
    And { children: Vec<ConditionGroup> },
    Or { children: Vec<ConditionGroup> },
    Not { child: Box<ConditionGroup> },
}

impl ConditionGroup {
    #[must_use]
    pub fn leaf(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::Leaf(Condition::new(field, operator, value))
    }

    /// A unary leaf (`EXISTS`, `NOT_EXISTS`).
    #[must_use]
    pub fn check(field: impl Into<String>, operator: Operator) -> Self {
        Self::Leaf(Condition::new(field, operator, Value::Null))
    }

    #[must_use]
    pub fn and(children: Vec<Self>) -> Self {
        Self::And { children }
    }

    #[must_use]
    pub fn or(children: Vec<Self>) -> Self {
        Self::Or { children }
    }

    #[must_use]
    pub fn negate(child: Self) -> Self {
        Self::Not {
            child: Box::new(child),
        }
    }

    /// Evaluate the tree. AND stops at the first false child, OR at the first
    /// true one.
    #[must_use]
    pub fn evaluate(&self, view: &FactView<'_>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Leaf(c) => c.matches(view, now),
            Self::And { children } => children.iter().all(|c| c.evaluate(view, now)),
            Self::Or { children } => children.iter().any(|c| c.evaluate(view, now)),
            Self::Not { child } => !child.evaluate(view, now),
        }
    }

    /// Every field path referenced by a leaf, sorted and deduplicated.
    #[must_use]
    pub fn field_paths(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        self.collect_paths(&mut out);
        out.into_iter().collect()
    }

    fn collect_paths(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Leaf(c) => {
                out.insert(c.field.clone());
            }
            Self::And { children } | Self::Or { children } => {
                for c in children {
                    c.collect_paths(out);
                }
            }
            Self::Not { child } => child.collect_paths(out),
        }
    }

    /// Structural check: combinators have children, leaves name a field and
    /// carry an operand unless the operator is unary.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason for the first defect found.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Leaf(c) => {
                if c.field.trim().is_empty() {
                    return Err("condition field path is empty".to_string());
                }
                if !c.operator.is_unary() && c.value.is_null() {
                    return Err(format!("operator {} on '{}' needs an operand", c.operator, c.field));
                }
                Ok(())
            }
            Self::And { children } | Self::Or { children } => {
                if children.is_empty() {
                    return Err("AND/OR group has no children".to_string());
                }
                children.iter().try_for_each(Self::validate)
            }
            Self::Not { child } => child.validate(),
        }
    }
}

/// Free-function form of [`ConditionGroup::evaluate`].
#[must_use]
pub fn evaluate(group: &ConditionGroup, view: &FactView<'_>, now: DateTime<Utc>) -> bool {
    group.evaluate(view, now)
}
