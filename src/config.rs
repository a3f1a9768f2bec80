//! Engine configuration.
//!
//! Layered: built-in defaults, then an optional JSON file, then `FARMDSE_*`
//! environment variables.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "FARMDSE_";

/// Upper bound on every configured window: ten years.
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// Decision-support configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DseConfig {
    /// How long a persisted set is served from cache.
    pub freshness_window_secs: i64,
    /// Prefix of every card's model version.
    pub model_version_label: String,
    /// Trailing window for finance aggregates.
    pub finance_window_days: i64,
    /// Recently resolved recommendations are not re-issued within this
    /// window. Zero disables.
    pub resolved_suppression_days: i64,
    pub max_feedback_comment_len: usize,
}

impl Default for DseConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 3600,
            model_version_label: crate::engine::DEFAULT_MODEL_LABEL.to_string(),
            finance_window_days: 90,
            resolved_suppression_days: 7,
            max_feedback_comment_len: 2000,
        }
    }
}

impl DseConfig {
    /// Parse and validate a JSON document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed JSON or out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&json)
    }

    /// Overlay values from the process environment.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if a variable is set but unparsable, or the result is
    /// out of range.
    pub fn with_env_overrides(self) -> Result<Self, ValidationError> {
        self.with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Overlay values from an arbitrary lookup keyed by unprefixed name.
    ///
    /// # Errors
    ///
    /// See [`Self::with_env_overrides`].
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FRESHNESS_WINDOW_SECS") {
            self.freshness_window_secs = parse_var("FRESHNESS_WINDOW_SECS", &v)?;
        }
        if let Some(v) = lookup("MODEL_VERSION_LABEL") {
            self.model_version_label = v;
        }
        if let Some(v) = lookup("FINANCE_WINDOW_DAYS") {
            self.finance_window_days = parse_var("FINANCE_WINDOW_DAYS", &v)?;
        }
        if let Some(v) = lookup("RESOLVED_SUPPRESSION_DAYS") {
            self.resolved_suppression_days = parse_var("RESOLVED_SUPPRESSION_DAYS", &v)?;
        }
        if let Some(v) = lookup("MAX_FEEDBACK_COMMENT_LEN") {
            self.max_feedback_comment_len = parse_var("MAX_FEEDBACK_COMMENT_LEN", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check ranges.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the first offending key.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| {
            Err(ValidationError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.freshness_window_secs <= 0 {
            return invalid("freshness_window_secs must be positive");
        }
        if self.freshness_window_secs > MAX_WINDOW_DAYS * 86_400 {
            return invalid("freshness_window_secs exceeds ten years");
        }
        if self.model_version_label.trim().is_empty() {
            return invalid("model_version_label must not be empty");
        }
        if self.finance_window_days <= 0 {
            return invalid("finance_window_days must be positive");
        }
        if self.finance_window_days > MAX_WINDOW_DAYS {
            return invalid("finance_window_days exceeds ten years");
        }
        if self.resolved_suppression_days < 0 {
            return invalid("resolved_suppression_days must not be negative");
        }
        if self.resolved_suppression_days > MAX_WINDOW_DAYS {
            return invalid("resolved_suppression_days exceeds ten years");
        }
        if self.max_feedback_comment_len == 0 {
            return invalid("max_feedback_comment_len must be positive");
        }
        Ok(())
    }

    /// Window getters saturate on an unvalidated config.
    #[must_use]
    pub fn freshness_window(&self) -> Duration {
        Duration::try_seconds(self.freshness_window_secs).unwrap_or(Duration::MAX)
    }

    #[must_use]
    pub fn finance_window(&self) -> Duration {
        Duration::try_days(self.finance_window_days).unwrap_or(Duration::MAX)
    }

    #[must_use]
    pub fn suppression_window(&self) -> Duration {
        Duration::try_days(self.resolved_suppression_days).unwrap_or(Duration::MAX)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ValidationError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ValidationError::InvalidConfig {
            reason: format!("{ENV_PREFIX}{key}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DseConfig::default();
        config.validate().unwrap();
        assert_eq!(config.freshness_window(), Duration::hours(1));
        assert_eq!(config.model_version_label, "dse-rules");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = DseConfig::from_json_str(r#"{"freshness_window_secs": 600}"#).unwrap();
        assert_eq!(config.freshness_window_secs, 600);
        assert_eq!(config.finance_window_days, 90);
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"resolved_suppression_days": 0}}"#).unwrap();
        let config = DseConfig::from_path(file.path()).unwrap();
        assert_eq!(config.suppression_window(), Duration::zero());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = DseConfig::from_json_str(r#"{"freshness_window_secs": 0}"#).unwrap_err();
        assert!(format!("{err}").contains("freshness_window_secs"));
        assert!(DseConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_oversized_windows_rejected() {
        let huge = i64::MAX.to_string();
        for key in [
            "FINANCE_WINDOW_DAYS",
            "RESOLVED_SUPPRESSION_DAYS",
            "FRESHNESS_WINDOW_SECS",
        ] {
            let err = DseConfig::default()
                .with_overrides(|k| (k == key).then(|| huge.clone()))
                .unwrap_err();
            assert!(
                format!("{err}").contains(&key.to_lowercase()),
                "{key}: {err}"
            );
        }
        let at_limit = DseConfig::default()
            .with_overrides(|k| (k == "FINANCE_WINDOW_DAYS").then(|| MAX_WINDOW_DAYS.to_string()))
            .unwrap();
        assert_eq!(at_limit.finance_window(), Duration::days(MAX_WINDOW_DAYS));

        let unchecked = DseConfig {
            finance_window_days: i64::MAX,
            ..DseConfig::default()
        };
        assert_eq!(unchecked.finance_window(), Duration::MAX);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FINANCE_WINDOW_DAYS", "30"),
            ("MODEL_VERSION_LABEL", "pilot"),
        ]
        .into_iter()
        .collect();
        let config = DseConfig::default()
            .with_overrides(|k| vars.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.finance_window_days, 30);
        assert_eq!(config.model_version_label, "pilot");

        let err = DseConfig::default()
            .with_overrides(|k| (k == "FINANCE_WINDOW_DAYS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(format!("{err}").contains("FARMDSE_FINANCE_WINDOW_DAYS"));
    }
}
