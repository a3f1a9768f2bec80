//! The rule catalog: an immutable, versioned registry of rules.
//!
//! A catalog is constructed once (from the authored defaults or a JSON file),
//! wrapped in an `Arc` and handed to the engine and the explainer. It is never
//! mutated afterwards; producing a different catalog means building a new one.

mod builtin;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ValidationError;
use crate::rule::Rule;

pub use builtin::default_rules;

/// Immutable rule registry.
///
/// Holds every version of every rule. Evaluation uses only the latest version
/// per code; explanation looks rules up by code.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleCatalog {
    /// code → version → rule
    rules: BTreeMap<String, BTreeMap<u32, Rule>>,
    fingerprint: String,
}

/// On-disk catalog shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    rules: Vec<Rule>,
}

impl RuleCatalog {
    /// Build a catalog, validating every rule.
    ///
    /// # Errors
    ///
    /// - `InvalidRule` for a structurally invalid rule.
    /// - `DuplicateRule` when two rules share `(code, version)`.
    pub fn new(rules: Vec<Rule>) -> Result<Self, ValidationError> {
        let mut by_code: BTreeMap<String, BTreeMap<u32, Rule>> = BTreeMap::new();
        for rule in rules {
            rule.validate()?;
            let versions = by_code.entry(rule.code.clone()).or_default();
            if versions.contains_key(&rule.version) {
                return Err(ValidationError::DuplicateRule {
                    code: rule.code,
                    version: rule.version,
                });
            }
            versions.insert(rule.version, rule);
        }

        let catalog = Self::assemble(by_code);
        let known: HashSet<&str> = catalog.rules.keys().map(String::as_str).collect();
        for rule in catalog.active_rules() {
            for target in &rule.supersedes {
                if !known.contains(target.as_str()) {
                    warn!(rule = %rule.code, supersedes = %target, "supersedes an unknown rule code");
                }
            }
        }
        Ok(catalog)
    }

    fn assemble(rules: BTreeMap<String, BTreeMap<u32, Rule>>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for versions in rules.values() {
            for rule in versions.values() {
                if let Ok(bytes) = serde_json::to_vec(rule) {
                    hasher.update(&bytes);
                }
            }
        }
        let hex = hasher.finalize().to_hex();
        Self {
            rules,
            fingerprint: hex.as_str()[..12].to_string(),
        }
    }

    /// The authored default farm rules.
    ///
    /// # Errors
    ///
    /// Only if an authored default rule fails validation.
    pub fn builtin() -> Result<Self, ValidationError> {
        Self::new(default_rules()?)
    }

    /// An empty catalog.
    #[must_use]
    pub fn empty() -> Self {
        Self::assemble(BTreeMap::new())
    }

    /// Parse a catalog from JSON of the shape `{"rules": [...]}`.
    ///
    /// # Errors
    ///
    /// `InvalidField("catalog")` on malformed JSON, otherwise as [`Self::new`].
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| ValidationError::InvalidField {
                field: "catalog".to_string(),
                reason: e.to_string(),
            })?;
        Self::new(file.rules)
    }

    /// Read a catalog file.
    ///
    /// # Errors
    ///
    /// `InvalidField("catalog")` if the file cannot be read, otherwise as
    /// [`Self::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidField {
            field: "catalog".to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }

    /// Serialize every rule version to the file shape.
    ///
    /// # Errors
    ///
    /// Returns the serializer error message.
    pub fn to_json_string(&self) -> Result<String, String> {
        let file = CatalogFile {
            rules: self.all_versions().cloned().collect(),
        };
        serde_json::to_string_pretty(&file).map_err(|e| e.to_string())
    }

    /// A copy of this catalog with every version of `code` removed.
    #[must_use]
    pub fn without(&self, code: &str) -> Self {
        let mut rules = self.rules.clone();
        rules.remove(code);
        Self::assemble(rules)
    }

    /// Latest version of each rule, ordered by code.
    pub fn active_rules(&self) -> impl Iterator<Item = &Rule> + '_ {
        self.rules
            .values()
            .filter_map(|versions| versions.values().next_back())
    }

    /// Every stored version, ordered by code then version.
    pub fn all_versions(&self) -> impl Iterator<Item = &Rule> + '_ {
        self.rules.values().flat_map(BTreeMap::values)
    }

    /// Latest version of a rule.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&Rule> {
        self.rules.get(code)?.values().next_back()
    }

    #[must_use]
    pub fn get_version(&self, code: &str, version: u32) -> Option<&Rule> {
        self.rules.get(code)?.get(&version)
    }

    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.rules.contains_key(code)
    }

    /// Number of distinct rule codes.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Short content hash over every rule version.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionGroup, Operator};
    use crate::rule::{RuleCategory, RuleScope};

    fn rule(code: &str, version: u32) -> Rule {
        Rule::builder(code, "name")
            .category(RuleCategory::Crop)
            .scope(RuleScope::EachCrop)
            .version(version)
            .condition(ConditionGroup::check("crop.id", Operator::Exists))
            .title("t")
            .reason("r")
            .build()
            .unwrap()
    }

    #[test]
    fn test_latest_version_is_active() {
        let catalog = RuleCatalog::new(vec![rule("A", 1), rule("A", 3), rule("B", 1)]).unwrap();
        let active: Vec<(&str, u32)> = catalog
            .active_rules()
            .map(|r| (r.code.as_str(), r.version))
            .collect();
        assert_eq!(active, vec![("A", 3), ("B", 1)]);
        assert_eq!(catalog.get("A").unwrap().version, 3);
        assert!(catalog.get_version("A", 1).is_some());
        assert_eq!(catalog.all_versions().count(), 3);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let err = RuleCatalog::new(vec![rule("A", 1), rule("A", 1)]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateRule {
                code: "A".to_string(),
                version: 1
            }
        );
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = RuleCatalog::new(vec![rule("A", 1)]).unwrap();
        let b = RuleCatalog::new(vec![rule("A", 1)]).unwrap();
        let c = RuleCatalog::new(vec![rule("A", 2)]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 12);
    }

    #[test]
    fn test_without_removes_all_versions() {
        let catalog = RuleCatalog::new(vec![rule("A", 1), rule("A", 2), rule("B", 1)]).unwrap();
        let trimmed = catalog.without("A");
        assert!(!trimmed.contains("A"));
        assert_eq!(trimmed.len(), 1);
        assert!(catalog.contains("A"));
    }

    #[test]
    fn test_json_roundtrip_and_errors() {
        let catalog = RuleCatalog::new(vec![rule("A", 1)]).unwrap();
        let json = catalog.to_json_string().unwrap();
        let back = RuleCatalog::from_json_str(&json).unwrap();
        assert_eq!(back, catalog);
        assert!(RuleCatalog::from_json_str("{\"rules\": 3}").is_err());
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = RuleCatalog::builtin().unwrap();
        assert!(catalog.len() >= 12);
        for rule in catalog.active_rules() {
            for target in &rule.supersedes {
                assert!(catalog.contains(target), "{} supersedes {target}", rule.code);
            }
        }
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let catalog = RuleCatalog::new(vec![rule("A", 1)]).unwrap();
        std::fs::write(&path, catalog.to_json_string().unwrap()).unwrap();
        assert_eq!(RuleCatalog::from_path(&path).unwrap(), catalog);
        assert!(RuleCatalog::from_path(dir.path().join("missing.json")).is_err());
    }
}
