//! Error types for the decision support engine.
//!
//! All errors are strongly typed using thiserror. Validation and not-found
//! errors propagate to the caller; per-rule evaluation errors and fact source
//! failures are absorbed where they occur and only show up in logs and reports.

use thiserror::Error;

use crate::context::FactSourceKind;
use crate::storage::StorageError;

/// Validation errors raised before any evaluation runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f64,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' is invalid: {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Rating {rating} is out of range [1, 5]")]
    RatingOutOfRange {
        rating: u8,
    },

    #[error("Invalid rule '{code}': {reason}")]
    InvalidRule {
        code: String,
        reason: String,
    },

    #[error("Duplicate rule '{code}' version {version}")]
    DuplicateRule {
        code: String,
        version: u32,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

impl ValidationError {
    /// Returns the offending field name, when the error is field-scoped.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField { field }
            | Self::InvalidField { field, .. }
            | Self::FieldTooLong { field, .. } => Some(field),
            Self::RatingOutOfRange { .. } => Some("rating"),
            Self::ConfidenceOutOfRange { .. } => Some("confidence"),
            _ => None,
        }
    }
}

/// Failure of a single rule while instantiating its templates.
///
/// These never abort an evaluation pass: the engine logs them, records them in
/// the report and moves on to the next rule.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("field '{path}' is not available")]
    MissingField {
        path: String,
    },

    #[error("field '{path}' has type {actual}, expected {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("computed confidence {value} is not a finite number")]
    InvalidConfidence {
        value: f64,
    },

    #[error("computed impact magnitude {value} is not a finite number")]
    InvalidImpact {
        value: f64,
    },

    #[error("validity window of {window} is out of range")]
    ValidityOutOfRange {
        window: String,
    },
}

/// Failure of a fact sub-source while building a context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("{kind} source unavailable: {message}")]
    Unavailable {
        kind: FactSourceKind,
        message: String,
    },

    #[error("{kind} source returned malformed data: {message}")]
    Malformed {
        kind: FactSourceKind,
        message: String,
    },
}

impl SourceError {
    /// The sub-source that failed.
    #[must_use]
    pub const fn source_kind(&self) -> FactSourceKind {
        match self {
            Self::Unavailable { kind, .. } | Self::Malformed { kind, .. } => *kind,
        }
    }
}

/// Top-level error type returned across the service boundary.
#[derive(Debug, Error)]
pub enum DseError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Caller is not authenticated")]
    Unauthenticated,

    /// Absent and not-owned resources are reported identically.
    #[error("{resource} not found: {id}")]
    NotFound {
        resource: &'static str,
        id: String,
    },

    #[error("Concurrent refresh for user {user_id} could not commit")]
    LifecycleConflict {
        user_id: String,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] SourceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl DseError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this error is transient and the request may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::LifecycleConflict { .. } | Self::UpstreamUnavailable(_) => true,
            Self::Storage(e) => matches!(e, StorageError::GenerationConflict { .. }),
            Self::Validation(_)
            | Self::Unauthenticated
            | Self::NotFound { .. }
            | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for engine operations.
pub type DseResult<T> = Result<T, DseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_confidence() {
        let err = ValidationError::ConfidenceOutOfRange { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("out of range"));
        assert_eq!(err.field(), Some("confidence"));
    }

    #[test]
    fn test_validation_error_field_detail() {
        let err = ValidationError::FieldTooLong {
            field: "comment".to_string(),
            max_length: 2000,
        };
        assert_eq!(err.field(), Some("comment"));
        assert!(format!("{err}").contains("2000"));

        let err = ValidationError::DuplicateRule {
            code: "R1".to_string(),
            version: 2,
        };
        assert_eq!(err.field(), None);
    }

    #[test]
    fn test_not_found_does_not_leak_ownership() {
        let err = DseError::not_found("recommendation", "abc");
        assert!(err.is_not_found());
        assert_eq!(format!("{err}"), "recommendation not found: abc");
    }

    #[test]
    fn test_source_error_kind() {
        let err = SourceError::Unavailable {
            kind: FactSourceKind::Weather,
            message: "timeout".to_string(),
        };
        assert_eq!(err.source_kind(), FactSourceKind::Weather);
        assert!(format!("{err}").contains("timeout"));
    }

    #[test]
    fn test_dse_error_retryable() {
        let err1: DseError = ValidationError::MissingField {
            field: "x".to_string(),
        }
        .into();
        assert!(err1.is_validation());
        assert!(!err1.is_retryable());

        let err2 = DseError::LifecycleConflict {
            user_id: "u".to_string(),
        };
        assert!(err2.is_retryable());

        assert!(!DseError::Unauthenticated.is_retryable());
        assert!(!DseError::internal("boom").is_retryable());
    }
}
