//! Confidence values and their three fixed interpretation bands.
//!
//! Confidence here is a rule-authored heuristic, not a calibrated probability.
//! The type guarantees the value lies in `[0.0, 1.0]`; anything computed out
//! of range is clamped at construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Interpretation band for a confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceBand {
    /// `>= 0.8`
    High,
    /// `>= 0.5`
    Medium,
    /// Everything below 0.5.
    Low,
}

impl ConfidenceBand {
    /// Uppercase label stored on recommendation cards.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    /// Fixed sentence explaining what the band means to a farmer.
    #[must_use]
    pub const fn explanation(self) -> &'static str {
        match self {
            Self::High => {
                "High confidence: the conditions behind this advice are clearly met by your current farm data."
            }
            Self::Medium => {
                "Medium confidence: the conditions are met, but the advice depends on estimates or incomplete data."
            }
            Self::Low => {
                "Low confidence: treat this as a prompt to check your fields before acting."
            }
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A confidence value in `[0.0, 1.0]`.
///
/// # Examples
///
/// ```
/// use farmdse::{Confidence, ConfidenceBand};
///
/// let conf = Confidence::new(0.85).unwrap();
/// assert_eq!(conf.band(), ConfidenceBand::High);
///
/// // Computed values are clamped rather than rejected.
/// assert_eq!(Confidence::clamped(1.7).value(), 1.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    /// Minimum valid confidence value.
    pub const MIN_VALUE: f64 = 0.0;

    /// Maximum valid confidence value.
    pub const MAX_VALUE: f64 = 1.0;

    /// Lower bound of the high band.
    pub const HIGH_THRESHOLD: f64 = 0.8;

    /// Lower bound of the medium band.
    pub const MEDIUM_THRESHOLD: f64 = 0.5;

    /// Creates a new confidence with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if the value is NaN or
    /// not in [0.0, 1.0].
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if value.is_nan() || !(Self::MIN_VALUE..=Self::MAX_VALUE).contains(&value) {
            return Err(ValidationError::ConfidenceOutOfRange { value });
        }
        Ok(Self(value))
    }

    /// Clamps a computed value into range. NaN becomes zero.
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            return Self(Self::MIN_VALUE);
        }
        Self(value.clamp(Self::MIN_VALUE, Self::MAX_VALUE))
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    pub const fn value(self) -> f64 {
        self.0
    }

    /// The band this value falls in.
    #[must_use]
    pub fn band(self) -> ConfidenceBand {
        if self.0 >= Self::HIGH_THRESHOLD {
            ConfidenceBand::High
        } else if self.0 >= Self::MEDIUM_THRESHOLD {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }

    pub fn is_high(self) -> bool {
        self.band() == ConfidenceBand::High
    }

    pub fn is_medium(self) -> bool {
        self.band() == ConfidenceBand::Medium
    }

    pub fn is_low(self) -> bool {
        self.band() == ConfidenceBand::Low
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::zero()
    }
}

impl TryFrom<f64> for Confidence {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} ({})", self.0, self.band())
    }
}
