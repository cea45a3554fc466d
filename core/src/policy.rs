//! Tracking probability policy.
//!
//! The probability that a simulated user fires a tracking event is the
//! base rate of the arm the flag assigned them to, optionally boosted when
//! the user matches the run's targeting rule.
//!
//! RULE: Every probability leaving this module is in [0, 1].

use crate::{
    error::{SimError, SimResult},
    user::{AttributeValue, UserRecord},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BOOST_FACTOR: f64 = 1.5;

/// Absolute tolerance for numeric target comparisons.
pub const NUMERIC_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
    pub attribute: String,
    pub target_value: String,
    pub boost_factor: f64,
}

impl TargetingRule {
    pub fn new(
        attribute: impl Into<String>,
        target_value: impl Into<String>,
        boost_factor: f64,
    ) -> SimResult<Self> {
        if !boost_factor.is_finite() || boost_factor < 0.0 {
            return Err(SimError::InvalidProbability {
                name: "boost_factor",
                value: boost_factor,
            });
        }
        Ok(Self {
            attribute: attribute.into(),
            target_value: target_value.into(),
            boost_factor,
        })
    }

    /// Build from an optional attribute/value pair. Supplying exactly one
    /// half of the pair is a configuration error. Only an empty string
    /// counts as absent; whitespace is a supplied value.
    pub fn from_parts(
        attribute: Option<&str>,
        target_value: Option<&str>,
        boost_factor: f64,
    ) -> SimResult<Option<Self>> {
        fn present(s: Option<&str>) -> Option<&str> {
            s.filter(|v| !v.is_empty())
        }
        match (present(attribute), present(target_value)) {
            (None, None) => Ok(None),
            (Some(attr), Some(value)) => Self::new(attr, value, boost_factor).map(Some),
            _ => Err(SimError::IncompleteTargeting),
        }
    }

    /// Whether `user` carries the targeted attribute value. A missing
    /// attribute is a non-match. Both sides are trimmed before comparing.
    pub fn matches(&self, user: &UserRecord) -> bool {
        match user.get(&self.attribute) {
            Some(AttributeValue::Text(actual)) => {
                actual.trim().to_lowercase() == self.target_value.trim().to_lowercase()
            }
            Some(numeric) => match (numeric.as_f64(), self.target_value.trim().parse::<f64>()) {
                (Some(actual), Ok(target)) => (actual - target).abs() < NUMERIC_TOLERANCE,
                _ => false,
            },
            None => false,
        }
    }
}

/// Effective tracking probability for one record.
pub fn tracking_probability(
    user: &UserRecord,
    is_treatment: bool,
    base_control: f64,
    base_treatment: f64,
    rule: Option<&TargetingRule>,
) -> f64 {
    let base = clamp_probability(if is_treatment { base_treatment } else { base_control });
    match rule {
        Some(rule) if rule.matches(user) => clamp_probability(base * rule.boost_factor),
        _ => base,
    }
}

/// Clamp into [0, 1]; NaN collapses to 0.
pub fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}
