//! Flag decisions and the oracle contract.
//!
//! The simulation loop only ever talks to a `dyn FlagOracle`. Production
//! runs use the in-process RolloutOracle; tests script their own.

use crate::{error::SimResult, user::UserRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Variant(String),
}

impl FlagValue {
    /// Whether this value assigns the user to the treatment arm.
    /// Variant names that spell "off" are treated as control.
    pub fn is_treatment(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Variant(s) => {
                let s = s.trim();
                !(s.is_empty()
                    || s.eq_ignore_ascii_case("false")
                    || s.eq_ignore_ascii_case("off")
                    || s.eq_ignore_ascii_case("control"))
            }
        }
    }
}

impl Default for FlagValue {
    fn default() -> Self {
        Self::Bool(false)
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Variant(s) => f.write_str(s),
        }
    }
}

impl std::str::FromStr for FlagValue {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            t if t.eq_ignore_ascii_case("true") => Self::Bool(true),
            t if t.eq_ignore_ascii_case("false") => Self::Bool(false),
            t => Self::Variant(t.to_string()),
        })
    }
}

/// Why the oracle produced the value it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationReason {
    Off,
    TargetMatch,
    RuleMatch { rule_index: usize },
    Fallthrough,
    FlagNotFound,
    Error { error: String },
}

impl fmt::Display for EvaluationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("OFF"),
            Self::TargetMatch => f.write_str("TARGET_MATCH"),
            Self::RuleMatch { rule_index } => write!(f, "RULE_MATCH#{rule_index}"),
            Self::Fallthrough => f.write_str("FALLTHROUGH"),
            Self::FlagNotFound => f.write_str("FLAG_NOT_FOUND"),
            Self::Error { error } => write!(f, "ERROR({error})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDecision {
    pub value: FlagValue,
    pub variation_index: Option<usize>,
    pub reason: EvaluationReason,
}

impl FlagDecision {
    /// A decision that fell back to the caller's default.
    pub fn fallback(default: &FlagValue, reason: EvaluationReason) -> Self {
        Self {
            value: default.clone(),
            variation_index: None,
            reason,
        }
    }

    pub fn is_treatment(&self) -> bool {
        self.value.is_treatment()
    }
}

/// The contract every flag evaluation backend must fulfill.
pub trait FlagOracle {
    /// True once the backend can serve evaluations.
    fn is_ready(&self) -> bool;

    /// Evaluate `flag_key` for `user`.
    ///
    /// Backends should resolve their own failures to `default` with an
    /// `EvaluationReason::Error`. An `Err` is still tolerated by the loop
    /// and isolated to the current record.
    fn evaluate(
        &mut self,
        flag_key: &str,
        user: &UserRecord,
        default: &FlagValue,
    ) -> SimResult<FlagDecision>;

    /// Release any held resources. Called once after the run.
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_truthiness() {
        assert!(FlagValue::Variant("treatment".into()).is_treatment());
        assert!(FlagValue::Variant("blue-button".into()).is_treatment());
        assert!(!FlagValue::Variant("control".into()).is_treatment());
        assert!(!FlagValue::Variant(" False ".into()).is_treatment());
        assert!(!FlagValue::Variant(String::new()).is_treatment());
    }

    #[test]
    fn parses_bool_and_variant_defaults() {
        assert_eq!("false".parse::<FlagValue>().unwrap(), FlagValue::Bool(false));
        assert_eq!("TRUE".parse::<FlagValue>().unwrap(), FlagValue::Bool(true));
        assert_eq!(
            "control".parse::<FlagValue>().unwrap(),
            FlagValue::Variant("control".into())
        );
    }
}
