//! In-process flag evaluation.
//!
//! RolloutOracle serves FlagDefinitions loaded from a JSON flag file (or a
//! built-in 50/50 boolean experiment) without any network round-trip.
//!
//! EVALUATION ORDER (first hit wins):
//!   1. Unknown flag           -> caller default, FLAG_NOT_FOUND
//!   2. Flag switched off      -> off variation, OFF
//!   3. Individual user target -> TARGET_MATCH
//!   4. First matching rule    -> RULE_MATCH
//!   5. Fallthrough            -> fixed variation or weighted rollout
//!
//! Rollout bucketing hashes "{flag}.{salt}.{user_key}" with SHA-1, so a
//! given user always lands in the same arm of a given flag.

use crate::{
    error::{SimError, SimResult},
    flag::{EvaluationReason, FlagDecision, FlagOracle, FlagValue},
    rng::StreamRng,
    user::{AttributeValue, UserRecord},
};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::Path;

/// Rollout weights are expressed in thousandths of a percent.
pub const ROLLOUT_TOTAL_WEIGHT: u32 = 100_000;

const BUCKET_SCALE: f64 = 0xFFF_FFFF_FFFF_FFFF_u64 as f64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualTarget {
    pub variation: usize,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub attribute: String,
    pub values: Vec<AttributeValue>,
    #[serde(default)]
    pub negate: bool,
}

impl Clause {
    fn matches(&self, user: &UserRecord) -> bool {
        let hit = if self.attribute.eq_ignore_ascii_case("key") {
            self.values
                .iter()
                .any(|v| v.as_text().is_some_and(|t| t == user.key()))
        } else {
            match user.get(&self.attribute) {
                Some(actual) => self.values.iter().any(|expected| values_equal(actual, expected)),
                // Missing attributes never match, even when negated.
                None => return false,
            }
        };
        hit != self.negate
    }
}

fn values_equal(actual: &AttributeValue, expected: &AttributeValue) -> bool {
    match (actual.as_text(), expected.as_text()) {
        (Some(a), Some(e)) => a.eq_ignore_ascii_case(e),
        (None, None) => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(e)) => a == e,
            _ => false,
        },
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRule {
    pub clauses: Vec<Clause>,
    pub variation: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedVariation {
    pub variation: usize,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallthrough {
    Variation(usize),
    Rollout(Vec<WeightedVariation>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDefinition {
    pub key: String,
    #[serde(default = "default_on")]
    pub on: bool,
    pub variations: Vec<FlagValue>,
    #[serde(default)]
    pub off_variation: usize,
    #[serde(default)]
    pub targets: Vec<IndividualTarget>,
    #[serde(default)]
    pub rules: Vec<FlagRule>,
    pub fallthrough: Fallthrough,
    #[serde(default)]
    pub salt: String,
}

fn default_on() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct FlagFile {
    flags: Vec<FlagDefinition>,
}

impl FlagDefinition {
    /// Boolean experiment: variation 0 is `false` (control), variation 1 is
    /// `true` (treatment), with `treatment_share` of users in treatment.
    pub fn experiment(flag_key: &str, treatment_share: f64) -> Self {
        let treatment = (treatment_share.clamp(0.0, 1.0) * ROLLOUT_TOTAL_WEIGHT as f64).round() as u32;
        Self {
            key: flag_key.to_string(),
            on: true,
            variations: vec![FlagValue::Bool(false), FlagValue::Bool(true)],
            off_variation: 0,
            targets: Vec::new(),
            rules: Vec::new(),
            fallthrough: Fallthrough::Rollout(vec![
                WeightedVariation { variation: 0, weight: ROLLOUT_TOTAL_WEIGHT - treatment },
                WeightedVariation { variation: 1, weight: treatment },
            ]),
            salt: flag_key.to_string(),
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        let invalid = |reason: String| SimError::InvalidFlagDefinition {
            flag_key: self.key.clone(),
            reason,
        };
        let n = self.variations.len();
        if n == 0 {
            return Err(invalid("no variations defined".into()));
        }
        let check = |idx: usize, what: &str| {
            if idx < n {
                Ok(())
            } else {
                Err(invalid(format!("{what} references variation {idx} of {n}")))
            }
        };
        check(self.off_variation, "off_variation")?;
        for target in &self.targets {
            check(target.variation, "target")?;
        }
        for (i, rule) in self.rules.iter().enumerate() {
            check(rule.variation, &format!("rule #{i}"))?;
        }
        match &self.fallthrough {
            Fallthrough::Variation(idx) => check(*idx, "fallthrough")?,
            Fallthrough::Rollout(buckets) => {
                for b in buckets {
                    check(b.variation, "rollout")?;
                }
                let total: u64 = buckets.iter().map(|b| b.weight as u64).sum();
                if total != ROLLOUT_TOTAL_WEIGHT as u64 {
                    return Err(invalid(format!(
                        "rollout weights sum to {total}, expected {ROLLOUT_TOTAL_WEIGHT}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Bucket in [0, 1) for this user on this flag.
    pub fn bucket(&self, user_key: &str) -> f64 {
        let mut hasher = Sha1::new();
        hasher.update(format!("{}.{}.{}", self.key, self.salt, user_key).as_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        // First 15 hex digits of the digest.
        let value = u64::from_be_bytes(head) >> 4;
        value as f64 / BUCKET_SCALE
    }

    fn decide(&self, user: &UserRecord) -> (usize, EvaluationReason) {
        if !self.on {
            return (self.off_variation, EvaluationReason::Off);
        }
        if let Some(target) = self
            .targets
            .iter()
            .find(|t| t.values.iter().any(|v| v == user.key()))
        {
            return (target.variation, EvaluationReason::TargetMatch);
        }
        if let Some((rule_index, rule)) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.clauses.iter().all(|c| c.matches(user)))
        {
            return (rule.variation, EvaluationReason::RuleMatch { rule_index });
        }
        match &self.fallthrough {
            Fallthrough::Variation(idx) => (*idx, EvaluationReason::Fallthrough),
            Fallthrough::Rollout(buckets) => {
                let bucket = self.bucket(user.key());
                let mut cumulative = 0.0;
                for b in buckets {
                    cumulative += b.weight as f64 / ROLLOUT_TOTAL_WEIGHT as f64;
                    if bucket < cumulative {
                        return (b.variation, EvaluationReason::Fallthrough);
                    }
                }
                // Rounding at the top edge lands in the last bucket.
                let last = buckets.last().map(|b| b.variation).unwrap_or(self.off_variation);
                (last, EvaluationReason::Fallthrough)
            }
        }
    }
}

/// Flag oracle backed by in-memory flag definitions.
pub struct RolloutOracle {
    sdk_key: String,
    flags: HashMap<String, FlagDefinition>,
    fault_rate: f64,
    fault_rng: Option<StreamRng>,
    closed: bool,
}

impl RolloutOracle {
    pub fn new(sdk_key: impl Into<String>, flags: Vec<FlagDefinition>) -> SimResult<Self> {
        let sdk_key = sdk_key.into();
        if sdk_key.trim().is_empty() {
            return Err(SimError::MissingCredential);
        }
        let mut by_key = HashMap::with_capacity(flags.len());
        for flag in flags {
            flag.validate()?;
            by_key.insert(flag.key.clone(), flag);
        }
        log::debug!("rollout oracle loaded {} flag(s)", by_key.len());
        Ok(Self {
            sdk_key,
            flags: by_key,
            fault_rate: 0.0,
            fault_rng: None,
            closed: false,
        })
    }

    /// Load definitions from a JSON file of the form `{"flags": [...]}`.
    pub fn load(sdk_key: impl Into<String>, path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let file: FlagFile = serde_json::from_str(&content)?;
        Self::new(sdk_key, file.flags)
    }

    /// Make a fraction of evaluations fail transiently. Failed evaluations
    /// resolve to the caller's default, like a timed-out remote call would.
    pub fn with_fault_injection(mut self, fault_rate: f64, rng: StreamRng) -> Self {
        self.fault_rate = fault_rate.clamp(0.0, 1.0);
        self.fault_rng = Some(rng);
        self
    }

    pub fn flag(&self, key: &str) -> Option<&FlagDefinition> {
        self.flags.get(key)
    }

    fn transient_failure(&mut self) -> bool {
        match self.fault_rng.as_mut() {
            Some(rng) if self.fault_rate > 0.0 => rng.chance(self.fault_rate),
            _ => false,
        }
    }
}

impl FlagOracle for RolloutOracle {
    fn is_ready(&self) -> bool {
        !self.closed && !self.sdk_key.trim().is_empty() && !self.flags.is_empty()
    }

    fn evaluate(
        &mut self,
        flag_key: &str,
        user: &UserRecord,
        default: &FlagValue,
    ) -> SimResult<FlagDecision> {
        if !self.is_ready() {
            return Ok(FlagDecision::fallback(
                default,
                EvaluationReason::Error { error: "client_not_ready".into() },
            ));
        }
        if self.transient_failure() {
            log::warn!("evaluation of '{flag_key}' timed out, serving default {default}");
            return Ok(FlagDecision::fallback(
                default,
                EvaluationReason::Error { error: "transient".into() },
            ));
        }
        let Some(flag) = self.flags.get(flag_key) else {
            return Ok(FlagDecision::fallback(default, EvaluationReason::FlagNotFound));
        };
        let (variation, reason) = flag.decide(user);
        let value = flag
            .variations
            .get(variation)
            .cloned()
            .ok_or_else(|| SimError::Evaluation {
                flag_key: flag_key.to_string(),
                reason: format!("variation {variation} out of range"),
            })?;
        Ok(FlagDecision {
            value,
            variation_index: Some(variation),
            reason,
        })
    }

    fn close(&mut self) {
        if !self.closed {
            log::debug!("rollout oracle closed");
            self.closed = true;
        }
    }
}
