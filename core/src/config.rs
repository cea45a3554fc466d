use crate::{
    error::{SimError, SimResult},
    flag::FlagValue,
    policy::{clamp_probability, TargetingRule},
    types::FlagKey,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_FLAG_KEY: &str = "show-sponsored-product";
pub const DEFAULT_NUM_RECORDS: u64 = 100;
pub const DEFAULT_CONTROL_PROB: f64 = 0.3;
pub const DEFAULT_TREATMENT_PROB: f64 = 0.35;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(50);
pub const PROGRESS_INTERVAL: u64 = 100;

/// Process-wide run configuration. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub flag_key: FlagKey,
    pub num_records: u64,
    pub control_prob: f64,
    pub treatment_prob: f64,
    pub delay: Duration,
    pub tracking_enabled: bool,
    /// Overrides the `flag-{flag_key}-evaluation` metric event name.
    pub metric_name: Option<String>,
    /// Numeric user attribute sent as the metric event's value.
    pub metric_attribute: Option<String>,
    /// Conversion events fired alongside the metric event, without a value.
    pub extra_events: Vec<String>,
    pub targeting: Option<TargetingRule>,
    /// Served by the oracle when its own evaluation fails.
    pub default_value: FlagValue,
    pub progress_interval: u64,
    pub seed: Option<u64>,
}

impl SimulationConfig {
    pub fn new(flag_key: impl Into<FlagKey>) -> Self {
        Self {
            flag_key: flag_key.into(),
            num_records: DEFAULT_NUM_RECORDS,
            control_prob: DEFAULT_CONTROL_PROB,
            treatment_prob: DEFAULT_TREATMENT_PROB,
            delay: DEFAULT_DELAY,
            tracking_enabled: true,
            metric_name: None,
            metric_attribute: None,
            extra_events: Vec::new(),
            targeting: None,
            default_value: FlagValue::Bool(false),
            progress_interval: PROGRESS_INTERVAL,
            seed: None,
        }
    }

    /// Config with no delay for use in tests.
    pub fn default_test() -> Self {
        Self {
            delay: Duration::ZERO,
            seed: Some(42),
            ..Self::new(DEFAULT_FLAG_KEY)
        }
    }

    pub fn with_probabilities(mut self, control: f64, treatment: f64) -> Self {
        self.control_prob = clamp_probability(control);
        self.treatment_prob = clamp_probability(treatment);
        self
    }

    pub fn with_targeting(mut self, rule: Option<TargetingRule>) -> Self {
        self.targeting = rule;
        self
    }

    /// Name of the primary tracking event.
    pub fn metric_event_name(&self) -> String {
        self.metric_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("flag-{}-evaluation", self.flag_key))
    }

    /// Reject non-finite probabilities, then clamp the rest into [0, 1].
    pub fn validated(mut self) -> SimResult<Self> {
        for (name, value) in [
            ("control_prob", self.control_prob),
            ("treatment_prob", self.treatment_prob),
        ] {
            if !value.is_finite() {
                return Err(SimError::InvalidProbability { name, value });
            }
        }
        if self.flag_key.trim().is_empty() {
            return Err(anyhow::anyhow!("flag key must not be empty").into());
        }
        self.control_prob = clamp_probability(self.control_prob);
        self.treatment_prob = clamp_probability(self.treatment_prob);
        if self.progress_interval == 0 {
            self.progress_interval = PROGRESS_INTERVAL;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metric_name_embeds_flag_key() {
        let cfg = SimulationConfig::new("new-checkout");
        assert_eq!(cfg.metric_event_name(), "flag-new-checkout-evaluation");

        let cfg = SimulationConfig {
            metric_name: Some("purchase".into()),
            ..cfg
        };
        assert_eq!(cfg.metric_event_name(), "purchase");
    }

    #[test]
    fn validated_clamps_probabilities() {
        let cfg = SimulationConfig {
            control_prob: -1.0,
            treatment_prob: 3.0,
            ..SimulationConfig::default_test()
        }
        .validated()
        .unwrap();
        assert_eq!(cfg.control_prob, 0.0);
        assert_eq!(cfg.treatment_prob, 1.0);
    }

    #[test]
    fn validated_rejects_nan() {
        let cfg = SimulationConfig {
            control_prob: f64::NAN,
            ..SimulationConfig::default_test()
        };
        assert!(matches!(
            cfg.validated(),
            Err(SimError::InvalidProbability { name: "control_prob", .. })
        ));
    }
}
