//! Attribute schema and synthetic user generation.
//!
//! The schema is a named, ordered list of value pools. Each call to
//! UserGenerator::generate() draws one fresh UUID key and samples every
//! attribute independently and uniformly from its pool.
//!
//! RULE: A schema is validated once at startup. A bad pool is a
//! configuration error, never a per-record runtime error.

use crate::{
    error::{SimError, SimResult},
    rng::StreamRng,
    user::{AttributeValue, UserRecord},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributePool {
    /// Uniform choice over categorical values.
    Choice(Vec<String>),
    /// Uniform choice over fixed numeric values (e.g. a price list).
    NumericChoice(Vec<f64>),
    /// Uniform integer in [min, max].
    IntRange { min: i64, max: i64 },
    /// Uniform float in [min, max), rounded to cents.
    FloatRange { min: f64, max: f64 },
}

impl AttributePool {
    fn sample(&self, rng: &mut StreamRng) -> AttributeValue {
        match self {
            Self::Choice(values) => {
                let idx = rng.next_u64_below(values.len() as u64) as usize;
                AttributeValue::Text(values[idx].clone())
            }
            Self::NumericChoice(values) => {
                let idx = rng.next_u64_below(values.len() as u64) as usize;
                AttributeValue::Number(values[idx])
            }
            Self::IntRange { min, max } => AttributeValue::Integer(rng.range_i64(*min, *max)),
            Self::FloatRange { min, max } => {
                let raw = rng.range_f64(*min, *max);
                AttributeValue::Number((raw * 100.0).round() / 100.0)
            }
        }
    }

    fn is_numeric(&self) -> bool {
        !matches!(self, Self::Choice(_))
    }

    fn check(&self, name: &str) -> SimResult<()> {
        let invalid = |reason: String| SimError::InvalidSchema { reason };
        match self {
            Self::Choice(values) if values.is_empty() => {
                Err(invalid(format!("attribute '{name}' has an empty choice pool")))
            }
            Self::NumericChoice(values) if values.is_empty() => {
                Err(invalid(format!("attribute '{name}' has an empty numeric pool")))
            }
            Self::NumericChoice(values) if values.iter().any(|v| !v.is_finite()) => {
                Err(invalid(format!("attribute '{name}' has a non-finite value")))
            }
            Self::IntRange { min, max } if min > max => {
                Err(invalid(format!("attribute '{name}' range {min}..={max} is inverted")))
            }
            Self::FloatRange { min, max } if !(min.is_finite() && max.is_finite() && min < max) => {
                Err(invalid(format!("attribute '{name}' range {min}..{max} is invalid")))
            }
            _ => Ok(()),
        }
    }
}

fn choice(values: &[&str]) -> AttributePool {
    AttributePool::Choice(values.iter().map(|v| v.to_string()).collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub pool: AttributePool,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, pool: AttributePool) -> Self {
        Self { name: name.into(), pool }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub attributes: Vec<AttributeSpec>,
    /// Numeric attribute whose value rides along on the metric event.
    #[serde(default)]
    pub metric_attribute: Option<String>,
}

impl AttributeSchema {
    /// Retail profile: brand, price, product and loyalty tier.
    pub fn commerce() -> Self {
        Self {
            attributes: vec![
                AttributeSpec::new(
                    "brand",
                    choice(&["Admiral", "Diamond", "Elephant", "Toothbrush", "Biscuit"]),
                ),
                AttributeSpec::new(
                    "price",
                    AttributePool::NumericChoice(vec![
                        93.84, 143.73, 101.35, 86.02, 46.91, 125.62, 77.85, 99.68, 73.99, 148.79,
                    ]),
                ),
                AttributeSpec::new("product", choice(&["Car", "Home", "Motorcycle", "Renters"])),
                AttributeSpec::new("tier", choice(&["Bronze", "Silver", "Gold", "Platinum"])),
            ],
            metric_attribute: Some("price".into()),
        }
    }

    /// Demographic profile: age, country, plan and device.
    pub fn demographic() -> Self {
        Self {
            attributes: vec![
                AttributeSpec::new("age", AttributePool::IntRange { min: 18, max: 80 }),
                AttributeSpec::new("country", choice(&["US", "GB", "DE", "FR", "JP", "BR", "IN"])),
                AttributeSpec::new("plan", choice(&["Free", "Starter", "Pro", "Enterprise"])),
                AttributeSpec::new("device", choice(&["iOS", "Android", "Desktop", "Web"])),
            ],
            metric_attribute: None,
        }
    }

    /// Look up a built-in profile by name.
    pub fn profile(name: &str) -> SimResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "commerce" => Ok(Self::commerce()),
            "demographic" => Ok(Self::demographic()),
            other => Err(SimError::InvalidSchema {
                reason: format!("unknown profile '{other}' (expected commerce or demographic)"),
            }),
        }
    }

    /// Load a schema from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let schema: Self = serde_json::from_str(&content)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn find(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.attributes.is_empty() {
            return Err(SimError::InvalidSchema {
                reason: "schema defines no attributes".into(),
            });
        }
        for (i, spec) in self.attributes.iter().enumerate() {
            if spec.name.trim().is_empty() {
                return Err(SimError::InvalidSchema {
                    reason: format!("attribute #{i} has an empty name"),
                });
            }
            let duplicate = self.attributes[..i]
                .iter()
                .any(|prev| prev.name.eq_ignore_ascii_case(&spec.name));
            if duplicate {
                return Err(SimError::InvalidSchema {
                    reason: format!("attribute '{}' is defined twice", spec.name),
                });
            }
            spec.pool.check(&spec.name)?;
        }
        if let Some(metric) = &self.metric_attribute {
            match self.find(metric) {
                Some(spec) if spec.pool.is_numeric() => {}
                Some(_) => {
                    return Err(SimError::InvalidSchema {
                        reason: format!("metric attribute '{metric}' is not numeric"),
                    })
                }
                None => {
                    return Err(SimError::InvalidSchema {
                        reason: format!("metric attribute '{metric}' is not in the schema"),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Produces one synthetic UserRecord per call.
pub struct UserGenerator {
    schema: AttributeSchema,
    rng: StreamRng,
}

impl UserGenerator {
    /// Validates the schema up front so generate() cannot fail.
    pub fn new(schema: AttributeSchema, rng: StreamRng) -> SimResult<Self> {
        schema.validate()?;
        Ok(Self { schema, rng })
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    pub fn generate(&mut self) -> UserRecord {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        let key = uuid::Builder::from_random_bytes(bytes).into_uuid();

        let rng = &mut self.rng;
        self.schema
            .attributes
            .iter()
            .fold(UserRecord::new(key.to_string()), |user, spec| {
                user.with(spec.name.clone(), spec.pool.sample(rng))
            })
    }
}
