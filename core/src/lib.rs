//! flagsim-core: synthetic experiment traffic against a feature flag.
//!
//! A run generates users from an attribute schema, evaluates a flag for
//! each, blends the flag's arm with an optional targeting boost into a
//! tracking probability, and fires tracking events on a Bernoulli draw.

pub mod attributes;
pub mod config;
pub mod error;
pub mod events;
pub mod flag;
pub mod logging;
pub mod oracle;
pub mod policy;
pub mod rng;
pub mod simulation;
pub mod types;
pub mod user;
