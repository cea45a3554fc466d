//! Shared primitive types used across the simulator.

/// Zero-based position of a record within a run.
pub type RecordIndex = u64;

/// Opaque, unique identifier of a simulated user.
pub type UserKey = String;

/// Key of the flag under evaluation.
pub type FlagKey = String;
