use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SDK credential is missing")]
    MissingCredential,

    #[error("Both target-attribute and target-value must be provided together")]
    IncompleteTargeting,

    #[error("Invalid probability '{name}': {value}")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("Invalid attribute schema: {reason}")]
    InvalidSchema { reason: String },

    #[error("Invalid flag definition '{flag_key}': {reason}")]
    InvalidFlagDefinition { flag_key: String, reason: String },

    #[error("Flag oracle is not ready")]
    OracleNotReady,

    #[error("Flag evaluation failed for '{flag_key}': {reason}")]
    Evaluation { flag_key: String, reason: String },

    #[error("Tracking event '{event}' failed: {reason}")]
    Tracking { event: String, reason: String },

    #[error("Logging already initialized")]
    LoggingInitialized,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SimResult<T> = Result<T, SimError>;
