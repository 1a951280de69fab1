//! Framework-level error taxonomy for Vigil.
//!
//! These errors describe contract violations and setup faults. Runtime
//! failures of workers and agents are never errors; they travel as failure
//! [`ResultEnvelope`](crate::domain::ResultEnvelope)s.

/// Vigil framework errors.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VigilError {
    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Result type for Vigil framework operations.
pub type Result<T> = std::result::Result<T, VigilError>;
