//! Uniform result contract returned by every fallible operation.
//!
//! A [`ResultEnvelope`] is either a success carrying a payload and a quality
//! score, or a failure carrying an [`ErrorKind`]. Fields are private and every
//! constructor (including deserialization) enforces that `success` holds
//! exactly when no error kind is present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::{Result, VigilError};
use crate::domain::kind::ErrorKind;

/// Named results produced by a successful operation.
pub type Payload = Map<String, Value>;

/// Unvalidated envelope fields, used for construction and the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeParts {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub quality_score: f64,
    pub execution_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

fn default_attempts() -> u32 {
    1
}

/// Validated success/failure record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EnvelopeParts", into = "EnvelopeParts")]
pub struct ResultEnvelope {
    success: bool,
    data: Option<Payload>,
    error_kind: Option<ErrorKind>,
    error_message: Option<String>,
    quality_score: f64,
    execution_time_ms: f64,
    timestamp: DateTime<Utc>,
    source: String,
    attempts: u32,
}

impl ResultEnvelope {
    /// Build a success envelope stamped with the current time.
    pub fn success(
        source: impl Into<String>,
        data: Payload,
        quality_score: f64,
        execution_time_ms: f64,
    ) -> Result<Self> {
        Self::from_parts(EnvelopeParts {
            success: true,
            data: Some(data),
            error_kind: None,
            error_message: None,
            quality_score,
            execution_time_ms,
            timestamp: Utc::now(),
            source: source.into(),
            attempts: 1,
        })
    }

    /// Build a failure envelope stamped with the current time.
    ///
    /// A negative or non-finite `execution_time_ms` is clamped to zero so this
    /// constructor is infallible.
    pub fn failure(
        source: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            quality_score: 0.0,
            execution_time_ms: sanitize_elapsed(execution_time_ms),
            timestamp: Utc::now(),
            source: source.into(),
            attempts: 1,
        }
    }

    /// Validate raw parts into an envelope.
    pub fn from_parts(parts: EnvelopeParts) -> Result<Self> {
        if !parts.execution_time_ms.is_finite() || parts.execution_time_ms < 0.0 {
            return Err(VigilError::invalid_input(format!(
                "execution_time_ms must be a finite value >= 0, got {}",
                parts.execution_time_ms
            )));
        }
        if parts.attempts == 0 {
            return Err(VigilError::invalid_input("attempts must be >= 1"));
        }

        if parts.success {
            if let Some(kind) = parts.error_kind {
                return Err(VigilError::invalid_input(format!(
                    "success envelope from '{}' must not carry error kind {kind}",
                    parts.source
                )));
            }
            if !(0.0..=1.0).contains(&parts.quality_score) {
                return Err(VigilError::invalid_input(format!(
                    "quality_score must be within [0, 1], got {}",
                    parts.quality_score
                )));
            }
            Ok(Self {
                success: true,
                data: Some(parts.data.unwrap_or_default()),
                error_kind: None,
                error_message: parts.error_message,
                quality_score: parts.quality_score,
                execution_time_ms: parts.execution_time_ms,
                timestamp: parts.timestamp,
                source: parts.source,
                attempts: parts.attempts,
            })
        } else {
            let Some(kind) = parts.error_kind else {
                return Err(VigilError::invalid_input(format!(
                    "failure envelope from '{}' must carry an error kind",
                    parts.source
                )));
            };
            if parts.data.is_some() {
                return Err(VigilError::invalid_input(
                    "failure envelope must not carry a data payload",
                ));
            }
            if parts.quality_score != 0.0 {
                return Err(VigilError::invalid_input(format!(
                    "failure envelope quality_score is fixed at 0.0, got {}",
                    parts.quality_score
                )));
            }
            Ok(Self {
                success: false,
                data: None,
                error_kind: Some(kind),
                error_message: parts.error_message,
                quality_score: 0.0,
                execution_time_ms: parts.execution_time_ms,
                timestamp: parts.timestamp,
                source: parts.source,
                attempts: parts.attempts,
            })
        }
    }

    /// Annotate the total number of attempts spent producing this envelope.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&Payload> {
        self.data.as_ref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    pub fn execution_time_ms(&self) -> f64 {
        self.execution_time_ms
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl TryFrom<EnvelopeParts> for ResultEnvelope {
    type Error = VigilError;

    fn try_from(parts: EnvelopeParts) -> Result<Self> {
        Self::from_parts(parts)
    }
}

impl From<ResultEnvelope> for EnvelopeParts {
    fn from(env: ResultEnvelope) -> Self {
        Self {
            success: env.success,
            data: env.data,
            error_kind: env.error_kind,
            error_message: env.error_message,
            quality_score: env.quality_score,
            execution_time_ms: env.execution_time_ms,
            timestamp: env.timestamp,
            source: env.source,
            attempts: env.attempts,
        }
    }
}

fn sanitize_elapsed(ms: f64) -> f64 {
    if ms.is_finite() && ms > 0.0 {
        ms
    } else {
        0.0
    }
}
