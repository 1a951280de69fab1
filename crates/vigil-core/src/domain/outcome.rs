//! Raw worker outcomes before they are normalized into envelopes.

use serde::{Deserialize, Serialize};

use crate::domain::envelope::Payload;
use crate::domain::kind::ErrorKind;

/// Successful worker output: named results plus a method-defined quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub data: Payload,
    pub quality_score: f64,
}

impl WorkerOutput {
    pub fn new(data: Payload, quality_score: f64) -> Self {
        Self {
            data,
            quality_score,
        }
    }
}

/// Classified worker failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct WorkerFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl WorkerFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }
}

/// Unclassified errors become [`ErrorKind::Unknown`], unless the chain
/// already wraps a `WorkerFailure`.
impl From<anyhow::Error> for WorkerFailure {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<WorkerFailure>() {
            Some(failure) => failure.clone(),
            None => Self::unknown(format!("{err:#}")),
        }
    }
}
