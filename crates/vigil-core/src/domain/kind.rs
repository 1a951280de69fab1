//! Closed error taxonomy shared by every worker and agent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classified failure kind. Retryability is static data on the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing required fields or columns.
    InvalidInput,
    /// Sample too small for the requested method.
    InsufficientData,
    /// Out-of-range hyperparameter.
    InvalidParameter,
    /// Numerical failure such as non-convergence or a singular matrix.
    ComputationFailure,
    /// Operation exceeded its allotted time budget.
    Timeout,
    /// Uncaught or unclassified failure.
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::InvalidInput,
        ErrorKind::InsufficientData,
        ErrorKind::InvalidParameter,
        ErrorKind::ComputationFailure,
        ErrorKind::Timeout,
        ErrorKind::Unknown,
    ];

    /// Whether a failure of this kind may succeed when attempted again.
    pub const fn retryable(self) -> bool {
        match self {
            Self::InvalidInput | Self::InsufficientData | Self::InvalidParameter => false,
            Self::ComputationFailure | Self::Timeout | Self::Unknown => true,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::InsufficientData => "insufficient_data",
            Self::InvalidParameter => "invalid_parameter",
            Self::ComputationFailure => "computation_failure",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
