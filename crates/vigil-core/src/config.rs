//! TOML configuration for the framework's tuning parameters.
//!
//! ```toml
//! [recovery]
//! max_attempts = 3
//! backoff_base_ms = 100.0
//! backoff_multiplier = 2.0
//! suppress_recurring = false
//!
//! [recurrence]
//! threshold = 5
//! window_secs = 60
//!
//! [intelligence]
//! capacity = 1024
//! retention_secs = 3600
//!
//! [logging]
//! level = "info"
//! path = "/var/log/vigil/pipeline.jsonl"
//! diagnostics = "json"
//! diagnostics_level = "warn"
//! ```
//!
//! Every section and key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Result, VigilError};
use crate::intelligence::{ErrorIntelligence, RecurrenceRule};
use crate::logging::parse_level;
use crate::orchestrator::OrchestratorConfig;
use crate::recovery::RecoveryPolicy;
use crate::telemetry::{self, DiagnosticsFormat};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: f64,
    pub backoff_multiplier: f64,
    /// Apply the `[recurrence]` rule to stop retrying recurring failures.
    pub suppress_recurring: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        let policy = RecoveryPolicy::default();
        Self {
            max_attempts: policy.max_attempts(),
            backoff_base_ms: policy.backoff_base_ms(),
            backoff_multiplier: policy.backoff_multiplier(),
            suppress_recurring: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecurrenceConfig {
    pub threshold: u32,
    pub window_secs: u64,
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        let rule = RecurrenceRule::default();
        Self {
            threshold: rule.threshold,
            window_secs: rule.window.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntelligenceConfig {
    pub capacity: usize,
    pub retention_secs: Option<u64>,
}

impl Default for IntelligenceConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            retention_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    /// Append JSON lines to this file; stderr when unset.
    pub path: Option<PathBuf>,
    /// Output of the framework's own `tracing` diagnostics.
    pub diagnostics: DiagnosticsFormat,
    /// Diagnostics verbosity unless `VIGIL_LOG` or `RUST_LOG` is set.
    pub diagnostics_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            path: None,
            diagnostics: DiagnosticsFormat::Text,
            diagnostics_level: "warn".to_string(),
        }
    }
}

/// Top-level framework configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameworkConfig {
    pub recovery: RecoveryConfig,
    pub recurrence: RecurrenceConfig,
    pub intelligence: IntelligenceConfig,
    pub logging: LoggingConfig,
}

impl FrameworkConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.recovery_policy()
            .map_err(|e| VigilError::InvalidConfig(format!("[recovery] {e}")))?;
        if self.recurrence.threshold == 0 {
            return Err(VigilError::InvalidConfig(
                "[recurrence] threshold must be >= 1".to_string(),
            ));
        }
        if self.recurrence.window_secs == 0 {
            return Err(VigilError::InvalidConfig(
                "[recurrence] window_secs must be >= 1".to_string(),
            ));
        }
        if self.intelligence.capacity == 0 {
            return Err(VigilError::InvalidConfig(
                "[intelligence] capacity must be >= 1".to_string(),
            ));
        }
        parse_level(&self.logging.level)?;
        parse_level(&self.logging.diagnostics_level)?;
        Ok(())
    }

    /// Install the process diagnostics subscriber described by `[logging]`.
    ///
    /// Returns `Ok(false)` when diagnostics are off or a subscriber is
    /// already installed.
    pub fn init_diagnostics(&self) -> Result<bool> {
        telemetry::init_diagnostics(&self.logging)
    }

    pub fn recurrence_rule(&self) -> RecurrenceRule {
        RecurrenceRule::new(
            self.recurrence.threshold,
            Duration::from_secs(self.recurrence.window_secs),
        )
    }

    pub fn recovery_policy(&self) -> Result<RecoveryPolicy> {
        let policy = RecoveryPolicy::new(
            self.recovery.max_attempts,
            self.recovery.backoff_base_ms,
            self.recovery.backoff_multiplier,
        )?;
        Ok(if self.recovery.suppress_recurring {
            policy.with_suppression(self.recurrence_rule())
        } else {
            policy
        })
    }

    pub fn build_intelligence(&self) -> Result<ErrorIntelligence> {
        let intel = ErrorIntelligence::new(self.intelligence.capacity)?;
        Ok(match self.intelligence.retention_secs {
            Some(secs) => intel.with_retention(Duration::from_secs(secs)),
            None => intel,
        })
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        Ok(OrchestratorConfig {
            default_policy: self.recovery_policy()?,
            recurrence: self.recurrence_rule(),
        })
    }
}
