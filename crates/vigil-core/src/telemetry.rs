//! Framework diagnostics through the global `tracing` subscriber.
//!
//! Pipeline records never come here; they go to
//! [`StructuredLogger`](crate::logging::StructuredLogger). Diagnostics cover
//! the framework itself: logger faults and the `vigil.run` span. The
//! subscriber is driven by the `[logging]` section of
//! [`FrameworkConfig`](crate::config::FrameworkConfig).

use std::io;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::domain::Result;
use crate::logging::parse_level;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "VIGIL_LOG";

/// How diagnostics are rendered on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticsFormat {
    #[default]
    Text,
    Json,
    Off,
}

/// Filter from `VIGIL_LOG`, then `RUST_LOG`, then `level`.
pub fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global diagnostics subscriber for `config`.
///
/// `Ok(true)` means this call installed it. An `Off` format or an already
/// installed subscriber yields `Ok(false)`; an unknown `diagnostics_level` is
/// `InvalidConfig`.
pub fn init_diagnostics(config: &LoggingConfig) -> Result<bool> {
    let level = parse_level(&config.diagnostics_level)?;
    if config.diagnostics == DiagnosticsFormat::Off {
        return Ok(false);
    }

    let json = (config.diagnostics == DiagnosticsFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(false)
            .with_writer(io::stderr)
    });
    let text = (config.diagnostics == DiagnosticsFormat::Text)
        .then(|| fmt::layer().with_target(false).with_writer(io::stderr));

    Ok(tracing_subscriber::registry()
        .with(env_filter(level))
        .with(json)
        .with(text)
        .try_init()
        .is_ok())
}
