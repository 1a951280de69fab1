//! Vigil Core Library
//!
//! Reliability and quality framework shared by analysis agents and their
//! workers: result envelopes, a classified error taxonomy, bounded recovery,
//! error intelligence, quality scoring and run health reports.

pub mod agent;
pub mod config;
pub mod domain;
pub mod intelligence;
pub mod logging;
pub mod orchestrator;
pub mod quality;
pub mod recovery;
pub mod ring;
pub mod telemetry;

pub use agent::{Agent, AgentContext, Worker, WorkerAgent};
pub use config::{
    FrameworkConfig, IntelligenceConfig, LoggingConfig, RecoveryConfig, RecurrenceConfig,
};
pub use domain::{
    EnvelopeParts, ErrorKind, Payload, Result, ResultEnvelope, VigilError, WorkerFailure,
    WorkerOutput,
};
pub use intelligence::{ErrorIntelligence, ErrorPattern, ErrorRecord, RecurrenceRule};
pub use logging::{ComponentLogger, LogRecord, MemorySink, StructuredLogger};
pub use orchestrator::{HealthReport, HealthStatus, Orchestrator, OrchestratorConfig, RunState};
pub use quality::QualityScore;
pub use recovery::{RecoveryPolicy, RecoveryWrapper};
pub use ring::RingBuffer;
pub use telemetry::{init_diagnostics, DiagnosticsFormat};

/// Vigil version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
