//! Run-level orchestration and health reporting.
//!
//! The [`Orchestrator`] invokes every configured agent in order, isolating
//! agent failures, scores each agent's envelopes, and assembles a
//! [`HealthReport`]. A degraded or unhealthy run is a normal return value; the
//! only errors are configuration-contract violations.

use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::{Agent, AgentContext};
use crate::config::FrameworkConfig;
use crate::domain::{ErrorKind, Result, ResultEnvelope, VigilError, WorkerFailure};
use crate::intelligence::{ErrorIntelligence, ErrorPattern, RecurrenceRule};
use crate::logging::{ComponentLogger, StructuredLogger};
use crate::quality::QualityScore;
use crate::recovery::{panic_message, RecoveryPolicy};

/// Patterns copied into each report.
const REPORT_PATTERN_LIMIT: usize = 10;

/// Health classification for one agent or a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Policy agents apply to workers without their own override.
    pub default_policy: RecoveryPolicy,
    /// Recurrence check that escalates an agent to `Unhealthy`.
    pub recurrence: RecurrenceRule,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_policy: RecoveryPolicy::default(),
            recurrence: RecurrenceRule::default(),
        }
    }
}

/// Immutable per-run health summary, constructed only by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    run_id: Uuid,
    agent_scores: BTreeMap<String, QualityScore>,
    agent_status: BTreeMap<String, HealthStatus>,
    escalated_agents: Vec<String>,
    top_patterns: Vec<ErrorPattern>,
    overall_status: HealthStatus,
    generated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn agent_scores(&self) -> &BTreeMap<String, QualityScore> {
        &self.agent_scores
    }

    pub fn agent_status(&self) -> &BTreeMap<String, HealthStatus> {
        &self.agent_status
    }

    /// Agents forced to `Unhealthy` by a recurring non-retryable failure.
    pub fn escalated_agents(&self) -> &[String] {
        &self.escalated_agents
    }

    /// Most frequent error patterns within the recurrence window at report time.
    pub fn top_patterns(&self) -> &[ErrorPattern] {
        &self.top_patterns
    }

    pub fn overall_status(&self) -> HealthStatus {
        self.overall_status
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Drives agents and owns the resulting health reports.
pub struct Orchestrator {
    agents: Vec<Box<dyn Agent>>,
    root_logger: StructuredLogger,
    logger: ComponentLogger,
    intelligence: Arc<ErrorIntelligence>,
    config: OrchestratorConfig,
    state: RunState,
    last_report: Option<HealthReport>,
}

impl Orchestrator {
    pub fn new(
        logger: &StructuredLogger,
        intelligence: Arc<ErrorIntelligence>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            agents: Vec::new(),
            root_logger: logger.clone(),
            logger: logger.component("orchestrator"),
            intelligence,
            config,
            state: RunState::Idle,
            last_report: None,
        }
    }

    /// Build the aggregator and policies from `config`.
    ///
    /// Fails when the aggregator cannot be constructed.
    pub fn from_config(config: &FrameworkConfig, logger: &StructuredLogger) -> Result<Self> {
        config.validate()?;
        let intelligence = config
            .build_intelligence()?
            .with_logger(logger.component("intelligence"));
        Ok(Self::new(
            logger,
            Arc::new(intelligence),
            config.orchestrator_config()?,
        ))
    }

    pub fn with_agent(mut self, agent: impl Agent + 'static) -> Self {
        self.agents.push(Box::new(agent));
        self
    }

    pub fn add_agent(&mut self, agent: Box<dyn Agent>) {
        self.agents.push(agent);
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn intelligence(&self) -> &Arc<ErrorIntelligence> {
        &self.intelligence
    }

    pub fn last_report(&self) -> Option<&HealthReport> {
        self.last_report.as_ref()
    }

    /// Invoke every agent and produce the run's health report.
    ///
    /// Returns `Err(InvalidInput)` only when no agents are configured or two
    /// agents share a name.
    pub async fn run(&mut self) -> Result<HealthReport> {
        if self.agents.is_empty() {
            self.logger
                .error("run rejected: no agents configured", json!({}));
            return Err(VigilError::InvalidInput(
                "no agents configured for run".to_string(),
            ));
        }
        if let Some(name) = self.duplicate_agent_name() {
            self.logger.error(
                "run rejected: duplicate agent name",
                json!({ "agent": name }),
            );
            return Err(VigilError::InvalidInput(format!(
                "agent name '{name}' is configured more than once"
            )));
        }

        // A fresh invocation re-arms a completed orchestrator.
        self.state = RunState::Idle;
        let run_id = Uuid::new_v4();
        self.state = RunState::Running;

        let span = tracing::info_span!("vigil.run", run_id = %run_id);
        let report = self.execute(run_id).instrument(span).await;

        self.state = RunState::Completed;
        self.last_report = Some(report.clone());
        Ok(report)
    }

    async fn execute(&self, run_id: Uuid) -> HealthReport {
        self.logger.info(
            "run started",
            json!({ "run_id": run_id, "agents": self.agents.len() }),
        );

        let mut agent_scores = BTreeMap::new();
        let mut agent_status = BTreeMap::new();
        let mut escalated_agents = Vec::new();

        for agent in &self.agents {
            let name = agent.name().to_string();
            let ctx = AgentContext::new(
                self.root_logger.component(format!("agent.{name}")),
                Arc::clone(&self.intelligence),
                self.config.default_policy.clone(),
            );

            let envelopes = self.invoke_agent(agent.as_ref(), &ctx).await;
            for env in &envelopes {
                self.intelligence.observe(env);
            }

            let score = QualityScore::from_envelopes(&envelopes);
            let escalated = self.has_recurring_permanent_failure(&envelopes);
            let status = agent_health(&score, escalated);

            let context = json!({
                "run_id": run_id,
                "agent": name,
                "overall": score.overall,
                "successes": score.successes,
                "failures": score.failures,
                "degraded": score.degraded,
                "status": status,
            });
            if escalated {
                self.logger
                    .error("agent escalated: recurring non-retryable failure", context);
                escalated_agents.push(name.clone());
            } else {
                self.logger.info("agent completed", context);
            }

            agent_scores.insert(name.clone(), score);
            agent_status.insert(name, status);
        }

        let overall_status = overall_health(agent_status.values().copied());
        let top_patterns: Vec<ErrorPattern> = self
            .intelligence
            .patterns(self.config.recurrence.window)
            .take(REPORT_PATTERN_LIMIT)
            .collect();

        let report = HealthReport {
            run_id,
            agent_scores,
            agent_status,
            escalated_agents,
            top_patterns,
            overall_status,
            generated_at: Utc::now(),
        };

        let context = json!({
            "run_id": run_id,
            "overall_status": report.overall_status,
            "escalated_agents": report.escalated_agents,
        });
        match report.overall_status {
            HealthStatus::Healthy => self.logger.info("run completed", context),
            HealthStatus::Degraded | HealthStatus::Unhealthy => {
                self.logger.warn("run completed with failures", context)
            }
        }
        report
    }

    /// Report keys are agent names, so each must be unique.
    fn duplicate_agent_name(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.agents
            .iter()
            .map(|agent| agent.name())
            .find(|name| !seen.insert(*name))
    }

    /// Invoke one agent, capturing agent-level errors and panics as a single
    /// failure envelope sourced from the agent.
    async fn invoke_agent(&self, agent: &dyn Agent, ctx: &AgentContext) -> Vec<ResultEnvelope> {
        let started = tokio::time::Instant::now();
        let outcome = AssertUnwindSafe(agent.invoke(ctx)).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(envelopes)) => return envelopes,
            Ok(Err(failure)) => failure,
            Err(payload) => WorkerFailure::new(
                ErrorKind::Unknown,
                format!("agent panicked: {}", panic_message(payload.as_ref())),
            ),
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.logger.error(
            "agent failed",
            json!({
                "agent": agent.name(),
                "error_kind": failure.kind,
                "error": failure.message,
            }),
        );
        self.intelligence
            .record(failure.kind, agent.name(), &failure.message);
        vec![ResultEnvelope::failure(
            agent.name(),
            failure.kind,
            failure.message,
            elapsed_ms,
        )]
    }

    fn has_recurring_permanent_failure(&self, envelopes: &[ResultEnvelope]) -> bool {
        let rule = &self.config.recurrence;
        envelopes.iter().any(|env| match env.error_kind() {
            Some(kind) if !kind.retryable() => {
                self.intelligence
                    .is_recurring(kind, env.source(), rule.threshold, rule.window)
            }
            _ => false,
        })
    }
}

fn agent_health(score: &QualityScore, escalated: bool) -> HealthStatus {
    if escalated || score.successes == 0 {
        HealthStatus::Unhealthy
    } else if score.overall >= 1.0 {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

fn overall_health(statuses: impl Iterator<Item = HealthStatus>) -> HealthStatus {
    statuses.fold(HealthStatus::Healthy, |acc, s| match (acc, s) {
        (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
        (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    })
}
