//! Collaborator seams: workers wrap one analytical operation, agents drive
//! workers.
//!
//! Agents must call workers only through [`AgentContext::recover`] and hand
//! back every resulting envelope, unmodified and in order. [`WorkerAgent`] is
//! the reusable sequential agent that does exactly that.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::{ErrorKind, ResultEnvelope, WorkerFailure, WorkerOutput};
use crate::intelligence::ErrorIntelligence;
use crate::logging::ComponentLogger;
use crate::recovery::{RecoveryPolicy, RecoveryWrapper};

/// A single-purpose wrapper around one analytical operation.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Identifier used as the envelope `source`.
    fn name(&self) -> &str;

    /// Per-worker policy override; the agent default applies when `None`.
    fn policy(&self) -> Option<RecoveryPolicy> {
        None
    }

    async fn execute(&self, input: &Value) -> Result<WorkerOutput, WorkerFailure>;
}

/// A coordinating unit owning one analytical domain.
///
/// Returning `Err` reports an agent-level failure (e.g. missing input); the
/// orchestrator turns it into a failure envelope sourced from the agent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, ctx: &AgentContext) -> Result<Vec<ResultEnvelope>, WorkerFailure>;
}

/// Handles an agent receives for one invocation.
#[derive(Debug, Clone)]
pub struct AgentContext {
    logger: ComponentLogger,
    intelligence: Arc<ErrorIntelligence>,
    default_policy: RecoveryPolicy,
}

impl AgentContext {
    pub fn new(
        logger: ComponentLogger,
        intelligence: Arc<ErrorIntelligence>,
        default_policy: RecoveryPolicy,
    ) -> Self {
        Self {
            logger,
            intelligence,
            default_policy,
        }
    }

    pub fn logger(&self) -> &ComponentLogger {
        &self.logger
    }

    pub fn intelligence(&self) -> &Arc<ErrorIntelligence> {
        &self.intelligence
    }

    pub fn default_policy(&self) -> &RecoveryPolicy {
        &self.default_policy
    }

    /// Build a wrapper for `policy`, or the default policy when `None`.
    pub fn wrapper(&self, policy: Option<RecoveryPolicy>) -> RecoveryWrapper {
        RecoveryWrapper::new(
            policy.unwrap_or_else(|| self.default_policy.clone()),
            self.logger.child("recovery"),
            Arc::clone(&self.intelligence),
        )
    }

    /// Run one worker operation through the recovery wrapper.
    pub async fn recover<F, Fut>(
        &self,
        source: &str,
        policy: Option<RecoveryPolicy>,
        op: F,
    ) -> ResultEnvelope
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<WorkerOutput, WorkerFailure>>,
    {
        self.wrapper(policy).run(source, op).await
    }
}

/// Agent that runs its workers sequentially over a shared input.
pub struct WorkerAgent {
    name: String,
    input: Value,
    workers: Vec<Arc<dyn Worker>>,
}

impl WorkerAgent {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
            workers: Vec::new(),
        }
    }

    pub fn with_worker(mut self, worker: impl Worker + 'static) -> Self {
        self.workers.push(Arc::new(worker));
        self
    }

    pub fn push_worker(&mut self, worker: Arc<dyn Worker>) {
        self.workers.push(worker);
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name()).collect()
    }
}

#[async_trait]
impl Agent for WorkerAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &AgentContext) -> Result<Vec<ResultEnvelope>, WorkerFailure> {
        if self.input.is_null() {
            return Err(WorkerFailure::new(
                ErrorKind::InvalidInput,
                format!("agent '{}' has no input data", self.name),
            ));
        }
        if self.workers.is_empty() {
            return Err(WorkerFailure::new(
                ErrorKind::InvalidInput,
                format!("agent '{}' has no workers configured", self.name),
            ));
        }

        let mut envelopes = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let input = &self.input;
            let envelope = ctx
                .recover(worker.name(), worker.policy(), |_| worker.execute(input))
                .await;
            ctx.logger().debug(
                "worker finished",
                json!({
                    "worker": worker.name(),
                    "success": envelope.is_success(),
                    "attempts": envelope.attempts(),
                }),
            );
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Payload;
    use crate::logging::{MemorySink, StructuredLogger};

    struct Constant {
        name: &'static str,
        quality: f64,
    }

    #[async_trait]
    impl Worker for Constant {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, input: &Value) -> Result<WorkerOutput, WorkerFailure> {
            let mut data = Payload::new();
            data.insert("rows".to_string(), json!(input["rows"]));
            Ok(WorkerOutput::new(data, self.quality))
        }
    }

    struct Starved;

    #[async_trait]
    impl Worker for Starved {
        fn name(&self) -> &str {
            "starved"
        }

        fn policy(&self) -> Option<RecoveryPolicy> {
            Some(RecoveryPolicy::no_retry())
        }

        async fn execute(&self, _input: &Value) -> Result<WorkerOutput, WorkerFailure> {
            Err(WorkerFailure::new(ErrorKind::InsufficientData, "need 30 rows"))
        }
    }

    fn ctx() -> AgentContext {
        let logger = StructuredLogger::with_writer(MemorySink::new(), tracing::Level::DEBUG);
        AgentContext::new(
            logger.component("agent.test"),
            Arc::new(ErrorIntelligence::new(16).unwrap()),
            RecoveryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_worker_agent_forwards_envelopes_in_order() {
        let agent = WorkerAgent::new("prediction", json!({"rows": 12}))
            .with_worker(Constant {
                name: "ols",
                quality: 0.9,
            })
            .with_worker(Starved)
            .with_worker(Constant {
                name: "tree",
                quality: 0.7,
            });
        assert_eq!(agent.worker_names(), vec!["ols", "starved", "tree"]);

        let envelopes = agent.invoke(&ctx()).await.unwrap();
        let sources: Vec<&str> = envelopes.iter().map(|e| e.source()).collect();
        assert_eq!(sources, vec!["ols", "starved", "tree"]);
        assert_eq!(envelopes[0].data().unwrap()["rows"], json!(12));
        assert_eq!(envelopes[1].error_kind(), Some(ErrorKind::InsufficientData));
    }

    #[tokio::test]
    async fn test_missing_input_is_agent_failure() {
        let agent = WorkerAgent::new("anomaly", Value::Null).with_worker(Starved);
        let err = agent.invoke(&ctx()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_no_workers_is_agent_failure() {
        let agent = WorkerAgent::new("aggregation", json!({}));
        let err = agent.invoke(&ctx()).await.unwrap_err();
        assert!(err.message.contains("no workers"));
    }
}
