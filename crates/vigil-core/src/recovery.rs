//! Bounded retry-with-backoff around fallible worker operations.
//!
//! [`RecoveryWrapper::run`] drives an operation until it succeeds, fails with
//! a non-retryable [`ErrorKind`], or exhausts [`RecoveryPolicy::max_attempts`].
//! Every outcome comes back as a [`ResultEnvelope`]; errors and panics never
//! cross the wrapper boundary.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;
use tokio::time::Instant;

use crate::domain::{ErrorKind, Result, ResultEnvelope, VigilError, WorkerFailure, WorkerOutput};
use crate::intelligence::{ErrorIntelligence, RecurrenceRule};
use crate::logging::ComponentLogger;

/// Retry bounds for one wrapped call-site.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPolicy {
    max_attempts: u32,
    backoff_base_ms: f64,
    backoff_multiplier: f64,
    suppress_when_recurring: Option<RecurrenceRule>,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 100.0,
            backoff_multiplier: 2.0,
            suppress_when_recurring: None,
        }
    }
}

impl RecoveryPolicy {
    pub fn new(max_attempts: u32, backoff_base_ms: f64, backoff_multiplier: f64) -> Result<Self> {
        if max_attempts == 0 {
            return Err(VigilError::InvalidInput(
                "max_attempts must be >= 1".to_string(),
            ));
        }
        if !backoff_base_ms.is_finite() || backoff_base_ms < 0.0 {
            return Err(VigilError::InvalidInput(format!(
                "backoff_base_ms must be a finite value >= 0, got {backoff_base_ms}"
            )));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(VigilError::InvalidInput(format!(
                "backoff_multiplier must be a finite value >= 1, got {backoff_multiplier}"
            )));
        }
        Ok(Self {
            max_attempts,
            backoff_base_ms,
            backoff_multiplier,
            suppress_when_recurring: None,
        })
    }

    /// Single attempt, no retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_base_ms: 0.0,
            backoff_multiplier: 1.0,
            suppress_when_recurring: None,
        }
    }

    /// Stop retrying early once the failing `(kind, source)` is already
    /// recurring under `rule`.
    pub fn with_suppression(mut self, rule: RecurrenceRule) -> Self {
        self.suppress_when_recurring = Some(rule);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_base_ms(&self) -> f64 {
        self.backoff_base_ms
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn suppression(&self) -> Option<&RecurrenceRule> {
        self.suppress_when_recurring.as_ref()
    }

    /// Delay after failed `attempt` (1-based): `base * multiplier^(attempt-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let ms = self.backoff_base_ms * self.backoff_multiplier.powi(exp);
        Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
    }
}

/// Why a failing call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    NonRetryable,
    Exhausted,
    Suppressed,
}

impl Stop {
    fn as_str(self) -> &'static str {
        match self {
            Self::NonRetryable => "non_retryable",
            Self::Exhausted => "retries_exhausted",
            Self::Suppressed => "recurring_suppressed",
        }
    }
}

/// Applies a [`RecoveryPolicy`] around operations, logging every attempt and
/// escalating final failures to [`ErrorIntelligence`].
#[derive(Debug, Clone)]
pub struct RecoveryWrapper {
    policy: RecoveryPolicy,
    logger: ComponentLogger,
    intelligence: Arc<ErrorIntelligence>,
}

impl RecoveryWrapper {
    pub fn new(
        policy: RecoveryPolicy,
        logger: ComponentLogger,
        intelligence: Arc<ErrorIntelligence>,
    ) -> Self {
        Self {
            policy,
            logger,
            intelligence,
        }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Run `op` under the policy. `op` receives the 1-based attempt number.
    pub async fn run<F, Fut>(&self, source: &str, mut op: F) -> ResultEnvelope
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<WorkerOutput, WorkerFailure>>,
    {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 1u32;

        loop {
            let attempt_started = Instant::now();
            let outcome = run_attempt(&mut op, attempt).await;
            let attempt_ms = elapsed_ms(attempt_started);

            let failure = match outcome {
                Ok(output) => {
                    let quality = output.quality_score;
                    match ResultEnvelope::success(
                        source,
                        output.data,
                        quality,
                        elapsed_ms(started),
                    ) {
                        Ok(envelope) => {
                            self.logger.info(
                                "attempt succeeded",
                                json!({
                                    "source": source,
                                    "attempt": attempt,
                                    "elapsed_ms": attempt_ms,
                                    "quality_score": quality,
                                }),
                            );
                            return envelope.with_attempts(attempt);
                        }
                        Err(e) => WorkerFailure::new(
                            ErrorKind::InvalidInput,
                            format!("worker output violates result contract: {e}"),
                        ),
                    }
                }
                Err(failure) => failure,
            };

            let kind = failure.kind;
            let stop = if !kind.retryable() {
                Some(Stop::NonRetryable)
            } else if attempt >= max_attempts {
                Some(Stop::Exhausted)
            } else if self.is_suppressed(kind, source) {
                Some(Stop::Suppressed)
            } else {
                None
            };

            let Some(stop) = stop else {
                let delay = self.policy.backoff_delay(attempt);
                self.logger.warn(
                    "attempt failed; retrying",
                    json!({
                        "source": source,
                        "attempt": attempt,
                        "max_attempts": max_attempts,
                        "elapsed_ms": attempt_ms,
                        "error_kind": kind,
                        "error": failure.message,
                        "backoff_ms": delay.as_secs_f64() * 1000.0,
                    }),
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
                continue;
            };

            let context = json!({
                "source": source,
                "attempt": attempt,
                "max_attempts": max_attempts,
                "elapsed_ms": attempt_ms,
                "total_elapsed_ms": elapsed_ms(started),
                "error_kind": kind,
                "error": failure.message,
                "reason": stop.as_str(),
            });
            match stop {
                Stop::NonRetryable => self.logger.warn("attempt failed; not retryable", context),
                Stop::Exhausted => self.logger.error("retries exhausted", context),
                Stop::Suppressed => self
                    .logger
                    .error("retries suppressed; failure is recurring", context),
            }

            self.intelligence.record(
                kind,
                source,
                &format!("{} after {attempt} attempt(s): {}", stop.as_str(), failure.message),
            );
            return ResultEnvelope::failure(source, kind, failure.message, elapsed_ms(started))
                .with_attempts(attempt);
        }
    }

    fn is_suppressed(&self, kind: ErrorKind, source: &str) -> bool {
        self.policy
            .suppress_when_recurring
            .as_ref()
            .is_some_and(|rule| self.intelligence.matches_rule(kind, source, rule))
    }
}

/// One attempt with panics normalized to [`ErrorKind::Unknown`].
async fn run_attempt<F, Fut>(
    op: &mut F,
    attempt: u32,
) -> std::result::Result<WorkerOutput, WorkerFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<WorkerOutput, WorkerFailure>>,
{
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| op(attempt))) {
        Ok(fut) => fut,
        Err(payload) => return Err(panic_failure(payload.as_ref())),
    };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panic_failure(payload.as_ref())),
    }
}

fn panic_failure(payload: &(dyn Any + Send)) -> WorkerFailure {
    WorkerFailure::unknown(format!("operation panicked: {}", panic_message(payload)))
}

/// Text of a `panic!` payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Payload;
    use crate::logging::{MemorySink, StructuredLogger};
    use serde_json::Value;

    type Harness = (
        RecoveryWrapper,
        MemorySink,
        Arc<ErrorIntelligence>,
        StructuredLogger,
    );

    fn harness(policy: RecoveryPolicy) -> Harness {
        let sink = MemorySink::new();
        let logger = StructuredLogger::with_writer(sink.clone(), tracing::Level::DEBUG);
        let intel = Arc::new(ErrorIntelligence::new(64).unwrap());
        let wrapper =
            RecoveryWrapper::new(policy, logger.component("recovery"), Arc::clone(&intel));
        (wrapper, sink, intel, logger)
    }

    fn ok_output(quality: f64) -> WorkerOutput {
        let mut data = Payload::new();
        data.insert("value".to_string(), Value::from(42));
        WorkerOutput::new(data, quality)
    }

    fn explode() -> std::result::Result<WorkerOutput, WorkerFailure> {
        panic!("index out of bounds")
    }

    #[test]
    fn test_policy_validation() {
        assert!(RecoveryPolicy::new(0, 0.0, 1.0).is_err());
        assert!(RecoveryPolicy::new(1, -1.0, 1.0).is_err());
        assert!(RecoveryPolicy::new(1, 0.0, 0.5).is_err());
        assert!(RecoveryPolicy::new(1, f64::NAN, 1.0).is_err());
        assert!(RecoveryPolicy::new(1, 0.0, 1.0).is_ok());
    }

    #[test]
    fn test_backoff_delay_is_exponential() {
        let policy = RecoveryPolicy::new(4, 100.0, 2.0).unwrap();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        let zero = RecoveryPolicy::new(4, 0.0, 3.0).unwrap();
        assert!(zero.backoff_delay(3).is_zero());
    }

    #[test]
    fn test_backoff_delay_saturates() {
        let policy = RecoveryPolicy::new(u32::MAX, 1e300, 1e10).unwrap();
        assert_eq!(policy.backoff_delay(50), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let (wrapper, sink, intel, logger) = harness(RecoveryPolicy::default());
        let env = wrapper.run("ols", |_| async { Ok(ok_output(0.8)) }).await;
        logger.flush().unwrap();

        assert!(env.is_success());
        assert_eq!(env.attempts(), 1);
        assert_eq!(env.quality_score(), 0.8);
        assert!(intel.is_empty());
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, "INFO");
        assert_eq!(records[0].context["attempt"], Value::from(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_uses_all_attempts_with_backoff() {
        let policy = RecoveryPolicy::new(3, 100.0, 2.0).unwrap();
        let (wrapper, sink, intel, logger) = harness(policy);
        let mut calls = 0u32;
        let started = Instant::now();

        let env = wrapper
            .run("ols", |_| {
                calls += 1;
                async { Err(WorkerFailure::new(ErrorKind::ComputationFailure, "singular matrix")) }
            })
            .await;
        logger.flush().unwrap();

        assert_eq!(calls, 3);
        assert!(!env.is_success());
        assert_eq!(env.error_kind(), Some(ErrorKind::ComputationFailure));
        assert_eq!(env.attempts(), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(intel.len(), 1);

        let levels: Vec<String> = sink.records().into_iter().map(|r| r.level).collect();
        assert_eq!(levels, vec!["WARN", "WARN", "ERROR"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_single_attempt() {
        for kind in ErrorKind::ALL.into_iter().filter(|k| !k.retryable()) {
            let policy = RecoveryPolicy::new(5, 10.0, 2.0).unwrap();
            let (wrapper, _sink, intel, _logger) = harness(policy);
            let mut calls = 0u32;
            let env = wrapper
                .run("tree", |_| {
                    calls += 1;
                    async move { Err(WorkerFailure::new(kind, "bad")) }
                })
                .await;
            assert_eq!(calls, 1, "{kind}");
            assert_eq!(env.attempts(), 1);
            assert_eq!(env.error_kind(), Some(kind));
            assert_eq!(intel.len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_one_never_retries() {
        let (wrapper, _sink, _intel, _logger) = harness(RecoveryPolicy::no_retry());
        let mut calls = 0u32;
        let env = wrapper
            .run("w", |_| {
                calls += 1;
                async { Err(WorkerFailure::new(ErrorKind::Timeout, "slow")) }
            })
            .await;
        assert_eq!(calls, 1);
        assert_eq!(env.error_kind(), Some(ErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let (wrapper, _sink, intel, _logger) = harness(RecoveryPolicy::new(3, 0.0, 1.0).unwrap());
        let env = wrapper
            .run("arima", |attempt| async move {
                if attempt < 2 {
                    Err(WorkerFailure::new(ErrorKind::Timeout, "slow"))
                } else {
                    Ok(ok_output(0.6))
                }
            })
            .await;
        assert!(env.is_success());
        assert_eq!(env.attempts(), 2);
        assert!(intel.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_normalized_to_unknown_and_retried() {
        let (wrapper, _sink, _intel, _logger) = harness(RecoveryPolicy::new(2, 0.0, 1.0).unwrap());
        let mut calls = 0u32;
        let env = wrapper
            .run("iforest", |_| {
                calls += 1;
                async { explode() }
            })
            .await;
        assert_eq!(calls, 2);
        assert_eq!(env.error_kind(), Some(ErrorKind::Unknown));
        assert!(env.error_message().unwrap().contains("index out of bounds"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_anyhow_error_is_unknown() {
        let (wrapper, _sink, _intel, _logger) = harness(RecoveryPolicy::no_retry());
        let env = wrapper
            .run("agg", |_| async {
                let parsed: u32 = "abc".parse().map_err(anyhow::Error::from)?;
                Ok::<WorkerOutput, WorkerFailure>(ok_output(f64::from(parsed)))
            })
            .await;
        assert_eq!(env.error_kind(), Some(ErrorKind::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contract_violating_output_becomes_invalid_input() {
        let (wrapper, _sink, _intel, _logger) = harness(RecoveryPolicy::default());
        let mut calls = 0u32;
        let env = wrapper
            .run("w", |_| {
                calls += 1;
                async { Ok(ok_output(1.7)) }
            })
            .await;
        assert_eq!(calls, 1);
        assert_eq!(env.error_kind(), Some(ErrorKind::InvalidInput));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_failure_suppresses_retries() {
        let rule = RecurrenceRule::new(2, Duration::from_secs(3600));
        let policy = RecoveryPolicy::new(5, 10.0, 1.0).unwrap().with_suppression(rule);
        let (wrapper, sink, intel, logger) = harness(policy);
        intel.record(ErrorKind::Timeout, "forecast", "earlier");
        intel.record(ErrorKind::Timeout, "forecast", "earlier");

        let mut calls = 0u32;
        let env = wrapper
            .run("forecast", |_| {
                calls += 1;
                async { Err(WorkerFailure::new(ErrorKind::Timeout, "slow")) }
            })
            .await;
        logger.flush().unwrap();

        assert_eq!(calls, 1);
        assert_eq!(env.attempts(), 1);
        assert_eq!(intel.len(), 3);
        let last = sink.records().pop().unwrap();
        assert_eq!(last.level, "ERROR");
        assert_eq!(last.context["reason"], Value::from("recurring_suppressed"));
    }
}
