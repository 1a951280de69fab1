use std::sync::Arc;
use std::time::Duration;

use vigil_core::{
    ErrorIntelligence, ErrorKind, MemorySink, RecoveryPolicy, RecoveryWrapper, StructuredLogger,
    WorkerFailure, WorkerOutput,
};

fn wrapper(policy: RecoveryPolicy) -> (RecoveryWrapper, Arc<ErrorIntelligence>, MemorySink) {
    let sink = MemorySink::new();
    let logger = StructuredLogger::with_writer(sink.clone(), tracing::Level::INFO);
    let intel = Arc::new(ErrorIntelligence::new(128).unwrap());
    let wrapper = RecoveryWrapper::new(policy, logger.component("recovery"), Arc::clone(&intel));
    (wrapper, intel, sink)
}

#[tokio::test(start_paused = true)]
async fn computation_failure_three_times_escalates_once() {
    let policy = RecoveryPolicy::new(3, 50.0, 2.0).unwrap();
    let (wrapper, intel, _sink) = wrapper(policy);

    let mut attempts_seen = Vec::new();
    let env = wrapper
        .run("RegressionWorker", |attempt| {
            attempts_seen.push(attempt);
            async {
                Err::<WorkerOutput, _>(WorkerFailure::new(
                    ErrorKind::ComputationFailure,
                    "matrix is singular",
                ))
            }
        })
        .await;

    assert_eq!(attempts_seen, vec![1, 2, 3]);
    assert!(!env.is_success());
    assert_eq!(env.error_kind(), Some(ErrorKind::ComputationFailure));
    assert_eq!(env.attempts(), 3);
    assert_eq!(env.quality_score(), 0.0);

    let records = intel.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_kind, ErrorKind::ComputationFailure);
    assert_eq!(records[0].source, "RegressionWorker");
}

#[tokio::test(start_paused = true)]
async fn retryable_kinds_use_exactly_max_attempts() {
    for kind in ErrorKind::ALL.into_iter().filter(|k| k.retryable()) {
        for max_attempts in 1..=5u32 {
            let policy = RecoveryPolicy::new(max_attempts, 10.0, 1.5).unwrap();
            let (wrapper, intel, _sink) = wrapper(policy);
            let mut calls = 0u32;
            let env = wrapper
                .run("w", |_| {
                    calls += 1;
                    async move { Err::<WorkerOutput, _>(WorkerFailure::new(kind, "transient")) }
                })
                .await;
            assert_eq!(calls, max_attempts, "{kind} x{max_attempts}");
            assert_eq!(env.error_kind(), Some(kind));
            assert_eq!(env.attempts(), max_attempts);
            assert_eq!(intel.len(), 1);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn non_retryable_kinds_attempt_once_regardless_of_policy() {
    for kind in ErrorKind::ALL.into_iter().filter(|k| !k.retryable()) {
        for max_attempts in [1u32, 3, 10] {
            let policy = RecoveryPolicy::new(max_attempts, 10.0, 2.0).unwrap();
            let (wrapper, _intel, _sink) = wrapper(policy);
            let mut calls = 0u32;
            let env = wrapper
                .run("w", |_| {
                    calls += 1;
                    async move { Err::<WorkerOutput, _>(WorkerFailure::new(kind, "permanent")) }
                })
                .await;
            assert_eq!(calls, 1);
            assert_eq!(env.attempts(), 1);
            assert_eq!(env.error_kind(), Some(kind));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn zero_backoff_retries_immediately() {
    let policy = RecoveryPolicy::new(4, 0.0, 3.0).unwrap();
    let (wrapper, _intel, _sink) = wrapper(policy);
    let started = tokio::time::Instant::now();
    let env = wrapper
        .run("w", |_| async {
            Err::<WorkerOutput, _>(WorkerFailure::new(ErrorKind::Timeout, "slow"))
        })
        .await;
    assert_eq!(env.attempts(), 4);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn every_attempt_is_logged_with_attempt_number() {
    let policy = RecoveryPolicy::new(3, 100.0, 2.0).unwrap();
    let (wrapper, _intel, sink) = wrapper(policy);
    let _ = wrapper
        .run("ForecastWorker", |attempt| async move {
            if attempt < 3 {
                Err(WorkerFailure::new(ErrorKind::Timeout, "deadline"))
            } else {
                Ok(WorkerOutput::new(Default::default(), 0.5))
            }
        })
        .await;

    // WARN records flush immediately; the trailing INFO may still be buffered.
    let records = sink.records();
    let attempts: Vec<u64> = records
        .iter()
        .filter_map(|r| r.context.get("attempt").and_then(|v| v.as_u64()))
        .collect();
    assert_eq!(&attempts[..2], &[1, 2]);
    assert!(records.iter().all(|r| r.context.contains_key("elapsed_ms")));
    assert_eq!(records[1].context["backoff_ms"].as_f64(), Some(200.0));
}
