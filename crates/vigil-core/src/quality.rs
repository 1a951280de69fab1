//! Per-agent quality scoring over a completed batch of envelopes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::ResultEnvelope;

/// Aggregate outcome of one agent invocation.
///
/// `overall` is always `successes / (successes + failures)`, so it can be
/// reconstructed by hand from the envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub overall: f64,
    pub per_worker: BTreeMap<String, f64>,
    pub successes: usize,
    pub failures: usize,
    pub degraded: bool,
}

impl QualityScore {
    /// Score an ordered, completed batch.
    ///
    /// A worker appearing several times is scored as the mean over its calls,
    /// each failed call counting as 0.0.
    pub fn from_envelopes(envelopes: &[ResultEnvelope]) -> Self {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut successes = 0usize;
        let mut failures = 0usize;

        for env in envelopes {
            let score = if env.is_success() {
                successes += 1;
                env.quality_score()
            } else {
                failures += 1;
                0.0
            };
            let slot = sums.entry(env.source().to_string()).or_insert((0.0, 0));
            slot.0 += score;
            slot.1 += 1;
        }

        let total = successes + failures;
        let overall = if total > 0 {
            successes as f64 / total as f64
        } else {
            0.0
        };

        Self {
            overall,
            per_worker: sums
                .into_iter()
                .map(|(name, (sum, n))| (name, sum / n as f64))
                .collect(),
            successes,
            failures,
            degraded: successes > 0 && failures > 0,
        }
    }

    pub fn total(&self) -> usize {
        self.successes + self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, Payload};

    fn ok(source: &str, q: f64) -> ResultEnvelope {
        ResultEnvelope::success(source, Payload::new(), q, 1.0).unwrap()
    }

    fn fail(source: &str) -> ResultEnvelope {
        ResultEnvelope::failure(source, ErrorKind::InsufficientData, "too few rows", 1.0)
    }

    #[test]
    fn test_mixed_batch() {
        let score = QualityScore::from_envelopes(&[ok("A", 0.9), fail("B"), ok("C", 0.7)]);
        assert!((score.overall - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(score.per_worker["A"], 0.9);
        assert_eq!(score.per_worker["B"], 0.0);
        assert_eq!(score.per_worker["C"], 0.7);
        assert_eq!(score.successes, 2);
        assert_eq!(score.failures, 1);
        assert!(score.degraded);
    }

    #[test]
    fn test_empty_batch() {
        let score = QualityScore::from_envelopes(&[]);
        assert_eq!(score.overall, 0.0);
        assert!(!score.degraded);
        assert_eq!(score.total(), 0);
    }

    #[test]
    fn test_all_success_not_degraded() {
        let score = QualityScore::from_envelopes(&[ok("A", 0.5), ok("B", 1.0)]);
        assert_eq!(score.overall, 1.0);
        assert!(!score.degraded);
    }

    #[test]
    fn test_repeated_worker_is_averaged() {
        let score = QualityScore::from_envelopes(&[ok("A", 0.8), fail("A"), ok("A", 0.4)]);
        assert!((score.per_worker["A"] - 0.4).abs() < 1e-9);
        assert_eq!(score.total(), 3);
    }

    #[test]
    fn test_overall_matches_ratio_over_generated_batches() {
        for successes in 0..5usize {
            for failures in 0..5usize {
                let mut batch = Vec::new();
                batch.extend((0..successes).map(|i| ok(&format!("ok{i}"), 0.5)));
                batch.extend((0..failures).map(|i| fail(&format!("bad{i}"))));
                let score = QualityScore::from_envelopes(&batch);
                let total = successes + failures;
                if total == 0 {
                    assert_eq!(score.overall, 0.0);
                    assert!(!score.degraded);
                } else {
                    assert_eq!(score.overall, successes as f64 / total as f64);
                    assert_eq!(score.degraded, successes > 0 && failures > 0);
                }
            }
        }
    }
}
