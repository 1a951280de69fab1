//! Process-wide error intelligence.
//!
//! [`ErrorIntelligence`] keeps a bounded history of [`ErrorRecord`]s (fed by
//! recovery-wrapper escalations and agent-level failures) and of outcome
//! samples (fed by every observed envelope). It turns them into recurring
//! failure patterns and success-rate trends.
//!
//! Nothing here fails observably: malformed input is normalized and logged,
//! lock poisoning is recovered, and a full history overwrites its oldest
//! entry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::{ErrorKind, Result, ResultEnvelope, VigilError};
use crate::logging::ComponentLogger;
use crate::ring::RingBuffer;

/// Source name substituted for blank sources.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Threshold/window pair for recurrence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub threshold: u32,
    pub window: Duration,
}

impl RecurrenceRule {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self { threshold, window }
    }
}

impl Default for RecurrenceRule {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// One failure observation. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_kind: ErrorKind,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Failures grouped by `(error_kind, source)` within a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub error_kind: ErrorKind,
    pub source: String,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct OutcomeSample {
    source: String,
    success: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct History {
    errors: RingBuffer<ErrorRecord>,
    outcomes: RingBuffer<OutcomeSample>,
}

/// Bounded, shareable error history.
#[derive(Debug)]
pub struct ErrorIntelligence {
    history: Mutex<History>,
    retention: Option<chrono::Duration>,
    logger: Option<ComponentLogger>,
}

impl ErrorIntelligence {
    /// Create an aggregator holding at most `capacity` error records (and as
    /// many outcome samples).
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(VigilError::InvalidInput(
                "error intelligence capacity must be > 0".to_string(),
            ));
        }
        Ok(Self {
            history: Mutex::new(History {
                errors: RingBuffer::new(capacity),
                outcomes: RingBuffer::new(capacity),
            }),
            retention: None,
            logger: None,
        })
    }

    /// Prune entries older than `retention` relative to the newest insert.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = chrono::Duration::from_std(retention).ok();
        self
    }

    pub fn with_logger(mut self, logger: ComponentLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    fn lock(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().errors.capacity()
    }

    pub fn len(&self) -> usize {
        self.lock().errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().errors.is_empty()
    }

    /// Snapshot of the error history, oldest first.
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.lock().errors.iter().cloned().collect()
    }

    /// Append an error record stamped now.
    pub fn record(&self, error_kind: ErrorKind, source: &str, message: &str) {
        self.record_at(error_kind, source, message, Utc::now());
    }

    /// Append an error record with an explicit timestamp.
    pub fn record_at(
        &self,
        error_kind: ErrorKind,
        source: &str,
        message: &str,
        timestamp: DateTime<Utc>,
    ) {
        let source = self.normalize_source(source, "record");
        let record = ErrorRecord {
            error_kind,
            source,
            timestamp,
            message: message.to_string(),
        };

        let evicted = {
            let mut history = self.lock();
            if let Some(cutoff) = self.retention_cutoff(timestamp) {
                history.errors.drop_front_while(|r| r.timestamp < cutoff);
            }
            history.errors.push(record)
        };

        if let (Some(old), Some(log)) = (evicted, &self.logger) {
            log.debug(
                "error history full; oldest record overwritten",
                json!({ "evicted_kind": old.error_kind, "evicted_source": old.source }),
            );
        }
    }

    /// Track the outcome of one envelope for success-rate trends.
    pub fn observe(&self, envelope: &ResultEnvelope) {
        let source = self.normalize_source(envelope.source(), "observe");
        let timestamp = envelope.timestamp();
        let mut history = self.lock();
        if let Some(cutoff) = self.retention_cutoff(timestamp) {
            history.outcomes.drop_front_while(|s| s.timestamp < cutoff);
        }
        history.outcomes.push(OutcomeSample {
            source,
            success: envelope.is_success(),
            timestamp,
        });
    }

    /// Patterns within the trailing `window`, most frequent first.
    pub fn patterns(&self, window: Duration) -> std::vec::IntoIter<ErrorPattern> {
        self.patterns_at(window, Utc::now())
    }

    /// Patterns within `[now - window, now]`.
    ///
    /// Ordered by count descending, then by most recent `last_seen`. Every
    /// call recomputes over the current history.
    pub fn patterns_at(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> std::vec::IntoIter<ErrorPattern> {
        let start = window_start(now, window);
        let mut groups: HashMap<(ErrorKind, String), ErrorPattern> = HashMap::new();
        {
            let history = self.lock();
            for r in history
                .errors
                .iter()
                .filter(|r| in_window(r.timestamp, start, now))
            {
                groups
                    .entry((r.error_kind, r.source.clone()))
                    .and_modify(|p| {
                        p.count += 1;
                        p.first_seen = p.first_seen.min(r.timestamp);
                        p.last_seen = p.last_seen.max(r.timestamp);
                    })
                    .or_insert_with(|| ErrorPattern {
                        error_kind: r.error_kind,
                        source: r.source.clone(),
                        count: 1,
                        first_seen: r.timestamp,
                        last_seen: r.timestamp,
                    });
            }
        }

        let mut patterns: Vec<ErrorPattern> = groups.into_values().collect();
        patterns.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.error_kind.cmp(&b.error_kind))
                .then_with(|| a.source.cmp(&b.source))
        });
        patterns.into_iter()
    }

    /// Whether `(error_kind, source)` occurred at least `threshold` times in
    /// the trailing `window`.
    pub fn is_recurring(
        &self,
        error_kind: ErrorKind,
        source: &str,
        threshold: u32,
        window: Duration,
    ) -> bool {
        self.is_recurring_at(error_kind, source, threshold, window, Utc::now())
    }

    pub fn is_recurring_at(
        &self,
        error_kind: ErrorKind,
        source: &str,
        threshold: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let source = canonical_source(source);
        let start = window_start(now, window);
        let count = self
            .lock()
            .errors
            .iter()
            .filter(|r| r.error_kind == error_kind && r.source == source)
            .filter(|r| in_window(r.timestamp, start, now))
            .count();
        count >= threshold as usize
    }

    /// [`is_recurring`](Self::is_recurring) against a [`RecurrenceRule`].
    pub fn matches_rule(&self, error_kind: ErrorKind, source: &str, rule: &RecurrenceRule) -> bool {
        self.is_recurring(error_kind, source, rule.threshold, rule.window)
    }

    /// Fraction of successful outcomes for `source` in the trailing window.
    pub fn success_rate(&self, source: &str, window: Duration) -> Option<f64> {
        self.success_rate_at(source, window, Utc::now())
    }

    pub fn success_rate_at(
        &self,
        source: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let source = canonical_source(source);
        let start = window_start(now, window);
        let history = self.lock();
        rate(
            history
                .outcomes
                .iter()
                .filter(|s| s.source == source && in_window(s.timestamp, start, now)),
        )
    }

    /// True when the newer half of the window has a strictly lower success
    /// rate than the older half. Both halves need at least one sample.
    pub fn is_degrading(&self, source: &str, window: Duration) -> bool {
        self.is_degrading_at(source, window, Utc::now())
    }

    pub fn is_degrading_at(&self, source: &str, window: Duration, now: DateTime<Utc>) -> bool {
        let source = canonical_source(source);
        let Some(start) = window_start(now, window) else {
            return false;
        };
        let Some(mid) = window_start(now, window / 2) else {
            return false;
        };

        let history = self.lock();
        let samples: Vec<&OutcomeSample> = history
            .outcomes
            .iter()
            .filter(|s| s.source == source && in_window(s.timestamp, Some(start), now))
            .collect();
        let older = rate(samples.iter().copied().filter(|s| s.timestamp < mid));
        let newer = rate(samples.iter().copied().filter(|s| s.timestamp >= mid));
        matches!((older, newer), (Some(o), Some(n)) if n < o)
    }

    fn retention_cutoff(&self, newest: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.retention
            .and_then(|retention| newest.checked_sub_signed(retention))
    }

    fn normalize_source(&self, source: &str, op: &str) -> String {
        if source.trim().is_empty() {
            if let Some(log) = &self.logger {
                log.warn(
                    "blank source normalized",
                    json!({ "operation": op, "source": UNKNOWN_SOURCE }),
                );
            }
        }
        canonical_source(source).to_string()
    }
}

/// Key under which `source` is stored and queried: trimmed, blank as
/// [`UNKNOWN_SOURCE`].
fn canonical_source(source: &str) -> &str {
    match source.trim() {
        "" => UNKNOWN_SOURCE,
        trimmed => trimmed,
    }
}

fn rate<'a>(samples: impl Iterator<Item = &'a OutcomeSample>) -> Option<f64> {
    let (total, ok) = samples.fold((0usize, 0usize), |(t, ok), s| {
        (t + 1, ok + usize::from(s.success))
    });
    (total > 0).then(|| ok as f64 / total as f64)
}

/// Lower window bound; `None` when the window reaches past representable time.
fn window_start(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
}

fn in_window(ts: DateTime<Utc>, start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    start.map_or(true, |s| ts >= s) && ts <= now
}
