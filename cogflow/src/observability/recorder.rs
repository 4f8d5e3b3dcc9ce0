//! Stage metrics recording.
//!
//! The executor reports every node invocation through a [`MetricsRecorder`].
//! [`InMemoryMetrics`] keeps the series in process for dashboards and tests;
//! [`super::MetricsFacadeRecorder`] forwards to whatever exporter the host
//! installed for the `metrics` crate.

use crate::errors::ErrorKind;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Node call latency histogram, labeled by (stage, node, outcome).
pub const STAGE_DURATION_METRIC: &str = "cogflow_stage_duration_seconds";
/// Retry counter, labeled by (stage, kind).
pub const STAGE_RETRIES_METRIC: &str = "cogflow_stage_retries_total";
/// Timeout counter, labeled by stage.
pub const STAGE_TIMEOUTS_METRIC: &str = "cogflow_stage_timeouts_total";
/// Breaker open transitions, labeled by (stage, node).
pub const CIRCUIT_OPENS_METRIC: &str = "cogflow_circuit_opens_total";
/// Calls rejected by an open breaker, labeled by (stage, node).
pub const CIRCUIT_REJECTIONS_METRIC: &str = "cogflow_circuit_rejections_total";
/// Fallback attempts, labeled by (stage, fallback node).
pub const STAGE_FALLBACKS_METRIC: &str = "cogflow_stage_fallbacks_total";

/// Histogram bucket upper bounds in seconds.
pub const DURATION_BUCKETS: [f64; 12] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Outcome label of a single node invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The node returned output.
    Success,
    /// The call exceeded the stage timeout.
    Timeout,
    /// The node returned a transient failure.
    TransientError,
    /// The node returned a terminal failure.
    TerminalError,
    /// The run was cancelled while the call was in flight.
    Cancelled,
}

impl AttemptOutcome {
    /// Returns the label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::TransientError => "transient_error",
            Self::TerminalError => "terminal_error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for executor metrics.
pub trait MetricsRecorder: Send + Sync {
    /// Records the latency of one node invocation.
    fn record_stage_duration(
        &self,
        stage: &str,
        node: &str,
        outcome: AttemptOutcome,
        duration: Duration,
    );

    /// Counts a retry scheduled after a failure of `kind`.
    fn increment_retry(&self, stage: &str, kind: ErrorKind);

    /// Counts a node call that hit the stage timeout.
    fn increment_timeout(&self, stage: &str);

    /// Counts a breaker moving to open.
    fn increment_circuit_open(&self, stage: &str, node: &str);

    /// Counts a call rejected by an open breaker.
    fn increment_circuit_rejection(&self, stage: &str, node: &str);

    /// Counts an attempt on a fallback node.
    fn increment_fallback(&self, stage: &str, node: &str);
}

/// Recorder that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl MetricsRecorder for NoOpMetrics {
    fn record_stage_duration(&self, _: &str, _: &str, _: AttemptOutcome, _: Duration) {}
    fn increment_retry(&self, _: &str, _: ErrorKind) {}
    fn increment_timeout(&self, _: &str) {}
    fn increment_circuit_open(&self, _: &str, _: &str) {}
    fn increment_circuit_rejection(&self, _: &str, _: &str) {}
    fn increment_fallback(&self, _: &str, _: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct SeriesKey {
    name: &'static str,
    labels: Vec<(&'static str, String)>,
}

impl SeriesKey {
    fn new(name: &'static str, labels: &[(&'static str, &str)]) -> Self {
        Self {
            name,
            labels: labels.iter().map(|(k, v)| (*k, (*v).to_string())).collect(),
        }
    }

    fn matches(&self, name: &str, filter: &[(&str, &str)]) -> bool {
        self.name == name
            && filter
                .iter()
                .all(|(k, v)| self.labels.iter().any(|(lk, lv)| lk == k && lv == v))
    }

    fn label_map(&self) -> BTreeMap<String, String> {
        self.labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct HistogramState {
    buckets: [u64; DURATION_BUCKETS.len()],
    count: u64,
    sum: f64,
}

impl Default for HistogramState {
    fn default() -> Self {
        Self {
            buckets: [0; DURATION_BUCKETS.len()],
            count: 0,
            sum: 0.0,
        }
    }
}

impl HistogramState {
    fn observe(&mut self, seconds: f64) {
        if let Some(idx) = DURATION_BUCKETS.iter().position(|bound| seconds <= *bound) {
            self.buckets[idx] += 1;
        }
        self.count += 1;
        self.sum += seconds;
    }
}

/// One counter series in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSample {
    /// Metric name.
    pub name: String,
    /// Label set.
    pub labels: BTreeMap<String, String>,
    /// Current value.
    pub value: u64,
}

/// One histogram series in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSample {
    /// Metric name.
    pub name: String,
    /// Label set.
    pub labels: BTreeMap<String, String>,
    /// Number of observations.
    pub count: u64,
    /// Sum of observations in seconds.
    pub sum: f64,
    /// Cumulative `(upper_bound, count)` pairs.
    pub buckets: Vec<(f64, u64)>,
}

/// Serializable copy of every series, sorted by name then labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counter series.
    pub counters: Vec<CounterSample>,
    /// Histogram series.
    pub histograms: Vec<HistogramSample>,
}

/// In-process recorder with per-series counters and fixed-bucket histograms.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<SeriesKey, u64>,
    histograms: DashMap<SeriesKey, HistogramState>,
}

impl InMemoryMetrics {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn increment(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        *self.counters.entry(SeriesKey::new(name, labels)).or_insert(0) += 1;
    }

    /// Sums every counter series of `name` whose labels include `filter`.
    #[must_use]
    pub fn counter(&self, name: &str, filter: &[(&str, &str)]) -> u64 {
        self.counters
            .iter()
            .filter(|entry| entry.key().matches(name, filter))
            .map(|entry| *entry.value())
            .sum()
    }

    /// Counts histogram observations of `name` whose labels include `filter`.
    #[must_use]
    pub fn observations(&self, name: &str, filter: &[(&str, &str)]) -> u64 {
        self.histograms
            .iter()
            .filter(|entry| entry.key().matches(name, filter))
            .map(|entry| entry.value().count)
            .sum()
    }

    /// Retries recorded for a stage, all kinds.
    #[must_use]
    pub fn retries(&self, stage: &str) -> u64 {
        self.counter(STAGE_RETRIES_METRIC, &[("stage", stage)])
    }

    /// Timeouts recorded for a stage.
    #[must_use]
    pub fn timeouts(&self, stage: &str) -> u64 {
        self.counter(STAGE_TIMEOUTS_METRIC, &[("stage", stage)])
    }

    /// Breaker opens recorded for (stage, node).
    #[must_use]
    pub fn circuit_opens(&self, stage: &str, node: &str) -> u64 {
        self.counter(CIRCUIT_OPENS_METRIC, &[("stage", stage), ("node", node)])
    }

    /// Breaker rejections recorded for (stage, node).
    #[must_use]
    pub fn circuit_rejections(&self, stage: &str, node: &str) -> u64 {
        self.counter(CIRCUIT_REJECTIONS_METRIC, &[("stage", stage), ("node", node)])
    }

    /// Fallback attempts recorded for a stage.
    #[must_use]
    pub fn fallbacks(&self, stage: &str) -> u64 {
        self.counter(STAGE_FALLBACKS_METRIC, &[("stage", stage)])
    }

    /// Node invocations recorded for a stage.
    #[must_use]
    pub fn invocations(&self, stage: &str) -> u64 {
        self.observations(STAGE_DURATION_METRIC, &[("stage", stage)])
    }

    /// Takes a sorted, serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut counters: Vec<(SeriesKey, u64)> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        counters.sort_by(|a, b| a.0.cmp(&b.0));

        let mut histograms: Vec<(SeriesKey, HistogramState)> = self
            .histograms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));

        MetricsSnapshot {
            counters: counters
                .into_iter()
                .map(|(key, value)| CounterSample {
                    name: key.name.to_string(),
                    labels: key.label_map(),
                    value,
                })
                .collect(),
            histograms: histograms
                .into_iter()
                .map(|(key, state)| {
                    let mut cumulative = 0;
                    let buckets = DURATION_BUCKETS
                        .iter()
                        .zip(state.buckets.iter())
                        .map(|(bound, count)| {
                            cumulative += count;
                            (*bound, cumulative)
                        })
                        .collect();
                    HistogramSample {
                        name: key.name.to_string(),
                        labels: key.label_map(),
                        count: state.count,
                        sum: state.sum,
                        buckets,
                    }
                })
                .collect(),
        }
    }

    /// Clears every series.
    pub fn reset(&self) {
        self.counters.clear();
        self.histograms.clear();
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn record_stage_duration(
        &self,
        stage: &str,
        node: &str,
        outcome: AttemptOutcome,
        duration: Duration,
    ) {
        let key = SeriesKey::new(
            STAGE_DURATION_METRIC,
            &[("stage", stage), ("node", node), ("outcome", outcome.as_str())],
        );
        self.histograms
            .entry(key)
            .or_default()
            .observe(duration.as_secs_f64());
    }

    fn increment_retry(&self, stage: &str, kind: ErrorKind) {
        self.increment(STAGE_RETRIES_METRIC, &[("stage", stage), ("kind", kind.as_str())]);
    }

    fn increment_timeout(&self, stage: &str) {
        self.increment(STAGE_TIMEOUTS_METRIC, &[("stage", stage)]);
    }

    fn increment_circuit_open(&self, stage: &str, node: &str) {
        self.increment(CIRCUIT_OPENS_METRIC, &[("stage", stage), ("node", node)]);
    }

    fn increment_circuit_rejection(&self, stage: &str, node: &str) {
        self.increment(CIRCUIT_REJECTIONS_METRIC, &[("stage", stage), ("node", node)]);
    }

    fn increment_fallback(&self, stage: &str, node: &str) {
        self.increment(STAGE_FALLBACKS_METRIC, &[("stage", stage), ("node", node)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_noop_metrics() {
        let metrics = NoOpMetrics;
        metrics.increment_retry("s", ErrorKind::TransientError);
        metrics.record_stage_duration("s", "n", AttemptOutcome::Success, Duration::ZERO);
        // Should not panic
    }

    #[test]
    fn test_counters_by_label() {
        let metrics = InMemoryMetrics::new();
        metrics.increment_retry("memory", ErrorKind::TransientError);
        metrics.increment_retry("memory", ErrorKind::StageTimeout);
        metrics.increment_retry("intent", ErrorKind::TransientError);
        metrics.increment_timeout("memory");

        assert_eq!(metrics.retries("memory"), 2);
        assert_eq!(metrics.retries("intent"), 1);
        assert_eq!(
            metrics.counter(
                STAGE_RETRIES_METRIC,
                &[("stage", "memory"), ("kind", "stage_timeout")]
            ),
            1
        );
        assert_eq!(metrics.timeouts("memory"), 1);
        assert_eq!(metrics.timeouts("intent"), 0);
    }

    #[test]
    fn test_circuit_counters_are_separate() {
        let metrics = InMemoryMetrics::new();
        metrics.increment_circuit_open("s", "n");
        metrics.increment_circuit_rejection("s", "n");
        metrics.increment_circuit_rejection("s", "n");

        assert_eq!(metrics.circuit_opens("s", "n"), 1);
        assert_eq!(metrics.circuit_rejections("s", "n"), 2);
    }

    #[test]
    fn test_histogram_snapshot() {
        let metrics = InMemoryMetrics::new();
        metrics.record_stage_duration("s", "n", AttemptOutcome::Success, Duration::from_millis(3));
        metrics.record_stage_duration("s", "n", AttemptOutcome::Success, Duration::from_millis(200));
        metrics.record_stage_duration("s", "n", AttemptOutcome::Timeout, Duration::from_secs(1));

        assert_eq!(metrics.invocations("s"), 3);
        assert_eq!(
            metrics.observations(STAGE_DURATION_METRIC, &[("outcome", "timeout")]),
            1
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.histograms.len(), 2);
        let success = &snapshot.histograms[0];
        assert_eq!(success.labels.get("outcome").map(String::as_str), Some("success"));
        assert_eq!(success.count, 2);
        assert_eq!(success.buckets[0], (0.005, 1));
        assert_eq!(success.buckets.last().map(|b| b.1), Some(2));
    }

    #[test]
    fn test_snapshot_serializes_and_reset() {
        let metrics = InMemoryMetrics::new();
        metrics.increment_fallback("decision", "heuristic_node");

        let value = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(value["counters"][0]["name"], STAGE_FALLBACKS_METRIC);
        assert_eq!(value["counters"][0]["labels"]["node"], "heuristic_node");

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
