//! Recorder forwarding to the `metrics` crate facade.

use super::recorder::{
    AttemptOutcome, MetricsRecorder, CIRCUIT_OPENS_METRIC, CIRCUIT_REJECTIONS_METRIC,
    STAGE_DURATION_METRIC, STAGE_FALLBACKS_METRIC, STAGE_RETRIES_METRIC, STAGE_TIMEOUTS_METRIC,
};
use crate::errors::ErrorKind;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Duration;

/// Forwards executor metrics to the globally installed `metrics` recorder.
///
/// Without an installed exporter every call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFacadeRecorder;

impl MetricsFacadeRecorder {
    /// Creates the recorder and registers metric descriptions.
    #[must_use]
    pub fn new() -> Self {
        describe_histogram!(
            STAGE_DURATION_METRIC,
            Unit::Seconds,
            "Latency of each node invocation."
        );
        describe_counter!(
            STAGE_RETRIES_METRIC,
            Unit::Count,
            "Retries scheduled after a retryable node failure."
        );
        describe_counter!(
            STAGE_TIMEOUTS_METRIC,
            Unit::Count,
            "Node invocations that exceeded the stage timeout."
        );
        describe_counter!(
            CIRCUIT_OPENS_METRIC,
            Unit::Count,
            "Circuit breaker transitions to open."
        );
        describe_counter!(
            CIRCUIT_REJECTIONS_METRIC,
            Unit::Count,
            "Calls rejected by an open circuit breaker."
        );
        describe_counter!(
            STAGE_FALLBACKS_METRIC,
            Unit::Count,
            "Attempts made on fallback nodes."
        );
        Self
    }
}

impl MetricsRecorder for MetricsFacadeRecorder {
    fn record_stage_duration(
        &self,
        stage: &str,
        node: &str,
        outcome: AttemptOutcome,
        duration: Duration,
    ) {
        histogram!(
            STAGE_DURATION_METRIC,
            "stage" => stage.to_string(),
            "node" => node.to_string(),
            "outcome" => outcome.as_str()
        )
        .record(duration.as_secs_f64());
    }

    fn increment_retry(&self, stage: &str, kind: ErrorKind) {
        counter!(
            STAGE_RETRIES_METRIC,
            "stage" => stage.to_string(),
            "kind" => kind.as_str()
        )
        .increment(1);
    }

    fn increment_timeout(&self, stage: &str) {
        counter!(STAGE_TIMEOUTS_METRIC, "stage" => stage.to_string()).increment(1);
    }

    fn increment_circuit_open(&self, stage: &str, node: &str) {
        counter!(
            CIRCUIT_OPENS_METRIC,
            "stage" => stage.to_string(),
            "node" => node.to_string()
        )
        .increment(1);
    }

    fn increment_circuit_rejection(&self, stage: &str, node: &str) {
        counter!(
            CIRCUIT_REJECTIONS_METRIC,
            "stage" => stage.to_string(),
            "node" => node.to_string()
        )
        .increment(1);
    }

    fn increment_fallback(&self, stage: &str, node: &str) {
        counter!(
            STAGE_FALLBACKS_METRIC,
            "stage" => stage.to_string(),
            "node" => node.to_string()
        )
        .increment(1);
    }
}
