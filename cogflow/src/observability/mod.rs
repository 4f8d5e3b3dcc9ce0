//! Metrics and logging.

mod facade;
mod logging;
mod recorder;

pub use facade::MetricsFacadeRecorder;
pub use logging::{init_tracing, init_tracing_with_filter, LogFormat, DEFAULT_LOG_FILTER};
pub use recorder::{
    AttemptOutcome, CounterSample, HistogramSample, InMemoryMetrics, MetricsRecorder,
    MetricsSnapshot, NoOpMetrics, CIRCUIT_OPENS_METRIC, CIRCUIT_REJECTIONS_METRIC,
    DURATION_BUCKETS, STAGE_DURATION_METRIC, STAGE_FALLBACKS_METRIC, STAGE_RETRIES_METRIC,
    STAGE_TIMEOUTS_METRIC,
};
