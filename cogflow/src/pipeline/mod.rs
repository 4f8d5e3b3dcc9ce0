//! Stage configuration and execution.
//!
//! This module provides:
//! - Stage specifications and validation
//! - Retry policy with jittered exponential backoff
//! - Per (stage, node) circuit breakers
//! - The stage executor and batch planner
//! - Stage and pipeline result types

mod batch;
mod circuit_breaker;
mod config;
mod executor;
mod result;
mod retry;

pub use batch::{plan_batches, StageBatch};
pub use circuit_breaker::{
    BreakerAdmission, BreakerConfig, BreakerSnapshot, BreakerStatus, BreakerTransition,
    CircuitBreakerRegistry, ProbeGuard,
};
pub use config::{validate_stages, StageConfig, NODE_NAME_SUFFIX};
pub use executor::{StageExecution, StageExecutor};
pub use result::{EscalationReason, ExecutionMode, PipelineResult, StageResult, StageStatus};
pub use retry::{cancellable_sleep, JitterStrategy, RetryDecision, RetryPolicy, SleepOutcome};
