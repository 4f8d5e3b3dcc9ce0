//! # Cogflow
//!
//! A staged, asynchronous cognitive pipeline orchestrator.
//!
//! Cogflow runs a fixed sequence of pluggable nodes against a shared request
//! context, with support for:
//!
//! - **Resilient stages**: per-stage timeouts, jittered retries and fallback nodes
//! - **Circuit breaking**: per (stage, node) breakers with a single recovery probe
//! - **Parallel batches**: bounded concurrent execution over read-only snapshots
//! - **Arbitration**: an ethics gate plus score ranking over competing proposals
//! - **Oscillation detection**: a meta-controller watching the decision stream
//! - **Observability**: latency histograms, retry/timeout/breaker counters and events
//! - **Cancellation**: one cooperative token per run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cogflow::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(
//!     NodeRegistry::new()
//!         .with_node("memory_node", Arc::new(MemoryNode::default()))
//!         .with_node("intent_node", Arc::new(IntentNode::default())),
//! );
//!
//! let orchestrator = Orchestrator::new(OrchestratorConfig::from_env()?, registry);
//! orchestrator.configure_stages(vec![
//!     StageConfig::new("memory"),
//!     StageConfig::new("intent").with_fallback("keyword_intent_node"),
//! ])?;
//!
//! let result = orchestrator.process_query(request).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod arbitration;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod nodes;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::arbitration::{ArbitrationOutcome, Arbitrator, MetaController, Proposal};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{OrchestratorConfig, StageOverride};
    pub use crate::context::{context_from_pairs, ContextMap, ExecutionContext};
    pub use crate::errors::{
        ConfigError, DiscoveryError, ErrorKind, NodeError, OrchestratorError, StageError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::nodes::{CognitiveNode, DiscoveryConfig, FnNode, NodeCatalog, NodeRegistry};
    pub use crate::observability::{
        init_tracing, InMemoryMetrics, LogFormat, MetricsFacadeRecorder, MetricsRecorder,
    };
    pub use crate::orchestrator::Orchestrator;
    pub use crate::pipeline::{
        BreakerConfig, EscalationReason, ExecutionMode, PipelineResult, StageConfig,
        StageResult, StageStatus,
    };
}
