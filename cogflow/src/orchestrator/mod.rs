//! The orchestrator facade.
//!
//! [`Orchestrator`] owns the stage definition and the long-lived state shared
//! across runs (circuit breakers, the meta-controller, metrics) and exposes
//! the sequential, parallel, adaptive and arbitration entry points. No entry
//! point returns an error: every failure resolves to a [`PipelineResult`].


use crate::arbitration::{Arbitrator, MetaController, Proposal};
use crate::cancellation::CancellationToken;
use crate::config::OrchestratorConfig;
use crate::context::{ContextMap, ExecutionContext};
use crate::errors::OrchestratorError;
use crate::events::{self, EventSink, NoOpEventSink, ARBITRATION_DECIDED, PIPELINE_STARTED};
use crate::nodes::{DiscoveryReport, NodeCatalog, NodeRegistry};
use crate::observability::{InMemoryMetrics, MetricsRecorder};
use crate::pipeline::{
    plan_batches, validate_stages, BreakerSnapshot, CircuitBreakerRegistry, EscalationReason,
    ExecutionMode, PipelineResult, StageConfig, StageExecution, StageExecutor, StageStatus,
};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs configured stages against registered nodes.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<NodeRegistry>,
    stages: RwLock<Arc<Vec<StageConfig>>>,
    breakers: Arc<CircuitBreakerRegistry>,
    meta: Mutex<MetaController>,
    metrics: Arc<dyn MetricsRecorder>,
    in_memory: Option<Arc<InMemoryMetrics>>,
    events: Arc<dyn EventSink>,
    arbitrator: Arbitrator,
    executor: StageExecutor,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("enabled", &self.config.enabled)
            .field("stages", &self.stage_names())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with in-memory metrics and no event sink.
    #[must_use]
    pub fn new(config: OrchestratorConfig, registry: Arc<NodeRegistry>) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker));
        let in_memory = Arc::new(InMemoryMetrics::new());
        let metrics: Arc<dyn MetricsRecorder> = in_memory.clone();
        let executor = StageExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&breakers),
            Arc::clone(&metrics),
            config.retry_policy(),
        );

        Self {
            meta: Mutex::new(MetaController::new(config.oscillation_window)),
            arbitrator: config.arbitrator(),
            config,
            registry,
            stages: RwLock::new(Arc::new(Vec::new())),
            breakers,
            metrics,
            in_memory: Some(in_memory),
            events: Arc::new(NoOpEventSink),
            executor,
        }
    }

    /// Validates `config`, runs discovery against `catalog` and creates the
    /// orchestrator.
    ///
    /// Discovery is fail-closed: if any requested node could not be
    /// constructed the orchestrator is not created.
    pub async fn bootstrap(
        config: OrchestratorConfig,
        registry: Arc<NodeRegistry>,
        catalog: &NodeCatalog,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let orchestrator = Self::new(config, registry);
        let report = orchestrator.discover(catalog).await;
        if let Some(rejected) = report.rejected.into_iter().next() {
            return Err(rejected.into());
        }
        Ok(orchestrator)
    }

    /// Replaces the metrics recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self.in_memory = None;
        self.rebuild_executor();
        self
    }

    /// Uses an in-memory recorder that stays readable through
    /// [`Orchestrator::in_memory_metrics`].
    #[must_use]
    pub fn with_in_memory_metrics(mut self, metrics: Arc<InMemoryMetrics>) -> Self {
        self.metrics = metrics.clone();
        self.in_memory = Some(metrics);
        self.rebuild_executor();
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    fn rebuild_executor(&mut self) {
        self.executor = StageExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.breakers),
            Arc::clone(&self.metrics),
            self.config.retry_policy(),
        );
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the node registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Returns the in-memory metrics, unless a custom recorder was installed.
    #[must_use]
    pub fn in_memory_metrics(&self) -> Option<&Arc<InMemoryMetrics>> {
        self.in_memory.as_ref()
    }

    /// Returns the current stage definition.
    #[must_use]
    pub fn stages(&self) -> Arc<Vec<StageConfig>> {
        Arc::clone(&self.stages.read())
    }

    fn stage_names(&self) -> Vec<String> {
        self.stages.read().iter().map(|s| s.name.clone()).collect()
    }

    /// Returns a snapshot of every tracked circuit breaker.
    #[must_use]
    pub fn breaker_states(&self) -> Vec<BreakerSnapshot> {
        self.breakers.states()
    }

    /// Replaces the stage definition.
    ///
    /// Applies configured per-stage overrides and clears breaker and
    /// oscillation state, so configuring the same list twice behaves the
    /// same as configuring it once. Nodes are not contacted.
    pub fn configure_stages(&self, stages: Vec<StageConfig>) -> Result<(), OrchestratorError> {
        validate_stages(&stages)?;
        let stages = self.config.apply_overrides(stages);
        validate_stages(&stages)?;

        let unresolved: Vec<String> = stages
            .iter()
            .map(StageConfig::primary_node)
            .filter(|node| !self.registry.contains(node))
            .collect();
        if !unresolved.is_empty() {
            debug!(nodes = ?unresolved, "Configured stages reference unregistered nodes");
        }

        info!(stages = stages.len(), "Configured pipeline stages");
        *self.stages.write() = Arc::new(stages);
        self.breakers.reset();
        self.meta.lock().reset();
        Ok(())
    }

    /// Constructs and registers the nodes named by the discovery settings.
    pub async fn discover(&self, catalog: &NodeCatalog) -> DiscoveryReport {
        catalog.discover(&self.registry, &self.config.discovery).await
    }

    /// Runs all stages in order with a fresh cancellation token.
    pub async fn process_query(&self, context: ContextMap) -> PipelineResult {
        self.process_query_with_token(context, &CancellationToken::new())
            .await
    }

    /// Runs all stages in order.
    ///
    /// `error`, `timeout` and `cancelled` stages halt the run; `skipped`
    /// stages contribute nothing and the run continues.
    pub async fn process_query_with_token(
        &self,
        context: ContextMap,
        token: &CancellationToken,
    ) -> PipelineResult {
        if !self.config.enabled {
            return self.disabled(ExecutionMode::Sequential);
        }

        let stages = self.stages();
        let started = Instant::now();
        let mut result = PipelineResult::new(ExecutionMode::Sequential);
        let mut context = ExecutionContext::new(context);
        self.emit_started(&result, &stages).await;

        for stage in stages.iter() {
            let execution = self.executor.execute(stage, context.data(), token).await;
            let status = execution.result.status;
            self.absorb(&mut result, &mut context, execution).await;

            if let Some(reason) = status.escalation() {
                info!(stage = %stage.name, %status, "Pipeline halted");
                result = result.escalate(reason);
                break;
            }
        }

        self.finish(result, context, started).await
    }

    /// Runs stages in concurrent batches with a fresh cancellation token.
    pub async fn process_query_parallel(&self, context: ContextMap) -> PipelineResult {
        self.process_query_parallel_with_token(context, &CancellationToken::new())
            .await
    }

    /// Runs stages in concurrent batches.
    ///
    /// Siblings read the context as it stood before their batch and their
    /// outputs are merged in configured order once the whole batch is done.
    /// A halting sibling does not stop the rest of its batch, but no later
    /// batch starts.
    pub async fn process_query_parallel_with_token(
        &self,
        context: ContextMap,
        token: &CancellationToken,
    ) -> PipelineResult {
        if !self.config.enabled {
            return self.disabled(ExecutionMode::Parallel);
        }

        let stages = self.stages();
        let started = Instant::now();
        let mut result = PipelineResult::new(ExecutionMode::Parallel);
        let mut context = ExecutionContext::new(context);
        self.emit_started(&result, &stages).await;

        for batch in plan_batches(&stages, self.config.max_parallel_stages) {
            debug!(batch = batch.index, stages = ?batch.names(), "Starting batch");
            let snapshot = context.snapshot();
            let executions = join_all(
                batch
                    .stages
                    .iter()
                    .map(|stage| self.executor.execute(stage, &snapshot, token)),
            )
            .await;

            let mut halt: Option<(String, StageStatus)> = None;
            for execution in executions {
                let status = execution.result.status;
                if halt.is_none() && status.halts() {
                    halt = Some((execution.result.stage.clone(), status));
                }
                self.absorb(&mut result, &mut context, execution).await;
            }

            if let Some((stage, status)) = halt {
                if let Some(reason) = status.escalation() {
                    info!(stage = %stage, %status, batch = batch.index, "Pipeline halted");
                    result = result.escalate(reason);
                }
                break;
            }
        }

        self.finish(result, context, started).await
    }

    /// Picks sequential or parallel execution with a fresh cancellation token.
    pub async fn process_adaptive(&self, context: ContextMap) -> PipelineResult {
        self.process_adaptive_with_token(context, &CancellationToken::new())
            .await
    }

    /// Runs in parallel when the input's complexity exceeds the adaptive
    /// threshold, otherwise sequentially.
    pub async fn process_adaptive_with_token(
        &self,
        context: ContextMap,
        token: &CancellationToken,
    ) -> PipelineResult {
        if !self.config.enabled {
            return self.disabled(ExecutionMode::Sequential);
        }

        if self.prefers_parallel(&context) {
            self.process_query_parallel_with_token(context, token).await
        } else {
            self.process_query_with_token(context, token).await
        }
    }

    /// Complexity score used by adaptive mode.
    ///
    /// The character count of the configured input key when it holds a
    /// string, otherwise the length of the serialized context.
    #[must_use]
    pub fn complexity(&self, context: &ContextMap) -> usize {
        match context
            .get(&self.config.adaptive_input_key)
            .and_then(serde_json::Value::as_str)
        {
            Some(text) => text.chars().count(),
            None => serde_json::to_string(context).map_or(0, |s| s.chars().count()),
        }
    }

    /// Returns true if adaptive mode would run `context` in parallel.
    #[must_use]
    pub fn prefers_parallel(&self, context: &ContextMap) -> bool {
        self.complexity(context) > self.config.adaptive_threshold
    }

    /// Arbitrates among proposals and checks the decision stream for
    /// oscillation.
    ///
    /// A decision that completes an A,B,A,B pattern turns the result into a
    /// failure with `oscillation_detected`. Human escalations are not fed to
    /// the meta-controller.
    pub async fn arbitrate(&self, proposals: Vec<Proposal>) -> PipelineResult {
        if !self.config.enabled {
            return self.disabled(ExecutionMode::Arbitration);
        }

        let started = Instant::now();
        let total = proposals.len();
        let outcome = self.arbitrator.arbitrate(proposals);
        let blocked = outcome.blocked.clone();
        let oscillating = !outcome.requires_human() && self.meta.lock().observe(&outcome.decision);

        let mut result = outcome.into_pipeline_result();
        if oscillating {
            warn!(decision = ?result.decision, "Decision oscillation detected");
            let rationale = format!(
                "{}; decision history alternates between two outcomes",
                result.rationale.as_deref().unwrap_or_default()
            );
            result = result
                .escalate(EscalationReason::OscillationDetected)
                .with_rationale(rationale);
        }
        result.duration = started.elapsed();

        self.events
            .emit(
                ARBITRATION_DECIDED,
                Some(json!({
                    "run_id": result.run_id.to_string(),
                    "decision": result.decision,
                    "proposals": total,
                    "blocked": blocked,
                    "escalation_reason": result.escalation_reason.map(|r| r.as_str()),
                })),
            )
            .await;
        info!(
            decision = ?result.decision,
            success = result.success,
            escalation = ?result.escalation_reason,
            "Arbitration finished"
        );
        result
    }

    /// Feeds a decision label to the meta-controller.
    ///
    /// Returns true if the label completes an oscillation. Always false
    /// while the kill switch is off.
    pub fn observe_outcome(&self, label: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        self.meta.lock().observe(label)
    }

    fn disabled(&self, mode: ExecutionMode) -> PipelineResult {
        debug!(%mode, "Orchestrator disabled; request refused");
        PipelineResult::disabled(mode)
    }

    async fn emit_started(&self, result: &PipelineResult, stages: &[StageConfig]) {
        let names: Vec<String> = stages.iter().map(|s| s.name.clone()).collect();
        info!(run_id = %result.run_id, mode = %result.mode, stages = names.len(), "Pipeline started");
        self.events
            .emit(
                PIPELINE_STARTED,
                Some(events::pipeline_started_payload(
                    result.run_id,
                    &result.mode.to_string(),
                    &names,
                )),
            )
            .await;
    }

    async fn absorb(
        &self,
        result: &mut PipelineResult,
        context: &mut ExecutionContext,
        execution: StageExecution,
    ) {
        let StageExecution {
            result: stage_result,
            output,
        } = execution;

        debug!(
            stage = %stage_result.stage,
            node = %stage_result.node,
            status = %stage_result.status,
            attempts = stage_result.attempts,
            "Stage finished"
        );
        self.events
            .emit(
                events::stage_event_type(stage_result.status),
                Some(events::stage_payload(result.run_id, &stage_result)),
            )
            .await;

        if let Some(output) = output {
            context.merge(output);
        }
        result.stage_results.push(stage_result);
    }

    async fn finish(
        &self,
        mut result: PipelineResult,
        context: ExecutionContext,
        started: Instant,
    ) -> PipelineResult {
        let only_stage_skipped = matches!(
            result.stage_results.as_slice(),
            [only] if only.status == StageStatus::Skipped
        );
        if result.success && only_stage_skipped {
            result = result.escalate(EscalationReason::NodeMissing);
        }

        result.output = context.into_inner();
        result.duration = started.elapsed();

        let (event_type, payload) = events::pipeline_finished(&result);
        self.events.emit(event_type, Some(payload)).await;
        info!(
            run_id = %result.run_id,
            success = result.success,
            escalation = ?result.escalation_reason,
            duration_ms = result.duration.as_secs_f64() * 1000.0,
            "Pipeline finished"
        );
        result
    }
}
