//! Stage execution: breaker gate, timeout, retries and fallbacks.
//!
//! [`StageExecutor::execute`] drives one stage to a terminal [`StageResult`].
//! The primary node gets `max_retries + 1` tries; each fallback gets exactly
//! one. Node failures never escape as errors: they are folded into the
//! result's status and error detail.

use super::circuit_breaker::{BreakerAdmission, CircuitBreakerRegistry};
use super::config::StageConfig;
use super::result::{StageResult, StageStatus};
use super::retry::{cancellable_sleep, RetryDecision, RetryPolicy, SleepOutcome};
use crate::cancellation::CancellationToken;
use crate::context::ContextMap;
use crate::errors::{ErrorKind, NodeError, StageError};
use crate::nodes::NodeRegistry;
use crate::observability::{AttemptOutcome, MetricsRecorder};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const DEFAULT_CANCEL_REASON: &str = "cancelled";

/// The terminal result of a stage plus the output to merge on success.
#[derive(Debug, Clone)]
pub struct StageExecution {
    /// Terminal stage outcome.
    pub result: StageResult,
    /// Output of the successful node, if any.
    pub output: Option<ContextMap>,
}

/// Runs single stages against the registry.
///
/// Cheap to share: every field is reference counted or `Copy`.
#[derive(Clone)]
pub struct StageExecutor {
    registry: Arc<NodeRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: Arc<dyn MetricsRecorder>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

enum CallOutcome {
    Completed(ContextMap),
    Failed(NodeError),
    TimedOut,
    Cancelled,
}

enum CandidateOutcome {
    Succeeded(ContextMap),
    Cancelled,
    Exhausted(StageError),
}

/// Mutable bookkeeping for one stage run.
struct StageRun<'a> {
    stage: &'a StageConfig,
    context: &'a ContextMap,
    token: &'a CancellationToken,
    attempts: u32,
    used_fallback: bool,
    last_failure: Option<StageError>,
    last_node: Option<String>,
    rejected: bool,
}

impl StageExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        registry: Arc<NodeRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        metrics: Arc<dyn MetricsRecorder>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            breakers,
            metrics,
            retry,
        }
    }

    /// Returns the breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Executes one stage to a terminal result.
    pub async fn execute(
        &self,
        stage: &StageConfig,
        context: &ContextMap,
        token: &CancellationToken,
    ) -> StageExecution {
        let started = Instant::now();
        let primary = stage.primary_node();

        if token.is_cancelled() {
            let reason = token.reason().unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
            debug!(stage = %stage.name, "Stage not started; run already cancelled");
            return StageExecution {
                result: StageResult::cancelled(&stage.name, primary, &reason),
                output: None,
            };
        }

        let mut run = StageRun {
            stage,
            context,
            token,
            attempts: 0,
            used_fallback: false,
            last_failure: None,
            last_node: None,
            rejected: false,
        };
        let mut fallback_trigger: Option<StageError> = None;

        for (index, node) in stage.candidates().iter().enumerate() {
            let is_fallback = index > 0;
            let outcome = self.run_candidate(&mut run, node, is_fallback).await;

            let mut result = match outcome {
                CandidateOutcome::Succeeded(output) => {
                    let mut result = StageResult::new(&stage.name, node, StageStatus::Success);
                    result.attempts = run.attempts;
                    result.used_fallback = run.used_fallback;
                    result.fallback_trigger = fallback_trigger.filter(|_| run.used_fallback);
                    debug!(
                        stage = %stage.name,
                        node = %node,
                        attempts = run.attempts,
                        used_fallback = run.used_fallback,
                        "Stage succeeded"
                    );
                    return StageExecution {
                        result: result.with_duration(started.elapsed()),
                        output: Some(output),
                    };
                }
                CandidateOutcome::Cancelled => {
                    let reason = token.reason().unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
                    StageResult::cancelled(&stage.name, node, &reason)
                }
                CandidateOutcome::Exhausted(err) => {
                    if !is_fallback {
                        fallback_trigger = Some(err);
                    }
                    continue;
                }
            };

            result.attempts = run.attempts;
            result.used_fallback = run.used_fallback;
            result.fallback_trigger = fallback_trigger.filter(|_| run.used_fallback);
            return StageExecution {
                result: result.with_duration(started.elapsed()),
                output: None,
            };
        }

        let last_node = run.last_node.take().unwrap_or(primary);
        let (status, error) = match run.last_failure.take() {
            Some(err) if err.kind == ErrorKind::StageTimeout => (StageStatus::Timeout, err),
            Some(err) => (StageStatus::Error, err),
            None if run.rejected => (
                StageStatus::Error,
                StageError::new(ErrorKind::CircuitOpen, "every candidate is circuit-open"),
            ),
            None => (
                StageStatus::Skipped,
                StageError::new(ErrorKind::NodeMissing, "no candidate node is registered"),
            ),
        };

        if status == StageStatus::Skipped {
            debug!(stage = %stage.name, "Stage skipped; no node resolved");
        } else {
            warn!(
                stage = %stage.name,
                attempts = run.attempts,
                kind = %error.kind,
                error = %error.message,
                "Stage exhausted all candidates"
            );
        }

        let mut result = StageResult::new(&stage.name, last_node, status).with_error(error);
        result.attempts = run.attempts;
        result.used_fallback = run.used_fallback;
        result.fallback_trigger = fallback_trigger.filter(|_| run.used_fallback);
        StageExecution {
            result: result.with_duration(started.elapsed()),
            output: None,
        }
    }

    async fn run_candidate(
        &self,
        run: &mut StageRun<'_>,
        node_name: &str,
        is_fallback: bool,
    ) -> CandidateOutcome {
        let stage: &StageConfig = run.stage;
        let stage_name = stage.name.as_str();
        let max_retries = if is_fallback { 0 } else { stage.max_retries };
        let mut last_error: Option<StageError> = None;
        let mut attempt: u32 = 0;

        loop {
            let admission = self.breakers.admit(stage_name, node_name);
            if let BreakerAdmission::Rejected { retry_after } = admission {
                self.metrics.increment_circuit_rejection(stage_name, node_name);
                debug!(
                    stage = stage_name,
                    node = node_name,
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    "Circuit open; skipping candidate"
                );
                run.rejected = true;
                return CandidateOutcome::Exhausted(last_error.unwrap_or_else(|| {
                    StageError::new(
                        ErrorKind::CircuitOpen,
                        format!("circuit open for node '{node_name}'"),
                    )
                }));
            }

            let mut probe = (admission == BreakerAdmission::Probe)
                .then(|| self.breakers.probe_guard(stage_name, node_name));

            let Some(node) = self.registry.resolve(node_name) else {
                debug!(stage = stage_name, node = node_name, "Node not registered");
                return CandidateOutcome::Exhausted(last_error.unwrap_or_else(|| {
                    StageError::new(
                        ErrorKind::NodeMissing,
                        format!("node '{node_name}' is not registered"),
                    )
                }));
            };

            if is_fallback {
                run.used_fallback = true;
                self.metrics.increment_fallback(stage_name, node_name);
            }
            run.attempts += 1;
            run.last_node = Some(node_name.to_string());

            let call_started = Instant::now();
            let call = tokio::time::timeout(stage.timeout(), node.process(run.context));
            let outcome = tokio::select! {
                biased;
                () = run.token.cancelled() => CallOutcome::Cancelled,
                res = call => match res {
                    Err(_) => CallOutcome::TimedOut,
                    Ok(Ok(output)) => CallOutcome::Completed(output),
                    Ok(Err(err)) => CallOutcome::Failed(err),
                },
            };

            let label = match &outcome {
                CallOutcome::Completed(_) => AttemptOutcome::Success,
                CallOutcome::TimedOut => AttemptOutcome::Timeout,
                CallOutcome::Cancelled => AttemptOutcome::Cancelled,
                CallOutcome::Failed(err) => match err.kind() {
                    ErrorKind::TransientError => AttemptOutcome::TransientError,
                    _ => AttemptOutcome::TerminalError,
                },
            };
            self.metrics
                .record_stage_duration(stage_name, node_name, label, call_started.elapsed());

            let error = match outcome {
                CallOutcome::Completed(output) => {
                    self.breakers.record_success(stage_name, node_name);
                    if let Some(guard) = probe.as_mut() {
                        guard.settle();
                    }
                    return CandidateOutcome::Succeeded(output);
                }
                CallOutcome::Cancelled => {
                    debug!(stage = stage_name, node = node_name, "Node call cancelled");
                    return CandidateOutcome::Cancelled;
                }
                CallOutcome::TimedOut => {
                    self.metrics.increment_timeout(stage_name);
                    StageError::new(
                        ErrorKind::StageTimeout,
                        format!(
                            "node '{node_name}' exceeded {}ms timeout",
                            stage.timeout_ms
                        ),
                    )
                }
                CallOutcome::Failed(err) => StageError::from(&err),
            };

            let transition = self.breakers.record_failure(stage_name, node_name);
            if let Some(guard) = probe.as_mut() {
                guard.settle();
            }

            debug!(
                stage = stage_name,
                node = node_name,
                attempt,
                kind = %error.kind,
                error = %error.message,
                "Node attempt failed"
            );
            run.last_failure = Some(error.clone());

            // An open breaker would reject the retry, so neither count nor
            // sleep for it.
            if transition.opened() {
                self.metrics.increment_circuit_open(stage_name, node_name);
                return CandidateOutcome::Exhausted(error);
            }

            match self
                .retry
                .decide(error.kind, attempt, max_retries, stage.backoff_base())
            {
                RetryDecision::Retry(delay) => {
                    self.metrics.increment_retry(stage_name, error.kind);
                    debug!(
                        stage = stage_name,
                        node = node_name,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Retrying node"
                    );
                    last_error = Some(error);
                    if cancellable_sleep(delay, run.token).await == SleepOutcome::Cancelled {
                        return CandidateOutcome::Cancelled;
                    }
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    if max_retries > 0 {
                        warn!(
                            stage = stage_name,
                            node = node_name,
                            retries = max_retries,
                            "Retries exhausted"
                        );
                    }
                    return CandidateOutcome::Exhausted(error);
                }
                RetryDecision::NotRetryable => return CandidateOutcome::Exhausted(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::context_from_pairs;
    use crate::nodes::{CognitiveNode, MockCognitiveNode};
    use crate::observability::InMemoryMetrics;
    use crate::pipeline::circuit_breaker::{BreakerConfig, BreakerStatus};
    use crate::pipeline::retry::JitterStrategy;
    use crate::testing::{FailingNode, FlakyNode, SlowNode, StaticNode};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        registry: Arc<NodeRegistry>,
        metrics: Arc<InMemoryMetrics>,
        executor: StageExecutor,
    }

    fn harness_with(breaker: BreakerConfig) -> Harness {
        let registry = Arc::new(NodeRegistry::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let executor = StageExecutor::new(
            registry.clone(),
            Arc::new(CircuitBreakerRegistry::new(breaker)),
            metrics.clone(),
            RetryPolicy::new().with_jitter(JitterStrategy::None),
        );
        Harness {
            registry,
            metrics,
            executor,
        }
    }

    fn harness() -> Harness {
        harness_with(BreakerConfig::default())
    }

    fn fast_stage(name: &str) -> StageConfig {
        StageConfig::new(name)
            .with_backoff_base(Duration::from_millis(1))
            .with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let h = harness();
        let node = Arc::new(StaticNode::with_value("memory", json!("hit")));
        h.registry.register("memory_node", node.clone());

        let exec = h
            .executor
            .execute(&fast_stage("memory"), &ContextMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(exec.result.status, StageStatus::Success);
        assert_eq!(exec.result.node, "memory_node");
        assert_eq!(exec.result.attempts, 1);
        assert!(!exec.result.used_fallback);
        assert_eq!(exec.output.unwrap().get("memory"), Some(&json!("hit")));
        assert_eq!(h.metrics.invocations("memory"), 1);
    }

    #[tokio::test]
    async fn test_primary_attempted_retries_plus_one() {
        for retries in 0..=3u32 {
            let h = harness();
            let node = Arc::new(FailingNode::transient("backend down"));
            h.registry.register("intent_node", node.clone());

            let stage = fast_stage("intent").with_max_retries(retries);
            let exec = h
                .executor
                .execute(&stage, &ContextMap::new(), &CancellationToken::new())
                .await;

            assert_eq!(node.call_count(), retries as usize + 1);
            assert_eq!(exec.result.status, StageStatus::Error);
            assert_eq!(
                exec.result.error.as_ref().map(|e| e.kind),
                Some(ErrorKind::TransientError)
            );
            assert_eq!(h.metrics.retries("intent"), u64::from(retries));
        }
    }

    #[tokio::test]
    async fn test_mock_node_called_exactly_r_plus_one_times() {
        let h = harness();
        let mut mock = MockCognitiveNode::new();
        mock.expect_process()
            .times(4)
            .returning(|_| Err(NodeError::transient("rate limited")));
        h.registry.register("decision_node", Arc::new(mock));

        let stage = fast_stage("decision").with_max_retries(3);
        let exec = h
            .executor
            .execute(&stage, &ContextMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(exec.result.attempts, 4);
    }

    #[tokio::test]
    async fn test_terminal_error_goes_straight_to_fallback() {
        let h = harness();
        let primary = Arc::new(FailingNode::terminal("invalid prompt"));
        let fallback = Arc::new(StaticNode::with_value("decision", json!("safe_default")));
        h.registry.register("decision_node", primary.clone());
        h.registry.register("heuristic_node", fallback.clone());

        let stage = fast_stage("decision")
            .with_max_retries(3)
            .with_fallback("heuristic_node");
        let exec = h
            .executor
            .execute(&stage, &ContextMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 1);
        assert_eq!(exec.result.status, StageStatus::Success);
        assert_eq!(exec.result.node, "heuristic_node");
        assert!(exec.result.used_fallback);
        assert_eq!(
            exec.result.fallback_trigger.as_ref().map(|e| e.kind),
            Some(ErrorKind::TerminalError)
        );
        assert_eq!(h.metrics.retries("decision"), 0);
        assert_eq!(h.metrics.fallbacks("decision"), 1);
    }

    #[tokio::test]
    async fn test_each_fallback_attempted_once() {
        let h = harness();
        let primary = Arc::new(FailingNode::transient("down"));
        let first = Arc::new(FailingNode::transient("also down"));
        let second = Arc::new(FailingNode::terminal("broken"));
        h.registry.register("s_node", primary.clone());
        h.registry.register("first_node", first.clone());
        h.registry.register("second_node", second.clone());

        let stage = fast_stage("s")
            .with_max_retries(0)
            .with_fallbacks(["first_node", "second_node"]);
        let exec = h
            .executor
            .execute(&stage, &ContextMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(primary.call_count(), 1);
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 1);
        assert_eq!(exec.result.status, StageStatus::Error);
        assert_eq!(exec.result.attempts, 3);
        assert!(exec.result.used_fallback);
        assert_eq!(exec.result.node, "second_node");
        assert_eq!(
            exec.result.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::TerminalError)
        );
    }

    #[tokio::test]
    async fn test_timeout_drops_in_flight_call() {
        let h = harness();
        let node = Arc::new(SlowNode::new(Duration::from_millis(500), ContextMap::new()));
        h.registry.register("slow_node", node.clone());

        let stage = StageConfig::new("slow")
            .with_timeout(Duration::from_millis(20))
            .with_max_retries(0);
        let exec = h
            .executor
            .execute(&stage, &ContextMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(exec.result.status, StageStatus::Timeout);
        assert_eq!(
            exec.result.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::StageTimeout)
        );
        assert_eq!(node.call_count(), 1);
        assert_eq!(node.completed_count(), 0);
        assert_eq!(h.metrics.timeouts("slow"), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let h = harness();
        let node = Arc::new(SlowNode::new(Duration::from_millis(500), ContextMap::new()));
        h.registry.register("slow_node", node.clone());

        let stage = StageConfig::new("slow")
            .with_timeout(Duration::from_millis(10))
            .with_backoff_base(Duration::from_millis(1))
            .with_max_retries(1);
        let exec = h
            .executor
            .execute(&stage, &ContextMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(node.call_count(), 2);
        assert_eq!(exec.result.status, StageStatus::Timeout);
        assert_eq!(h.metrics.timeouts("slow"), 2);
        assert_eq!(h.metrics.retries("slow"), 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_makes_no_calls() {
        let h = harness();
        let node = Arc::new(StaticNode::empty());
        h.registry.register("s_node", node.clone());

        let token = CancellationToken::new();
        token.cancel("client disconnected");
        let exec = h
            .executor
            .execute(&fast_stage("s"), &ContextMap::new(), &token)
            .await;

        assert_eq!(exec.result.status, StageStatus::Cancelled);
        assert_eq!(exec.result.attempts, 0);
        assert_eq!(node.call_count(), 0);
        assert_eq!(
            exec.result.error.as_ref().map(|e| e.message.as_str()),
            Some("client disconnected")
        );
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_returns_promptly() {
        let h = harness();
        let node = Arc::new(FailingNode::transient("down"));
        h.registry.register("s_node", node.clone());

        let stage = StageConfig::new("s")
            .with_backoff_base(Duration::from_secs(30))
            .with_max_retries(2);
        let token = CancellationToken::shared();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel("shutdown");
            })
        };

        let started = Instant::now();
        let exec = h.executor.execute(&stage, &ContextMap::new(), &token).await;
        canceller.await.unwrap();

        assert_eq!(exec.result.status, StageStatus::Cancelled);
        assert_eq!(node.call_count(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_during_call_returns_promptly() {
        let h = harness();
        let node = Arc::new(SlowNode::new(Duration::from_secs(30), ContextMap::new()));
        h.registry.register("s_node", node.clone());

        let token = CancellationToken::shared();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel("shutdown");
            })
        };

        let exec = h
            .executor
            .execute(&StageConfig::new("s"), &ContextMap::new(), &token)
            .await;
        canceller.await.unwrap();

        assert_eq!(exec.result.status, StageStatus::Cancelled);
        assert_eq!(node.completed_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_node_is_skipped_without_breaker_update() {
        let h = harness();

        let exec = h
            .executor
            .execute(&fast_stage("ghost"), &ContextMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(exec.result.status, StageStatus::Skipped);
        assert_eq!(exec.result.attempts, 0);
        assert_eq!(
            exec.result.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::NodeMissing)
        );
        assert!(h.executor.breakers().states().is_empty());
    }

    #[tokio::test]
    async fn test_missing_primary_uses_fallback() {
        let h = harness();
        h.registry
            .register("cache_node", Arc::new(StaticNode::with_value("memory", json!([]))));

        let stage = fast_stage("memory").with_fallback("cache_node");
        let exec = h
            .executor
            .execute(&stage, &ContextMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(exec.result.status, StageStatus::Success);
        assert!(exec.result.used_fallback);
        assert_eq!(
            exec.result.fallback_trigger.as_ref().map(|e| e.kind),
            Some(ErrorKind::NodeMissing)
        );
    }

    #[tokio::test]
    async fn test_flaky_node_recovers_after_one_retry() {
        let h = harness();
        let node = Arc::new(FlakyNode::new(1, context_from_pairs([("ok", json!(true))])));
        h.registry.register("s_node", node.clone());

        let exec = h
            .executor
            .execute(
                &fast_stage("s").with_max_retries(3),
                &ContextMap::new(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(exec.result.status, StageStatus::Success);
        assert_eq!(exec.result.attempts, 2);
        assert_eq!(h.metrics.retries("s"), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_then_probes() {
        let h = harness_with(BreakerConfig::new(1, Duration::from_millis(50)));
        let failing = Arc::new(FailingNode::transient("down"));
        h.registry.register("s_node", failing.clone());
        let stage = fast_stage("s").with_max_retries(0);
        let ctx = ContextMap::new();
        let token = CancellationToken::new();

        let first = h.executor.execute(&stage, &ctx, &token).await;
        assert_eq!(first.result.status, StageStatus::Error);
        assert_eq!(h.metrics.circuit_opens("s", "s_node"), 1);

        let rejected = h.executor.execute(&stage, &ctx, &token).await;
        assert_eq!(failing.call_count(), 1);
        assert_eq!(rejected.result.attempts, 0);
        assert_eq!(
            rejected.result.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::CircuitOpen)
        );
        assert_eq!(h.metrics.circuit_rejections("s", "s_node"), 1);

        tokio::time::sleep(Duration::from_millis(70)).await;
        let healthy: Arc<dyn CognitiveNode> = Arc::new(StaticNode::empty());
        h.registry.register("s_node", healthy);

        let probe = h.executor.execute(&stage, &ctx, &token).await;
        assert_eq!(probe.result.status, StageStatus::Success);
        assert_eq!(
            h.executor.breakers().status("s", "s_node"),
            BreakerStatus::Closed
        );
    }

    #[tokio::test]
    async fn test_breaker_opening_stops_retries() {
        let h = harness_with(BreakerConfig::new(2, Duration::from_secs(60)));
        let node = Arc::new(FailingNode::transient("down"));
        h.registry.register("s_node", node.clone());

        let stage = StageConfig::new("s")
            .with_backoff_base(Duration::from_millis(200))
            .with_max_retries(3);
        let started = Instant::now();
        let exec = h
            .executor
            .execute(&stage, &ContextMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(node.call_count(), 2);
        assert_eq!(exec.result.attempts, 2);
        assert_eq!(exec.result.status, StageStatus::Error);
        assert_eq!(
            exec.result.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::TransientError)
        );
        assert_eq!(h.metrics.retries("s"), 1);
        assert_eq!(h.metrics.circuit_opens("s", "s_node"), 1);
        assert_eq!(h.metrics.circuit_rejections("s", "s_node"), 0);
        // One 200ms backoff, not a second one before a rejected retry.
        assert!(started.elapsed() < Duration::from_millis(390));
    }

    #[tokio::test]
    async fn test_dropped_run_releases_probe() {
        let h = harness_with(BreakerConfig::new(1, Duration::from_millis(20)));
        let stage = fast_stage("s").with_max_retries(0);
        let ctx = ContextMap::new();
        let token = CancellationToken::new();

        h.registry
            .register("s_node", Arc::new(FailingNode::transient("down")));
        h.executor.execute(&stage, &ctx, &token).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        h.registry.register(
            "s_node",
            Arc::new(SlowNode::new(Duration::from_secs(30), ContextMap::new())),
        );
        let dropped = tokio::time::timeout(
            Duration::from_millis(10),
            h.executor.execute(&stage, &ctx, &token),
        )
        .await;
        assert!(dropped.is_err());
        assert_eq!(
            h.executor.breakers().status("s", "s_node"),
            BreakerStatus::HalfOpen
        );

        let healthy = Arc::new(StaticNode::empty());
        h.registry.register("s_node", healthy.clone());
        let recovered = h.executor.execute(&stage, &ctx, &token).await;

        assert_eq!(recovered.result.status, StageStatus::Success);
        assert_eq!(healthy.call_count(), 1);
        assert_eq!(
            h.executor.breakers().status("s", "s_node"),
            BreakerStatus::Closed
        );
    }

    #[tokio::test]
    async fn test_open_primary_breaker_falls_back() {
        let h = harness_with(BreakerConfig::new(1, Duration::from_secs(60)));
        let failing = Arc::new(FailingNode::terminal("down"));
        let fallback = Arc::new(StaticNode::empty());
        h.registry.register("s_node", failing.clone());
        h.registry.register("backup_node", fallback.clone());
        let stage = fast_stage("s").with_fallback("backup_node");
        let ctx = ContextMap::new();
        let token = CancellationToken::new();

        h.executor.execute(&stage, &ctx, &token).await;
        let second = h.executor.execute(&stage, &ctx, &token).await;

        assert_eq!(failing.call_count(), 1);
        assert_eq!(fallback.call_count(), 2);
        assert_eq!(second.result.status, StageStatus::Success);
        assert_eq!(
            second.result.fallback_trigger.as_ref().map(|e| e.kind),
            Some(ErrorKind::CircuitOpen)
        );
    }
}
