//! Stage and pipeline result types.

use crate::context::ContextMap;
use crate::errors::{ErrorKind, StageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Terminal status of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// A candidate produced output.
    Success,
    /// The last real failure was a timeout.
    Timeout,
    /// The last real failure was a node error.
    Error,
    /// The run was cancelled before or during the stage.
    Cancelled,
    /// No candidate node could be resolved.
    Skipped,
}

impl StageStatus {
    /// Returns true if this status stops the pipeline.
    #[must_use]
    pub const fn halts(&self) -> bool {
        matches!(self, Self::Timeout | Self::Error | Self::Cancelled)
    }

    /// Returns the escalation reason for a halting status.
    #[must_use]
    pub const fn escalation(&self) -> Option<EscalationReason> {
        match self {
            Self::Timeout => Some(EscalationReason::Timeout),
            Self::Error => Some(EscalationReason::StageError),
            Self::Cancelled => Some(EscalationReason::Cancelled),
            Self::Success | Self::Skipped => None,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::Error => write!(f, "error"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a result needs operator or human attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// A stage exhausted its candidates with an error.
    StageError,
    /// A stage exhausted its candidates with a timeout.
    Timeout,
    /// The run was cancelled.
    Cancelled,
    /// The orchestrator kill switch is off.
    AsyncDisabled,
    /// The meta-controller saw an alternating decision pattern.
    OscillationDetected,
    /// Every proposal breached the ethics threshold.
    EthicsBlock,
    /// The only configured stage had no resolvable node.
    NodeMissing,
    /// Arbitration was called with no proposals.
    NoProposals,
}

impl EscalationReason {
    /// Returns the stable snake_case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StageError => "stage_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::AsyncDisabled => "async_disabled",
            Self::OscillationDetected => "oscillation_detected",
            Self::EthicsBlock => "ethics_block",
            Self::NodeMissing => "node_missing",
            Self::NoProposals => "no_proposals",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a pipeline result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Stages ran one after another.
    #[default]
    Sequential,
    /// Stages ran in concurrent batches.
    Parallel,
    /// The result came from proposal arbitration.
    Arbitration,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Arbitration => write!(f, "arbitration"),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}

/// Terminal outcome of one stage (one per stage, not per retry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub stage: String,
    /// Node that produced the final outcome (primary or a fallback).
    pub node: String,
    /// Terminal status.
    pub status: StageStatus,
    /// Wall-clock time spent on the stage, retries and backoff included.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// Node invocations made, across all candidates.
    pub attempts: u32,
    /// Failure detail for non-success statuses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    /// Whether any fallback candidate was tried.
    #[serde(default)]
    pub used_fallback: bool,
    /// The primary failure that sent the stage to its fallbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_trigger: Option<StageError>,
}

impl StageResult {
    /// Creates a result with the given status and no failure detail.
    #[must_use]
    pub fn new(stage: impl Into<String>, node: impl Into<String>, status: StageStatus) -> Self {
        Self {
            stage: stage.into(),
            node: node.into(),
            status,
            duration: Duration::ZERO,
            attempts: 0,
            error: None,
            used_fallback: false,
            fallback_trigger: None,
        }
    }

    /// Creates a result for a stage that never started because the run was cancelled.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>, node: impl Into<String>, reason: &str) -> Self {
        Self::new(stage, node, StageStatus::Cancelled)
            .with_error(StageError::new(ErrorKind::Cancelled, reason))
    }

    /// Sets the error detail.
    #[must_use]
    pub fn with_error(mut self, error: StageError) -> Self {
        self.error = Some(error);
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Returns true if the stage produced output.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage".to_string(), serde_json::json!(self.stage));
        map.insert("node".to_string(), serde_json::json!(self.node));
        map.insert("status".to_string(), serde_json::json!(self.status.to_string()));
        map.insert(
            "duration_ms".to_string(),
            serde_json::json!(self.duration.as_secs_f64() * 1000.0),
        );
        map.insert("attempts".to_string(), serde_json::json!(self.attempts));
        map.insert("used_fallback".to_string(), serde_json::json!(self.used_fallback));
        if let Some(ref error) = self.error {
            map.insert("error".to_string(), serde_json::json!(error.to_dict()));
        }
        if let Some(ref trigger) = self.fallback_trigger {
            map.insert("fallback_trigger".to_string(), serde_json::json!(trigger.to_dict()));
        }
        map
    }
}

/// Aggregated outcome of a run or an arbitration.
///
/// Every entry point resolves to one of these; failures are reported through
/// `success` and `escalation_reason`, never by returning an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Unique, time-ordered run identifier.
    pub run_id: Uuid,
    /// How the result was produced.
    pub mode: ExecutionMode,
    /// Overall success.
    pub success: bool,
    /// Stage outcomes in configured order (only stages that were reached).
    #[serde(default)]
    pub stage_results: Vec<StageResult>,
    /// Merged context (or the arbitration winner's payload).
    #[serde(default)]
    pub output: ContextMap,
    /// Set when the result needs attention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<EscalationReason>,
    /// Explanation from arbitration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Decision label from arbitration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock time.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl PipelineResult {
    /// Creates a successful result with no stages.
    #[must_use]
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            mode,
            success: true,
            stage_results: Vec::new(),
            output: ContextMap::new(),
            escalation_reason: None,
            rationale: None,
            decision: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Result returned by every entry point while the kill switch is off.
    #[must_use]
    pub fn disabled(mode: ExecutionMode) -> Self {
        Self::new(mode).escalate(EscalationReason::AsyncDisabled)
    }

    /// Marks the result failed with the given reason.
    #[must_use]
    pub fn escalate(mut self, reason: EscalationReason) -> Self {
        self.success = false;
        self.escalation_reason = Some(reason);
        self
    }

    /// Sets the rationale.
    #[must_use]
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Sets the decision label.
    #[must_use]
    pub fn with_decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = Some(decision.into());
        self
    }

    /// Returns the result for a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.stage == name)
    }

    /// Returns total node invocations across all stages.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.stage_results.iter().map(|r| r.attempts).sum()
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_stage_status_halts() {
        assert!(StageStatus::Error.halts());
        assert!(StageStatus::Timeout.halts());
        assert!(StageStatus::Cancelled.halts());
        assert!(!StageStatus::Skipped.halts());
        assert!(!StageStatus::Success.halts());
    }

    #[test]
    fn test_stage_status_escalation() {
        assert_eq!(
            StageStatus::Error.escalation(),
            Some(EscalationReason::StageError)
        );
        assert_eq!(StageStatus::Timeout.escalation(), Some(EscalationReason::Timeout));
        assert_eq!(StageStatus::Skipped.escalation(), None);
    }

    #[test]
    fn test_escalation_reason_labels() {
        assert_eq!(EscalationReason::AsyncDisabled.to_string(), "async_disabled");
        assert_eq!(
            serde_json::to_value(EscalationReason::OscillationDetected).unwrap(),
            json!("oscillation_detected")
        );
    }

    #[test]
    fn test_disabled_result() {
        let result = PipelineResult::disabled(ExecutionMode::Parallel);
        assert!(!result.success);
        assert_eq!(result.escalation_reason, Some(EscalationReason::AsyncDisabled));
        assert!(result.stage_results.is_empty());
        assert_eq!(result.mode, ExecutionMode::Parallel);
    }

    #[test]
    fn test_stage_result_to_dict() {
        let mut result = StageResult::new("memory", "cache_node", StageStatus::Success)
            .with_duration(Duration::from_millis(12));
        result.used_fallback = true;
        result.fallback_trigger = Some(StageError::new(ErrorKind::TerminalError, "boom"));

        let dict = result.to_dict();
        assert_eq!(dict.get("status"), Some(&json!("success")));
        assert_eq!(dict.get("used_fallback"), Some(&json!(true)));
        assert!(dict.contains_key("fallback_trigger"));
        assert!(!dict.contains_key("error"));
    }

    #[test]
    fn test_pipeline_result_serializes_duration_as_ms() {
        let mut result = PipelineResult::new(ExecutionMode::Sequential);
        result.duration = Duration::from_millis(1500);
        result
            .stage_results
            .push(StageResult::cancelled("s", "s_node", "shutdown"));

        let value = result.to_json();
        assert_eq!(value["duration_ms"], json!(1500.0));
        assert_eq!(value["mode"], json!("sequential"));
        assert_eq!(value["stage_results"][0]["status"], json!("cancelled"));
        assert!(value.get("escalation_reason").is_none());

        let back: PipelineResult = serde_json::from_value(value).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
        assert_eq!(back.run_id, result.run_id);
    }

    #[test]
    fn test_stage_lookup_and_attempts() {
        let mut result = PipelineResult::new(ExecutionMode::Sequential);
        let mut a = StageResult::new("a", "a_node", StageStatus::Success);
        a.attempts = 2;
        let mut b = StageResult::new("b", "b_node", StageStatus::Success);
        b.attempts = 1;
        result.stage_results = vec![a, b];

        assert_eq!(result.total_attempts(), 3);
        assert_eq!(result.stage("b").map(|r| r.attempts), Some(1));
        assert!(result.stage("c").is_none());
    }
}
