//! Lifecycle events emitted by the orchestrator.
//!
//! Sinks are injected per orchestrator; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

use crate::pipeline::{PipelineResult, StageResult, StageStatus};
use serde_json::{json, Value};
use uuid::Uuid;

/// A run began.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// A run finished successfully.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A run finished with an escalation.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// A stage produced output.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage exhausted its candidates.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage had no resolvable node.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// A stage was cancelled.
pub const STAGE_CANCELLED: &str = "stage.cancelled";
/// Arbitration chose a decision.
pub const ARBITRATION_DECIDED: &str = "arbitration.decided";

/// Event type for a stage outcome.
#[must_use]
pub fn stage_event_type(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Success => STAGE_COMPLETED,
        StageStatus::Timeout | StageStatus::Error => STAGE_FAILED,
        StageStatus::Skipped => STAGE_SKIPPED,
        StageStatus::Cancelled => STAGE_CANCELLED,
    }
}

/// Payload for a stage event.
#[must_use]
pub fn stage_payload(run_id: Uuid, result: &StageResult) -> Value {
    json!({
        "run_id": run_id.to_string(),
        "stage": result.stage,
        "node": result.node,
        "status": result.status.to_string(),
        "attempts": result.attempts,
        "used_fallback": result.used_fallback,
        "duration_ms": result.duration.as_secs_f64() * 1000.0,
        "error": result.error.as_ref().map(|e| e.to_dict()),
    })
}

/// Payload for `pipeline.started`.
#[must_use]
pub fn pipeline_started_payload(run_id: Uuid, mode: &str, stages: &[String]) -> Value {
    json!({
        "run_id": run_id.to_string(),
        "mode": mode,
        "stages": stages,
    })
}

/// Event type and payload for a finished run or arbitration.
#[must_use]
pub fn pipeline_finished(result: &PipelineResult) -> (&'static str, Value) {
    let event_type = if result.success {
        PIPELINE_COMPLETED
    } else {
        PIPELINE_FAILED
    };
    let payload = json!({
        "run_id": result.run_id.to_string(),
        "mode": result.mode.to_string(),
        "success": result.success,
        "escalation_reason": result.escalation_reason.map(|r| r.as_str()),
        "stages": result.stage_results.len(),
        "duration_ms": result.duration.as_secs_f64() * 1000.0,
    });
    (event_type, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, StageError};
    use crate::pipeline::{EscalationReason, ExecutionMode};

    #[test]
    fn test_stage_event_types() {
        assert_eq!(stage_event_type(StageStatus::Success), STAGE_COMPLETED);
        assert_eq!(stage_event_type(StageStatus::Timeout), STAGE_FAILED);
        assert_eq!(stage_event_type(StageStatus::Skipped), STAGE_SKIPPED);
        assert_eq!(stage_event_type(StageStatus::Cancelled), STAGE_CANCELLED);
    }

    #[test]
    fn test_stage_payload() {
        let result = StageResult::new("intent", "intent_node", StageStatus::Error)
            .with_error(StageError::new(ErrorKind::TerminalError, "bad"));
        let payload = stage_payload(Uuid::now_v7(), &result);

        assert_eq!(payload["stage"], "intent");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error"]["kind"], "terminal_error");
    }

    #[test]
    fn test_pipeline_finished() {
        let ok = PipelineResult::new(ExecutionMode::Sequential);
        assert_eq!(pipeline_finished(&ok).0, PIPELINE_COMPLETED);

        let failed = ok.escalate(EscalationReason::Timeout);
        let (event_type, payload) = pipeline_finished(&failed);
        assert_eq!(event_type, PIPELINE_FAILED);
        assert_eq!(payload["escalation_reason"], "timeout");
    }
}
