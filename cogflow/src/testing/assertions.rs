//! Test assertions for pipeline results.

use crate::pipeline::{EscalationReason, PipelineResult, StageStatus};

/// Asserts that the pipeline succeeded.
pub fn assert_pipeline_succeeded(result: &PipelineResult) {
    assert!(
        result.success,
        "Expected success, got escalation {:?} with stages {:?}",
        result.escalation_reason,
        result
            .stage_results
            .iter()
            .map(|r| (r.stage.as_str(), r.status))
            .collect::<Vec<_>>()
    );
}

/// Asserts that the pipeline failed with the given escalation reason.
pub fn assert_escalation(result: &PipelineResult, expected: EscalationReason) {
    assert!(!result.success, "Expected failure, got success");
    assert_eq!(
        result.escalation_reason,
        Some(expected),
        "Expected escalation {:?}, got {:?}",
        expected,
        result.escalation_reason
    );
}

/// Asserts the terminal status of a stage.
pub fn assert_stage_status(result: &PipelineResult, stage: &str, expected: StageStatus) {
    let actual = result.stage(stage).map(|r| r.status);
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{stage}' to be {expected:?}, got {actual:?}"
    );
}

/// Asserts that the stage never ran.
pub fn assert_stage_not_run(result: &PipelineResult, stage: &str) {
    assert!(
        result.stage(stage).is_none(),
        "Expected stage '{stage}' not to run, but it has a result"
    );
}

/// Asserts that the merged output contains a key.
pub fn assert_output_contains(result: &PipelineResult, key: &str) {
    assert!(
        result.output.contains_key(key),
        "Expected output to contain key '{}'. Keys: {:?}",
        key,
        result.output.keys().collect::<Vec<_>>()
    );
}

/// Asserts a value in the merged output.
pub fn assert_output_value(result: &PipelineResult, key: &str, expected: &serde_json::Value) {
    let actual = result.output.get(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected value {expected:?} for key '{key}', got {actual:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ExecutionMode, StageResult};
    use serde_json::json;

    fn result() -> PipelineResult {
        let mut result = PipelineResult::new(ExecutionMode::Sequential);
        result
            .stage_results
            .push(StageResult::new("memory", "memory_node", StageStatus::Success));
        result.output.insert("memory".to_string(), json!("hit"));
        result
    }

    #[test]
    fn test_success_assertions() {
        let result = result();
        assert_pipeline_succeeded(&result);
        assert_stage_status(&result, "memory", StageStatus::Success);
        assert_stage_not_run(&result, "intent");
        assert_output_contains(&result, "memory");
        assert_output_value(&result, "memory", &json!("hit"));
    }

    #[test]
    fn test_escalation_assertion() {
        let result = result().escalate(EscalationReason::Timeout);
        assert_escalation(&result, EscalationReason::Timeout);
    }

    #[test]
    #[should_panic(expected = "Expected success")]
    fn test_succeeded_panics_on_failure() {
        assert_pipeline_succeeded(&result().escalate(EscalationReason::StageError));
    }
}
