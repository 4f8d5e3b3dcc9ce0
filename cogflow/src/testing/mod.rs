//! Testing utilities for cogflow pipelines.
//!
//! This module provides:
//! - Mock nodes with call tracking
//! - Assertions over pipeline results

mod assertions;
mod mocks;

pub use assertions::{
    assert_escalation, assert_output_contains, assert_output_value, assert_pipeline_succeeded,
    assert_stage_not_run, assert_stage_status,
};
pub use mocks::{FailingNode, FlakyNode, RecordingNode, SlowNode, StaticNode};
