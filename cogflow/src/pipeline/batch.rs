//! Batch planning for parallel execution.
//!
//! The planner only ever groups consecutive stages; it never reorders them
//! and never infers data dependencies. A stage that needs an earlier stage's
//! output must be marked as a `barrier` so it starts a later batch.

use super::config::StageConfig;

/// A group of consecutive stages executed concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBatch {
    /// Zero-based batch position.
    pub index: usize,
    /// Stages in configured order.
    pub stages: Vec<StageConfig>,
}

impl StageBatch {
    /// Returns the stage names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the number of stages in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Partitions `stages` into consecutive batches of at most `max_parallel`.
///
/// A `max_parallel` of zero is treated as one.
#[must_use]
pub fn plan_batches(stages: &[StageConfig], max_parallel: usize) -> Vec<StageBatch> {
    let limit = max_parallel.max(1);
    let mut batches: Vec<StageBatch> = Vec::new();

    for stage in stages {
        let start_new = match batches.last() {
            None => true,
            Some(current) => current.len() >= limit || stage.barrier,
        };
        if start_new {
            batches.push(StageBatch {
                index: batches.len(),
                stages: Vec::with_capacity(limit),
            });
        }
        if let Some(current) = batches.last_mut() {
            current.stages.push(stage.clone());
        }
    }

    batches
}
