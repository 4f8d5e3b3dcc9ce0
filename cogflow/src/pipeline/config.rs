//! Stage configuration.

use crate::errors::StageValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Suffix appended to a stage name to derive its default node name.
pub const NODE_NAME_SUFFIX: &str = "_node";

/// Specification for a single stage in a pipeline.
///
/// An ordered list of these fully defines a pipeline. The orchestrator
/// snapshots the list at the start of every run, so a concurrent
/// reconfiguration never changes a run in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// The unique name of the stage.
    pub name: String,
    /// Explicit primary node; defaults to `"{name}_node"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Alternate nodes tried left to right once the primary is exhausted.
    #[serde(default)]
    pub fallback_nodes: Vec<String>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries granted to the primary node after its first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff between primary retries in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Starts a new parallel batch at this stage.
    #[serde(default)]
    pub barrier: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    100
}

impl StageConfig {
    /// Creates a stage with default timeout, retries and backoff.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: None,
            fallback_nodes: Vec::new(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            barrier: false,
        }
    }

    /// Sets an explicit primary node.
    #[must_use]
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Appends a fallback node.
    #[must_use]
    pub fn with_fallback(mut self, node: impl Into<String>) -> Self {
        self.fallback_nodes.push(node.into());
        self
    }

    /// Replaces the fallback list.
    #[must_use]
    pub fn with_fallbacks(mut self, nodes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fallback_nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the backoff base.
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Forces a new batch to start at this stage in parallel mode.
    #[must_use]
    pub fn barrier(mut self) -> Self {
        self.barrier = true;
        self
    }

    /// Returns the primary node name, explicit or derived.
    #[must_use]
    pub fn primary_node(&self) -> String {
        self.node
            .clone()
            .unwrap_or_else(|| format!("{}{NODE_NAME_SUFFIX}", self.name))
    }

    /// Returns `[primary] + fallback_nodes`.
    #[must_use]
    pub fn candidates(&self) -> Vec<String> {
        std::iter::once(self.primary_node())
            .chain(self.fallback_nodes.iter().cloned())
            .collect()
    }

    /// Gets the timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Gets the backoff base as a `Duration`.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the timeout is zero.
    pub fn validate(&self) -> Result<(), StageValidationError> {
        if self.name.trim().is_empty() {
            return Err(StageValidationError::new(
                "Stage name cannot be empty or whitespace-only",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(StageValidationError::new(format!(
                "Stage '{}' must have a positive timeout",
                self.name
            ))
            .with_stages(vec![self.name.clone()]));
        }
        Ok(())
    }
}

/// Validates a full stage list: each stage individually, then name uniqueness.
///
/// # Errors
///
/// Returns the first violation found, in list order.
pub fn validate_stages(stages: &[StageConfig]) -> Result<(), StageValidationError> {
    let mut seen = HashSet::new();
    for stage in stages {
        stage.validate()?;
        if !seen.insert(stage.name.as_str()) {
            return Err(StageValidationError::duplicate(&stage.name));
        }
    }
    Ok(())
}
