//! Mock nodes for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::ContextMap;
use crate::errors::NodeError;
use crate::nodes::CognitiveNode;

/// A node that always returns the same output.
#[derive(Debug, Default)]
pub struct StaticNode {
    output: ContextMap,
    calls: AtomicUsize,
}

impl StaticNode {
    /// Creates a node returning `output`.
    #[must_use]
    pub fn new(output: ContextMap) -> Self {
        Self {
            output,
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a node returning an empty map.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a node returning a single key.
    #[must_use]
    pub fn with_value(key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut output = ContextMap::new();
        output.insert(key.into(), value);
        Self::new(output)
    }

    /// Returns the number of times the node was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CognitiveNode for StaticNode {
    async fn process(&self, _context: &ContextMap) -> Result<ContextMap, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// A node that always fails with the same error.
#[derive(Debug)]
pub struct FailingNode {
    error: NodeError,
    calls: AtomicUsize,
}

impl FailingNode {
    /// Creates a node failing with a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::with_error(NodeError::transient(message))
    }

    /// Creates a node failing with a terminal error.
    #[must_use]
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::with_error(NodeError::terminal(message))
    }

    /// Creates a node failing with `error`.
    #[must_use]
    pub fn with_error(error: NodeError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times the node was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CognitiveNode for FailingNode {
    async fn process(&self, _context: &ContextMap) -> Result<ContextMap, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// A node that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyNode {
    failures: usize,
    error: NodeError,
    output: ContextMap,
    calls: AtomicUsize,
}

impl FlakyNode {
    /// Creates a node that fails transiently `failures` times before returning `output`.
    #[must_use]
    pub fn new(failures: usize, output: ContextMap) -> Self {
        Self {
            failures,
            error: NodeError::transient("flaky"),
            output,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sets the error returned while failing.
    #[must_use]
    pub fn with_error(mut self, error: NodeError) -> Self {
        self.error = error;
        self
    }

    /// Returns the number of times the node was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CognitiveNode for FlakyNode {
    async fn process(&self, _context: &ContextMap) -> Result<ContextMap, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(self.error.clone())
        } else {
            Ok(self.output.clone())
        }
    }
}

/// A node that sleeps before answering.
#[derive(Debug)]
pub struct SlowNode {
    delay: Duration,
    output: ContextMap,
    calls: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowNode {
    /// Creates a node answering `output` after `delay`.
    #[must_use]
    pub fn new(delay: Duration, output: ContextMap) -> Self {
        Self {
            delay,
            output,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times the node was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the number of calls that ran to completion.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CognitiveNode for SlowNode {
    async fn process(&self, _context: &ContextMap) -> Result<ContextMap, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// A node that records the context it was given.
#[derive(Debug, Default)]
pub struct RecordingNode {
    output: ContextMap,
    contexts: Mutex<Vec<ContextMap>>,
}

impl RecordingNode {
    /// Creates a recording node returning `output`.
    #[must_use]
    pub fn new(output: ContextMap) -> Self {
        Self {
            output,
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of times the node was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns the contexts from each call.
    #[must_use]
    pub fn recorded_contexts(&self) -> Vec<ContextMap> {
        self.contexts.lock().clone()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.contexts.lock().clear();
    }
}

#[async_trait]
impl CognitiveNode for RecordingNode {
    async fn process(&self, context: &ContextMap) -> Result<ContextMap, NodeError> {
        self.contexts.lock().push(context.clone());
        Ok(self.output.clone())
    }
}
