//! Execution context carried across the stages of one run.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Insertion-ordered string-keyed map passed to and returned by nodes.
///
/// Backed by `serde_json::Map` with the `preserve_order` feature, so
/// iteration follows insertion order.
pub type ContextMap = serde_json::Map<String, serde_json::Value>;

/// Builds a context map from key/value pairs.
#[must_use]
pub fn context_from_pairs<K, I>(pairs: I) -> ContextMap
where
    K: Into<String>,
    I: IntoIterator<Item = (K, serde_json::Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// The original request plus every stage output merged so far.
///
/// Only the run loop mutates the context, and only between stages or
/// batches. Concurrent batch siblings read an [`Arc`] snapshot taken before
/// the batch starts, so they never observe each other's writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    data: ContextMap,
    /// Keys contributed by stages, in merge order.
    #[serde(default)]
    merged_keys: Vec<String>,
}

impl ExecutionContext {
    /// Creates a context from the incoming request.
    #[must_use]
    pub fn new(request: ContextMap) -> Self {
        Self {
            data: request,
            merged_keys: Vec::new(),
        }
    }

    /// Returns a read-only view of the current data.
    #[must_use]
    pub fn data(&self) -> &ContextMap {
        &self.data
    }

    /// Returns a shareable snapshot of the current data.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ContextMap> {
        Arc::new(self.data.clone())
    }

    /// Merges a stage output into the context.
    ///
    /// Existing keys are overwritten in place, so they keep their original
    /// position; new keys are appended.
    pub fn merge(&mut self, output: ContextMap) {
        for (key, value) in output {
            if !self.merged_keys.contains(&key) {
                self.merged_keys.push(key.clone());
            }
            self.data.insert(key, value);
        }
    }

    /// Returns the keys contributed by stages, in merge order.
    #[must_use]
    pub fn merged_keys(&self) -> &[String] {
        &self.merged_keys
    }

    /// Gets a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the context holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the context and returns the accumulated data.
    #[must_use]
    pub fn into_inner(self) -> ContextMap {
        self.data
    }
}

impl From<ContextMap> for ExecutionContext {
    fn from(request: ContextMap) -> Self {
        Self::new(request)
    }
}
