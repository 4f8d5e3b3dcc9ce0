//! Registry mapping node names to node instances.

use super::CognitiveNode;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry for node instances.
///
/// Written at startup (or by tests), read concurrently while requests run.
/// Owned by whoever builds the orchestrator and passed in explicitly, so
/// isolated orchestrators can coexist in one process.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, Arc<dyn CognitiveNode>>>,
}

impl NodeRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node under a name.
    ///
    /// An existing binding for the same name is replaced (last write wins).
    pub fn register(&self, name: impl Into<String>, node: Arc<dyn CognitiveNode>) {
        let name = name.into();
        let replaced = self.nodes.write().insert(name.clone(), node).is_some();
        debug!(node = %name, replaced, "Registered node");
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_node(self, name: impl Into<String>, node: Arc<dyn CognitiveNode>) -> Self {
        self.register(name, node);
        self
    }

    /// Resolves a node by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CognitiveNode>> {
        self.nodes.read().get(name).cloned()
    }

    /// Removes a binding, returning the node if one was registered.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn CognitiveNode>> {
        self.nodes.write().remove(name)
    }

    /// Returns true if a node is registered under the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.read().contains_key(name)
    }

    /// Lists registered node names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Returns true if no nodes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.names())
            .finish()
    }
}
