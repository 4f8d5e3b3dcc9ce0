//! Cognitive node trait and implementations.
//!
//! Nodes are the pluggable units of work behind each stage. The orchestrator
//! only knows them through [`CognitiveNode::process`].

mod discovery;
mod registry;

pub use discovery::{DiscoveryConfig, DiscoveryReport, NodeCatalog, NodeFactory};
pub use registry::NodeRegistry;

use crate::context::ContextMap;
use crate::errors::NodeError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for pipeline nodes.
///
/// A node receives the context accumulated so far and returns the keys it
/// wants merged back. Failures are returned as [`NodeError`], tagged
/// transient or terminal so the executor knows whether to retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CognitiveNode: Send + Sync {
    /// Processes the context.
    ///
    /// # Arguments
    ///
    /// * `context` - Read-only view of the request and prior stage outputs
    ///
    /// # Returns
    ///
    /// The output map to merge, or a tagged failure.
    async fn process(&self, context: &ContextMap) -> Result<ContextMap, NodeError>;
}

/// An async function-based node.
pub struct FnNode<F, Fut>
where
    F: Fn(ContextMap) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ContextMap, NodeError>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnNode<F, Fut>
where
    F: Fn(ContextMap) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ContextMap, NodeError>> + Send,
{
    /// Creates a new function-based node.
    ///
    /// The closure receives an owned copy of the context.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }

    /// Returns the node's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<F, Fut> Debug for FnNode<F, Fut>
where
    F: Fn(ContextMap) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ContextMap, NodeError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnNode").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> CognitiveNode for FnNode<F, Fut>
where
    F: Fn(ContextMap) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ContextMap, NodeError>> + Send,
{
    async fn process(&self, context: &ContextMap) -> Result<ContextMap, NodeError> {
        (self.func)(context.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::context_from_pairs;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_node_sees_context() {
        let node = FnNode::new("echo", |ctx: ContextMap| async move {
            let query = ctx.get("query").cloned().unwrap_or(json!(null));
            Ok(context_from_pairs([("echo", query)]))
        });

        assert_eq!(node.name(), "echo");

        let ctx = context_from_pairs([("query", json!("hello"))]);
        let output = node.process(&ctx).await.unwrap();
        assert_eq!(output.get("echo"), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn test_fn_node_propagates_error() {
        let node = FnNode::new("broken", |_ctx| async { Err(NodeError::terminal("nope")) });

        let err = node.process(&ContextMap::new()).await.unwrap_err();
        assert_eq!(err, NodeError::terminal("nope"));
    }

    #[tokio::test]
    async fn test_mock_node() {
        let mut mock = MockCognitiveNode::new();
        mock.expect_process()
            .times(1)
            .returning(|_| Ok(context_from_pairs([("mocked", json!(true))])));

        let output = mock.process(&ContextMap::new()).await.unwrap();
        assert_eq!(output.get("mocked"), Some(&json!(true)));
    }
}
