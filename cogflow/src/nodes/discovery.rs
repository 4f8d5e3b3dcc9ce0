//! Opt-in node discovery from a reviewed catalog.
//!
//! Discovery never scans modules or the filesystem. The host application
//! builds a [`NodeCatalog`] of known factories; configuration may then name
//! which of them to construct at startup. With discovery disabled (the
//! default) nothing is constructed, so an unconfigured deployment only runs
//! nodes it registered explicitly.

use super::{CognitiveNode, NodeRegistry};
use crate::errors::DiscoveryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Factory constructing a node instance.
pub type NodeFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn CognitiveNode>> + Send + Sync>;

/// Discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Whether discovery runs at all.
    #[serde(default)]
    pub enabled: bool,
    /// Names of catalog entries to construct.
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Per-node construction budget in milliseconds.
    #[serde(default = "default_construct_timeout_ms")]
    pub construct_timeout_ms: u64,
}

fn default_construct_timeout_ms() -> u64 {
    5_000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            nodes: Vec::new(),
            construct_timeout_ms: default_construct_timeout_ms(),
        }
    }
}

impl DiscoveryConfig {
    /// Creates an enabled config requesting the given nodes.
    #[must_use]
    pub fn enabled_for(nodes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            enabled: true,
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the construction timeout.
    #[must_use]
    pub fn with_construct_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.construct_timeout_ms = timeout_ms;
        self
    }

    /// Gets the construction timeout as a `Duration`.
    #[must_use]
    pub fn construct_timeout(&self) -> Duration {
        Duration::from_millis(self.construct_timeout_ms)
    }
}

/// Outcome of a discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Names registered into the registry.
    pub registered: Vec<String>,
    /// Requested names that were not registered, with the reason.
    pub rejected: Vec<DiscoveryError>,
}

impl DiscoveryReport {
    /// Returns true if every requested node was registered.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Reviewed list of node factories eligible for discovery.
#[derive(Default, Clone)]
pub struct NodeCatalog {
    factories: BTreeMap<String, NodeFactory>,
}

impl NodeCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a factory under a node name.
    #[must_use]
    pub fn with_factory<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn CognitiveNode>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Returns the cataloged names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Constructs the configured nodes and registers them.
    ///
    /// Each factory runs on the blocking pool under the construction timeout.
    /// A slow or failing factory is reported and skipped; it never aborts the
    /// rest of the pass.
    pub async fn discover(&self, registry: &NodeRegistry, config: &DiscoveryConfig) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        if !config.enabled {
            info!("Node discovery disabled; relying on explicit registration");
            return report;
        }

        for name in &config.nodes {
            match self.construct(name, config).await {
                Ok(node) => {
                    registry.register(name.clone(), node);
                    report.registered.push(name.clone());
                }
                Err(err) => {
                    warn!(node = %name, error = %err, "Rejected discovered node");
                    report.rejected.push(err);
                }
            }
        }

        info!(
            registered = report.registered.len(),
            rejected = report.rejected.len(),
            "Node discovery finished"
        );
        report
    }

    async fn construct(
        &self,
        name: &str,
        config: &DiscoveryConfig,
    ) -> Result<Arc<dyn CognitiveNode>, DiscoveryError> {
        let factory = self
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| DiscoveryError::NotCataloged {
                name: name.to_string(),
            })?;

        let handle = tokio::task::spawn_blocking(move || factory());
        match tokio::time::timeout(config.construct_timeout(), handle).await {
            Err(_) => Err(DiscoveryError::ConstructionTimeout {
                name: name.to_string(),
                timeout_ms: config.construct_timeout_ms,
            }),
            Ok(Err(join_error)) => Err(DiscoveryError::ConstructionFailed {
                name: name.to_string(),
                reason: format!("factory panicked: {join_error}"),
            }),
            Ok(Ok(Err(err))) => Err(DiscoveryError::ConstructionFailed {
                name: name.to_string(),
                reason: format!("{err:#}"),
            }),
            Ok(Ok(Ok(node))) => Ok(node),
        }
    }
}

impl std::fmt::Debug for NodeCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCatalog")
            .field("factories", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticNode;

    fn catalog() -> NodeCatalog {
        NodeCatalog::new()
            .with_factory("memory_node", || {
                Ok(Arc::new(StaticNode::empty()) as Arc<dyn CognitiveNode>)
            })
            .with_factory("broken_node", || anyhow::bail!("missing model weights"))
            .with_factory("slow_node", || {
                std::thread::sleep(Duration::from_millis(200));
                Ok(Arc::new(StaticNode::empty()) as Arc<dyn CognitiveNode>)
            })
    }

    #[test]
    fn test_discovery_config_defaults_fail_closed() {
        let config = DiscoveryConfig::default();
        assert!(!config.enabled);
        assert!(config.nodes.is_empty());
        assert_eq!(config.construct_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_disabled_discovery_registers_nothing() {
        let registry = NodeRegistry::new();
        let config = DiscoveryConfig {
            enabled: false,
            nodes: vec!["memory_node".to_string()],
            ..DiscoveryConfig::default()
        };

        let report = catalog().discover(&registry, &config).await;

        assert!(registry.is_empty());
        assert!(report.registered.is_empty());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_enabled_discovery_registers_cataloged_nodes() {
        let registry = NodeRegistry::new();
        let config = DiscoveryConfig::enabled_for(["memory_node"]);

        let report = catalog().discover(&registry, &config).await;

        assert_eq!(report.registered, vec!["memory_node".to_string()]);
        assert!(registry.contains("memory_node"));
    }

    #[tokio::test]
    async fn test_discovery_rejects_unknown_failing_and_slow() {
        let registry = NodeRegistry::new();
        let config = DiscoveryConfig::enabled_for(["rogue_node", "broken_node", "slow_node"])
            .with_construct_timeout_ms(20);

        let report = catalog().discover(&registry, &config).await;

        assert!(registry.is_empty());
        assert_eq!(report.rejected.len(), 3);
        assert!(matches!(report.rejected[0], DiscoveryError::NotCataloged { .. }));
        assert!(matches!(
            report.rejected[1],
            DiscoveryError::ConstructionFailed { .. }
        ));
        assert!(matches!(
            report.rejected[2],
            DiscoveryError::ConstructionTimeout { .. }
        ));
        assert_eq!(report.rejected[1].name(), "broken_node");
    }
}
