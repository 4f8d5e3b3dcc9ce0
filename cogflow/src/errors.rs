//! Error types for the cogflow orchestrator.
//!
//! Node failures are plain data ([`NodeError`]) so the retry and fallback
//! machinery can branch on them without unwinding. Everything that can go
//! wrong while *configuring* an orchestrator is an [`OrchestratorError`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Classification of a stage-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The registry has no binding for the requested node.
    NodeMissing,
    /// The node did not answer within the stage timeout.
    StageTimeout,
    /// The node reported a failure that may succeed on retry.
    TransientError,
    /// The node reported a failure that will not succeed on retry.
    TerminalError,
    /// The run was cancelled while the stage was pending or in flight.
    Cancelled,
    /// The circuit breaker rejected the call without contacting the node.
    CircuitOpen,
    /// Arbitration refused every proposal on ethics grounds.
    EthicsBlock,
}

impl ErrorKind {
    /// Returns the stable snake_case label used in metrics and payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NodeMissing => "node_missing",
            Self::StageTimeout => "stage_timeout",
            Self::TransientError => "transient_error",
            Self::TerminalError => "terminal_error",
            Self::Cancelled => "cancelled",
            Self::CircuitOpen => "circuit_open",
            Self::EthicsBlock => "ethics_block",
        }
    }

    /// Returns true if a failure of this kind may be retried on the same node.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StageTimeout | Self::TransientError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by a cognitive node.
///
/// This is the tagged half of a node's `Result`: `Ok(output)` on success,
/// otherwise either a retryable or a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// A failure that is worth retrying (rate limits, flaky backends).
    #[error("transient node failure: {0}")]
    Transient(String),

    /// A failure that exhausts the current node immediately.
    #[error("terminal node failure: {0}")]
    Terminal(String),
}

impl NodeError {
    /// Creates a transient failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a terminal failure.
    #[must_use]
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }

    /// Returns the failure classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::TransientError,
            Self::Terminal(_) => ErrorKind::TerminalError,
        }
    }

    /// Returns the raw message without the classification prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Terminal(msg) => msg,
        }
    }
}

/// Error detail attached to a stage result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind.as_str()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map
    }
}

impl From<&NodeError> for StageError {
    fn from(err: &NodeError) -> Self {
        Self::new(err.kind(), err.message())
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The main error type for orchestrator configuration and setup.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A stage definition failed validation.
    #[error("{0}")]
    InvalidStage(#[from] StageValidationError),

    /// Configuration could not be loaded or is out of range.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Node discovery failed.
    #[error("{0}")]
    Discovery(#[from] DiscoveryError),
}

/// Error raised when a stage list is rejected by `configure_stages`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StageValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl StageValidationError {
    /// Creates a new stage validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Creates a duplicate-stage error.
    #[must_use]
    pub fn duplicate(name: &str) -> Self {
        Self::new(format!("Duplicate stage name '{name}'")).with_stages(vec![name.to_string()])
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        /// The variable name.
        key: String,
        /// The offending raw value.
        value: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A JSON configuration document could not be parsed.
    #[error("Malformed configuration: {0}")]
    Malformed(String),

    /// A parsed value is outside its allowed range.
    #[error("Configuration out of range: {field} {reason}")]
    OutOfRange {
        /// The field name.
        field: String,
        /// The violated constraint.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an out of range error.
    #[must_use]
    pub fn out_of_range(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by opt-in node discovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The requested node is not on the reviewed catalog.
    #[error("Node '{name}' is not in the discovery catalog")]
    NotCataloged {
        /// The node name.
        name: String,
    },

    /// The factory returned an error.
    #[error("Node '{name}' failed to construct: {reason}")]
    ConstructionFailed {
        /// The node name.
        name: String,
        /// The failure reason.
        reason: String,
    },

    /// The factory did not finish within the construction budget.
    #[error("Node '{name}' construction timed out after {timeout_ms}ms")]
    ConstructionTimeout {
        /// The node name.
        name: String,
        /// The construction budget in milliseconds.
        timeout_ms: u64,
    },
}

impl DiscoveryError {
    /// Returns the node name this error refers to.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::NotCataloged { name }
            | Self::ConstructionFailed { name, .. }
            | Self::ConstructionTimeout { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ErrorKind::NodeMissing.as_str(), "node_missing");
        assert_eq!(ErrorKind::StageTimeout.to_string(), "stage_timeout");
        assert_eq!(
            serde_json::to_string(&ErrorKind::TerminalError).unwrap(),
            r#""terminal_error""#
        );
    }

    #[test]
    fn test_error_kind_retryable() {
        assert!(ErrorKind::TransientError.is_retryable());
        assert!(ErrorKind::StageTimeout.is_retryable());
        assert!(!ErrorKind::TerminalError.is_retryable());
        assert!(!ErrorKind::NodeMissing.is_retryable());
        assert!(!ErrorKind::CircuitOpen.is_retryable());
    }

    #[test]
    fn test_node_error_classification() {
        let transient = NodeError::transient("rate limited");
        assert_eq!(transient.kind(), ErrorKind::TransientError);
        assert_eq!(transient.message(), "rate limited");
        assert!(transient.to_string().contains("transient"));

        let terminal = NodeError::terminal("bad input");
        assert_eq!(terminal.kind(), ErrorKind::TerminalError);
    }

    #[test]
    fn test_stage_error_from_node_error() {
        let err = StageError::from(&NodeError::terminal("boom"));
        assert_eq!(err.kind, ErrorKind::TerminalError);
        assert_eq!(err.message, "boom");
        assert_eq!(err.to_string(), "terminal_error: boom");

        let dict = err.to_dict();
        assert_eq!(dict.get("kind").unwrap(), "terminal_error");
    }

    #[test]
    fn test_duplicate_stage_error() {
        let err = StageValidationError::duplicate("memory");
        assert!(err.to_string().contains("memory"));
        assert_eq!(err.stages, vec!["memory".to_string()]);

        let wrapped: OrchestratorError = err.into();
        assert!(matches!(wrapped, OrchestratorError::InvalidStage(_)));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid_value("COGFLOW_ENABLED", "maybe", "expected a boolean");
        assert!(err.to_string().contains("COGFLOW_ENABLED"));
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn test_discovery_error_name() {
        let err = DiscoveryError::ConstructionTimeout {
            name: "intent_node".to_string(),
            timeout_ms: 50,
        };
        assert_eq!(err.name(), "intent_node");
        assert!(err.to_string().contains("50ms"));
    }
}
