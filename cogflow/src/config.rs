//! Orchestrator configuration.
//!
//! Read once at startup from JSON or from `COGFLOW_*` environment variables.
//! Every field has a default, and the defaults fail closed: the orchestrator
//! is disabled and discovery is off until explicitly enabled.

use crate::arbitration::{Arbitrator, DEFAULT_ETHICS_THRESHOLD, MIN_OSCILLATION_WINDOW};
use crate::errors::ConfigError;
use crate::nodes::DiscoveryConfig;
use crate::pipeline::{BreakerConfig, JitterStrategy, RetryPolicy, StageConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Prefix shared by every environment variable.
pub const ENV_PREFIX: &str = "COGFLOW_";

const ENV_STAGE_PREFIX: &str = "COGFLOW_STAGE_";
const ENV_STAGE_TIMEOUT_SUFFIX: &str = "_TIMEOUT_MS";
const ENV_STAGE_RETRIES_SUFFIX: &str = "_MAX_RETRIES";
const ENV_STAGE_BACKOFF_SUFFIX: &str = "_BACKOFF_MS";

/// Per-stage overrides applied by `configure_stages`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOverride {
    /// Replacement timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Replacement retry budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Replacement backoff base in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,
}

impl StageOverride {
    /// Applies the set fields to `stage`.
    #[must_use]
    pub fn apply(&self, mut stage: StageConfig) -> StageConfig {
        if let Some(timeout_ms) = self.timeout_ms {
            stage.timeout_ms = timeout_ms;
        }
        if let Some(max_retries) = self.max_retries {
            stage.max_retries = max_retries;
        }
        if let Some(backoff_base_ms) = self.backoff_base_ms {
            stage.backoff_base_ms = backoff_base_ms;
        }
        stage
    }
}

/// Top-level orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Kill switch; when false every entry point returns `async_disabled`.
    #[serde(default)]
    pub enabled: bool,
    /// Batch size cap for parallel mode.
    #[serde(default = "default_max_parallel_stages")]
    pub max_parallel_stages: usize,
    /// Input size above which adaptive mode runs in parallel.
    #[serde(default = "default_adaptive_threshold")]
    pub adaptive_threshold: usize,
    /// Context key measured by the adaptive heuristic.
    #[serde(default = "default_adaptive_input_key")]
    pub adaptive_input_key: String,
    /// Timeout given to stages built with [`OrchestratorConfig::stage`].
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Cap on a single backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Backoff jitter.
    #[serde(default)]
    pub jitter: JitterStrategy,
    /// Ethics risk at or above which proposals are rejected.
    #[serde(default = "default_ethics_threshold")]
    pub ethics_threshold: f64,
    /// Decision history kept by the meta-controller.
    #[serde(default = "default_oscillation_window")]
    pub oscillation_window: usize,
    /// Circuit breaker settings.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Overrides keyed by stage name (case-insensitive).
    #[serde(default)]
    pub stage_overrides: HashMap<String, StageOverride>,
    /// Opt-in node discovery.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

fn default_max_parallel_stages() -> usize {
    4
}

fn default_adaptive_threshold() -> usize {
    200
}

fn default_adaptive_input_key() -> String {
    "query".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_ethics_threshold() -> f64 {
    DEFAULT_ETHICS_THRESHOLD
}

fn default_oscillation_window() -> usize {
    MIN_OSCILLATION_WINDOW
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_parallel_stages: default_max_parallel_stages(),
            adaptive_threshold: default_adaptive_threshold(),
            adaptive_input_key: default_adaptive_input_key(),
            default_timeout_ms: default_timeout_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: JitterStrategy::default(),
            ethics_threshold: default_ethics_threshold(),
            oscillation_window: default_oscillation_window(),
            breaker: BreakerConfig::default(),
            stage_overrides: HashMap::new(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::invalid_value(key, raw, e))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid_value(key, raw, "expected a boolean")),
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults (disabled).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the kill switch.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the parallel batch cap.
    #[must_use]
    pub fn with_max_parallel_stages(mut self, max: usize) -> Self {
        self.max_parallel_stages = max;
        self
    }

    /// Sets the adaptive threshold.
    #[must_use]
    pub fn with_adaptive_threshold(mut self, threshold: usize) -> Self {
        self.adaptive_threshold = threshold;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the ethics threshold.
    #[must_use]
    pub fn with_ethics_threshold(mut self, threshold: f64) -> Self {
        self.ethics_threshold = threshold;
        self
    }

    /// Sets the breaker settings.
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Adds a per-stage override.
    #[must_use]
    pub fn with_stage_override(mut self, stage: impl Into<String>, over: StageOverride) -> Self {
        self.stage_overrides.insert(stage.into(), over);
        self
    }

    /// Sets the discovery settings.
    #[must_use]
    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for invalid JSON and `OutOfRange` for values
    /// rejected by [`OrchestratorConfig::validate`].
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a `COGFLOW_*` variable cannot be parsed or the
    /// result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Loads from `(name, value)` pairs, ignoring names without the prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognized variable cannot be parsed or the
    /// result fails validation.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let (key, raw) = (key.as_ref(), value.as_ref());
            if !key.starts_with(ENV_PREFIX) {
                continue;
            }
            match key {
                "COGFLOW_ENABLED" => config.enabled = parse_bool(key, raw)?,
                "COGFLOW_MAX_PARALLEL_STAGES" => config.max_parallel_stages = parse_env(key, raw)?,
                "COGFLOW_ADAPTIVE_THRESHOLD" => config.adaptive_threshold = parse_env(key, raw)?,
                "COGFLOW_ADAPTIVE_INPUT_KEY" => config.adaptive_input_key = raw.trim().to_string(),
                "COGFLOW_DEFAULT_TIMEOUT_MS" => config.default_timeout_ms = parse_env(key, raw)?,
                "COGFLOW_MAX_BACKOFF_MS" => config.max_backoff_ms = parse_env(key, raw)?,
                "COGFLOW_ETHICS_THRESHOLD" => config.ethics_threshold = parse_env(key, raw)?,
                "COGFLOW_OSCILLATION_WINDOW" => config.oscillation_window = parse_env(key, raw)?,
                "COGFLOW_BREAKER_THRESHOLD" => {
                    config.breaker.failure_threshold = parse_env(key, raw)?;
                }
                "COGFLOW_BREAKER_COOLDOWN_MS" => config.breaker.cooldown_ms = parse_env(key, raw)?,
                "COGFLOW_DISCOVERY_ENABLED" => config.discovery.enabled = parse_bool(key, raw)?,
                "COGFLOW_DISCOVER_NODES" => {
                    config.discovery.nodes = raw
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "COGFLOW_DISCOVERY_TIMEOUT_MS" => {
                    config.discovery.construct_timeout_ms = parse_env(key, raw)?;
                }
                _ => config.apply_stage_var(key, raw)?,
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_stage_var(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(ENV_STAGE_PREFIX) else {
            return Ok(());
        };

        if let Some(stage) = rest.strip_suffix(ENV_STAGE_TIMEOUT_SUFFIX) {
            self.stage_override_mut(stage).timeout_ms = Some(parse_env(key, raw)?);
        } else if let Some(stage) = rest.strip_suffix(ENV_STAGE_RETRIES_SUFFIX) {
            self.stage_override_mut(stage).max_retries = Some(parse_env(key, raw)?);
        } else if let Some(stage) = rest.strip_suffix(ENV_STAGE_BACKOFF_SUFFIX) {
            self.stage_override_mut(stage).backoff_base_ms = Some(parse_env(key, raw)?);
        }
        Ok(())
    }

    fn stage_override_mut(&mut self, stage: &str) -> &mut StageOverride {
        self.stage_overrides
            .entry(stage.to_ascii_lowercase())
            .or_default()
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_stages == 0 {
            return Err(ConfigError::out_of_range("max_parallel_stages", "must be at least 1"));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::out_of_range("default_timeout_ms", "must be positive"));
        }
        if !(self.ethics_threshold > 0.0 && self.ethics_threshold <= 1.0) {
            return Err(ConfigError::out_of_range(
                "ethics_threshold",
                "must be in (0, 1]",
            ));
        }
        if self.oscillation_window < MIN_OSCILLATION_WINDOW {
            return Err(ConfigError::out_of_range(
                "oscillation_window",
                format!("must be at least {MIN_OSCILLATION_WINDOW}"),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::out_of_range(
                "breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        for (stage, over) in &self.stage_overrides {
            if over.timeout_ms == Some(0) {
                return Err(ConfigError::out_of_range(
                    format!("stage_overrides.{stage}.timeout_ms"),
                    "must be positive",
                ));
            }
        }
        Ok(())
    }

    /// Builds a stage with the configured default timeout.
    #[must_use]
    pub fn stage(&self, name: impl Into<String>) -> StageConfig {
        StageConfig::new(name).with_timeout(Duration::from_millis(self.default_timeout_ms))
    }

    /// Returns the override for a stage, matched case-insensitively.
    #[must_use]
    pub fn override_for(&self, stage: &str) -> Option<&StageOverride> {
        self.stage_overrides
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(stage))
            .map(|(_, over)| over)
    }

    /// Applies per-stage overrides to a stage list.
    #[must_use]
    pub fn apply_overrides(&self, stages: Vec<StageConfig>) -> Vec<StageConfig> {
        stages
            .into_iter()
            .map(|stage| match self.override_for(&stage.name) {
                Some(over) => over.apply(stage),
                None => stage,
            })
            .collect()
    }

    /// Returns the retry policy shared by all stages.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_backoff_ms(self.max_backoff_ms)
            .with_jitter(self.jitter)
    }

    /// Returns the arbitrator for the configured threshold.
    #[must_use]
    pub fn arbitrator(&self) -> Arbitrator {
        Arbitrator::new(self.ethics_threshold)
    }
}
