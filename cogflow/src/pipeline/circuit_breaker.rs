//! Per (stage, node) circuit breakers.
//!
//! A breaker opens after `failure_threshold` consecutive failures and then
//! rejects calls without invoking the node until the cooldown elapses. The
//! first call after that is let through as a single probe: success closes
//! the breaker, failure re-opens it with a fresh cooldown.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker (minimum 1).
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cooldown in milliseconds before a probe is allowed.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl BreakerConfig {
    /// Creates a breaker config.
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown_ms: u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Gets the cooldown as a `Duration`.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// Cooldown elapsed; the next call (or the one in flight) is the probe.
    HalfOpen,
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Gate decision for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerAdmission {
    /// The breaker is closed.
    Allowed,
    /// The breaker was open and this call is the single probe.
    Probe,
    /// The call must not reach the node.
    Rejected {
        /// Time left in the current cooldown (zero while a probe is in flight).
        retry_after: Duration,
    },
}

impl BreakerAdmission {
    /// Returns true if the call may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Transition caused by recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    /// The breaker stayed closed.
    Unchanged,
    /// The breaker moved from closed to open.
    Opened,
    /// A failed probe re-opened the breaker.
    Reopened,
}

impl BreakerTransition {
    /// Returns true if the breaker is open after the transition.
    #[must_use]
    pub const fn opened(&self) -> bool {
        matches!(self, Self::Opened | Self::Reopened)
    }
}

#[derive(Debug, Clone, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerState {
    fn status(&self, now: Instant) -> BreakerStatus {
        match self.open_until {
            None => BreakerStatus::Closed,
            Some(until) if now < until => BreakerStatus::Open,
            Some(_) => BreakerStatus::HalfOpen,
        }
    }
}

/// Serializable view of one breaker for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Stage name.
    pub stage: String,
    /// Node name.
    pub node: String,
    /// Current status.
    pub status: BreakerStatus,
    /// Consecutive failures recorded.
    pub consecutive_failures: u32,
    /// Remaining cooldown in milliseconds while open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

type BreakerKey = (String, String);

/// Breaker states keyed by (stage, node).
///
/// Entries are created on the first failure and removed on success. Each
/// entry is mutated under its shard lock, so concurrent attempts from
/// simultaneous requests never lose updates.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    states: DashMap<BreakerKey, BreakerState>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry with the given settings.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    /// Returns the breaker settings.
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn key(stage: &str, node: &str) -> BreakerKey {
        (stage.to_string(), node.to_string())
    }

    /// Decides whether a call to `node` for `stage` may proceed.
    pub fn admit(&self, stage: &str, node: &str) -> BreakerAdmission {
        let now = Instant::now();
        let Some(mut state) = self.states.get_mut(&Self::key(stage, node)) else {
            return BreakerAdmission::Allowed;
        };

        match state.open_until {
            None => BreakerAdmission::Allowed,
            Some(until) if now < until => BreakerAdmission::Rejected {
                retry_after: until - now,
            },
            Some(_) if state.probe_in_flight => BreakerAdmission::Rejected {
                retry_after: Duration::ZERO,
            },
            Some(_) => {
                state.probe_in_flight = true;
                debug!(stage, node, "Circuit half-open; admitting probe");
                BreakerAdmission::Probe
            }
        }
    }

    /// Records a successful call, closing the breaker.
    pub fn record_success(&self, stage: &str, node: &str) {
        if let Some((_, previous)) = self.states.remove(&Self::key(stage, node)) {
            if previous.open_until.is_some() {
                debug!(stage, node, "Circuit closed after successful probe");
            }
        }
    }

    /// Records a failed call and returns the resulting transition.
    pub fn record_failure(&self, stage: &str, node: &str) -> BreakerTransition {
        let threshold = self.config.failure_threshold.max(1);
        let mut state = self.states.entry(Self::key(stage, node)).or_default();

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let was_probe = state.probe_in_flight;
        state.probe_in_flight = false;

        let transition = if was_probe {
            BreakerTransition::Reopened
        } else if state.open_until.is_none() && state.consecutive_failures >= threshold {
            BreakerTransition::Opened
        } else {
            BreakerTransition::Unchanged
        };

        if transition.opened() {
            state.open_until = Some(Instant::now() + self.config.cooldown());
            warn!(
                stage,
                node,
                failures = state.consecutive_failures,
                cooldown_ms = self.config.cooldown_ms,
                "Circuit opened"
            );
        }

        transition
    }

    /// Releases a probe slot when the probe ended without a verdict.
    pub fn release_probe(&self, stage: &str, node: &str) {
        if let Some(mut state) = self.states.get_mut(&Self::key(stage, node)) {
            if state.probe_in_flight {
                debug!(stage, node, "Probe ended without a verdict; slot released");
            }
            state.probe_in_flight = false;
        }
    }

    /// Ties a `Probe` admission to a guard that releases the slot on drop.
    ///
    /// Call [`ProbeGuard::settle`] once the probe's success or failure has
    /// been recorded. A guard dropped unsettled (cancellation, missing node,
    /// or the caller's future being dropped mid-call) frees the slot so the
    /// next caller can probe.
    #[must_use]
    pub fn probe_guard<'a>(&'a self, stage: &'a str, node: &'a str) -> ProbeGuard<'a> {
        ProbeGuard {
            breakers: self,
            stage,
            node,
            armed: true,
        }
    }

    /// Returns the current status for (stage, node).
    #[must_use]
    pub fn status(&self, stage: &str, node: &str) -> BreakerStatus {
        self.states
            .get(&Self::key(stage, node))
            .map_or(BreakerStatus::Closed, |state| state.status(Instant::now()))
    }

    /// Returns a snapshot of every tracked breaker, sorted by key.
    #[must_use]
    pub fn states(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<BreakerSnapshot> = self
            .states
            .iter()
            .map(|entry| {
                let (stage, node) = entry.key();
                let state = entry.value();
                BreakerSnapshot {
                    stage: stage.clone(),
                    node: node.clone(),
                    status: state.status(now),
                    consecutive_failures: state.consecutive_failures,
                    retry_after_ms: state
                        .open_until
                        .filter(|until| now < *until)
                        .map(|until| u64::try_from((until - now).as_millis()).unwrap_or(u64::MAX)),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| (&a.stage, &a.node).cmp(&(&b.stage, &b.node)));
        snapshots
    }

    /// Clears all breaker state.
    pub fn reset(&self) {
        self.states.clear();
    }
}

/// Releases a half-open probe slot unless the probe reached a verdict.
#[derive(Debug)]
pub struct ProbeGuard<'a> {
    breakers: &'a CircuitBreakerRegistry,
    stage: &'a str,
    node: &'a str,
    armed: bool,
}

impl ProbeGuard<'_> {
    /// Marks the probe as settled by `record_success` or `record_failure`.
    pub fn settle(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breakers.release_probe(self.stage, self.node);
        }
    }
}
