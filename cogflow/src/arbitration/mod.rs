//! Proposal arbitration and oscillation detection.
//!
//! The [`Arbitrator`] applies an ethics gate, then ranks the surviving
//! proposals by `confidence * role_weight`. Ties go to the earliest
//! timestamp, then to the earliest submission. When nothing survives the
//! gate the decision is forced to [`REQUIRE_HUMAN`].

mod meta;

pub use meta::{MetaController, MIN_OSCILLATION_WINDOW};

use crate::context::ContextMap;
use crate::pipeline::{EscalationReason, ExecutionMode, PipelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Decision label used when a human has to decide.
pub const REQUIRE_HUMAN: &str = "require_human";

/// Default ethics risk at or above which a proposal is rejected.
pub const DEFAULT_ETHICS_THRESHOLD: f64 = 0.8;

/// Clamps to [0, 1]; NaN becomes `fallback`.
fn unit(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A candidate outcome competing for a decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Who produced the proposal (node or generator name).
    pub source: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Ethics risk in [0, 1].
    #[serde(default)]
    pub ethics_risk: f64,
    /// Weight of the source's role in [0, 1].
    #[serde(default = "default_role_weight")]
    pub role_weight: f64,
    /// When the proposal was produced.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Payload adopted as output if the proposal wins.
    #[serde(default)]
    pub result: ContextMap,
}

fn default_role_weight() -> f64 {
    1.0
}

impl Proposal {
    /// Creates a proposal with zero risk, full role weight and the current time.
    #[must_use]
    pub fn new(source: impl Into<String>, confidence: f64, result: ContextMap) -> Self {
        Self {
            source: source.into(),
            confidence,
            ethics_risk: 0.0,
            role_weight: default_role_weight(),
            timestamp: Utc::now(),
            result,
        }
    }

    /// Sets the ethics risk.
    #[must_use]
    pub fn with_ethics_risk(mut self, risk: f64) -> Self {
        self.ethics_risk = risk;
        self
    }

    /// Sets the role weight.
    #[must_use]
    pub fn with_role_weight(mut self, weight: f64) -> Self {
        self.role_weight = weight;
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Ranking score: `confidence * role_weight`, inputs clamped to [0, 1].
    #[must_use]
    pub fn score(&self) -> f64 {
        unit(self.confidence, 0.0) * unit(self.role_weight, 0.0)
    }

    /// Returns true if the proposal's risk meets or exceeds `threshold`.
    ///
    /// A NaN risk counts as maximal.
    #[must_use]
    pub fn is_blocked(&self, threshold: f64) -> bool {
        unit(self.ethics_risk, 1.0) >= threshold
    }

    /// Decision label: the payload's `"decision"` string, else the source.
    #[must_use]
    pub fn decision_label(&self) -> String {
        self.result
            .get("decision")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| self.source.clone(), str::to_string)
    }
}

/// Result of one arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationOutcome {
    /// The chosen decision label.
    pub decision: String,
    /// Human-readable explanation.
    pub rationale: String,
    /// The winning proposal, if any survived the gate.
    pub winner: Option<Proposal>,
    /// Sources rejected by the ethics gate, in submission order.
    pub blocked: Vec<String>,
    /// Set when no proposal could be chosen automatically.
    pub escalation_reason: Option<EscalationReason>,
}

impl ArbitrationOutcome {
    /// Returns true if the decision was handed to a human.
    #[must_use]
    pub fn requires_human(&self) -> bool {
        self.winner.is_none()
    }

    /// Converts into a pipeline result.
    ///
    /// Arbitration itself succeeded even when the decision is forced to a
    /// human, so `success` stays true; the escalation reason is still set.
    #[must_use]
    pub fn into_pipeline_result(self) -> PipelineResult {
        let mut result = PipelineResult::new(ExecutionMode::Arbitration)
            .with_decision(self.decision)
            .with_rationale(self.rationale);
        result.escalation_reason = self.escalation_reason;
        if let Some(winner) = self.winner {
            result.output = winner.result;
        }
        result
    }
}

/// Picks one proposal or forces human escalation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arbitrator {
    ethics_threshold: f64,
}

impl Default for Arbitrator {
    fn default() -> Self {
        Self::new(DEFAULT_ETHICS_THRESHOLD)
    }
}

impl Arbitrator {
    /// Creates an arbitrator with the given ethics threshold.
    #[must_use]
    pub fn new(ethics_threshold: f64) -> Self {
        Self { ethics_threshold }
    }

    /// Returns the ethics threshold.
    #[must_use]
    pub fn ethics_threshold(&self) -> f64 {
        self.ethics_threshold
    }

    /// Arbitrates among `proposals`.
    #[must_use]
    pub fn arbitrate(&self, proposals: Vec<Proposal>) -> ArbitrationOutcome {
        if proposals.is_empty() {
            debug!("Arbitration called without proposals");
            return ArbitrationOutcome {
                decision: REQUIRE_HUMAN.to_string(),
                rationale: "No proposals were submitted; human review required".to_string(),
                winner: None,
                blocked: Vec::new(),
                escalation_reason: Some(EscalationReason::NoProposals),
            };
        }

        let total = proposals.len();
        let (blocked, eligible): (Vec<Proposal>, Vec<Proposal>) = proposals
            .into_iter()
            .partition(|p| p.is_blocked(self.ethics_threshold));
        let blocked: Vec<String> = blocked.into_iter().map(|p| p.source).collect();

        let mut best: Option<Proposal> = None;
        for candidate in eligible {
            let replace = match &best {
                None => true,
                Some(current) => match candidate.score().total_cmp(&current.score()) {
                    Ordering::Greater => true,
                    Ordering::Equal => candidate.timestamp < current.timestamp,
                    Ordering::Less => false,
                },
            };
            if replace {
                best = Some(candidate);
            }
        }

        let Some(winner) = best else {
            warn!(
                blocked = total,
                threshold = self.ethics_threshold,
                "Every proposal blocked by ethics gate"
            );
            return ArbitrationOutcome {
                decision: REQUIRE_HUMAN.to_string(),
                rationale: format!(
                    "All {total} proposals met or exceeded the ethics risk threshold of {:.2}; human review required",
                    self.ethics_threshold
                ),
                winner: None,
                blocked,
                escalation_reason: Some(EscalationReason::EthicsBlock),
            };
        };

        let decision = winner.decision_label();
        let rationale = format!(
            "Selected '{}' with score {:.3} (confidence {:.2} x role weight {:.2}); {} of {} proposals blocked at ethics risk >= {:.2}",
            winner.source,
            winner.score(),
            unit(winner.confidence, 0.0),
            unit(winner.role_weight, 0.0),
            blocked.len(),
            total,
            self.ethics_threshold
        );
        debug!(source = %winner.source, decision = %decision, "Arbitration decided");

        ArbitrationOutcome {
            decision,
            rationale,
            winner: Some(winner),
            blocked,
            escalation_reason: None,
        }
    }
}
