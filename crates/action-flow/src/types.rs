//! Core types for action execution

use std::time::Duration;

use action_gate::{Evidence, SubmissionOutcome};
use action_primitives::{ActionKind, ActionPlan};
use formpilot_core_types::RefId;
use perceiver_structural::{SemanticElement, SemanticSnapshot, SnapshotDiff};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Used when the plan carries no timeout of its own
    pub action_timeout: Duration,
    /// Settle delay between the primitive and the re-observation
    pub settle_delay: Duration,
    /// Default wait for `wait_for` without an explicit duration
    pub default_wait_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(0),
            default_wait_ms: 1_000,
        }
    }
}

/// Plan target bound to a concrete element of the current snapshot.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub ref_id: RefId,
    pub element: SemanticElement,
    /// Question the element answers, when it belongs to one
    pub question: Option<String>,
}

impl ResolvedTarget {
    /// Stable identity for loop-guard fingerprints: group plus option for
    /// choices, field signature otherwise.
    pub fn signature(&self) -> String {
        match &self.element.group_signature {
            Some(group) => format!("{}::{}", group, self.element.name.to_lowercase()),
            None => self.element.field_signature(),
        }
    }
}

/// Outcome of executing and verifying exactly one plan.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub kind: ActionKind,
    pub success: bool,
    /// Criterion that held, if any
    pub matched: Option<String>,
    pub reasons: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub diff: SnapshotDiff,
    pub outcome: Option<SubmissionOutcome>,
    /// Error returned by the primitive itself
    pub error: Option<String>,
    pub target: Option<String>,
    pub target_signature: Option<String>,
    pub latency_ms: u64,
    /// Page as re-observed after the action
    #[serde(skip)]
    pub observed: Option<SemanticSnapshot>,
}

impl ActionResult {
    pub fn plan_summary(plan: &ActionPlan, target: Option<&ResolvedTarget>) -> String {
        match target {
            Some(target) => format!("{}:{}", plan.kind(), target.element.name),
            None => plan.kind().to_string(),
        }
    }
}
