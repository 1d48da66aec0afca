//! Core types for post-action verification

use action_primitives::{ActionKind, ActionPlan};
use perceiver_structural::{SemanticElement, SemanticSnapshot, SnapshotDiff};
use serde::{Deserialize, Serialize};

use crate::outcome::SubmissionOutcome;

/// Result of checking one action's success criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,

    /// Name of the first criterion that held
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,

    pub reasons: Vec<String>,

    pub evidence: Vec<Evidence>,

    pub latency_ms: u64,
}

impl GateResult {
    pub fn pass(matched: impl Into<String>, reasons: Vec<String>) -> Self {
        Self {
            passed: true,
            matched: Some(matched.into()),
            reasons,
            evidence: Vec::new(),
            latency_ms: 0,
        }
    }

    pub fn fail(reasons: Vec<String>) -> Self {
        Self {
            passed: false,
            matched: None,
            reasons,
            evidence: Vec::new(),
            latency_ms: 0,
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// Evidence piece from validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_type: EvidenceType,

    pub description: String,

    pub value: serde_json::Value,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Evidence {
    pub fn new(evidence_type: EvidenceType, description: String, value: serde_json::Value) -> Self {
        Self {
            evidence_type,
            description,
            value,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    /// Checked/value state of the target element
    Element,
    /// Sibling state within a choice group
    Group,
    /// Question-level error indicator
    Question,
    File,
    Diff,
    Text,
    Outcome,
}

impl EvidenceType {
    pub fn name(&self) -> &'static str {
        match self {
            EvidenceType::Element => "element",
            EvidenceType::Group => "group",
            EvidenceType::Question => "question",
            EvidenceType::File => "file",
            EvidenceType::Diff => "diff",
            EvidenceType::Text => "text",
            EvidenceType::Outcome => "outcome",
        }
    }
}

/// What the verifier looks at: the plan, the snapshot it was resolved
/// against, the fresh snapshot taken afterwards and their diff.
#[derive(Debug, Clone)]
pub struct ValidationContext<'a> {
    pub plan: &'a ActionPlan,
    /// Browser node key of the resolved target, if the action had one
    pub target_node: Option<&'a str>,
    /// Value the action should leave behind (option text for radios)
    pub intended_value: Option<&'a str>,
    /// Requested checked state for choice controls
    pub intended_checked: Option<bool>,
    pub before: &'a SemanticSnapshot,
    pub after: &'a SemanticSnapshot,
    pub diff: &'a SnapshotDiff,
    pub outcome: Option<&'a SubmissionOutcome>,
}

impl<'a> ValidationContext<'a> {
    pub fn kind(&self) -> ActionKind {
        self.plan.kind()
    }

    pub fn target_before(&self) -> Option<&'a SemanticElement> {
        self.target_node
            .and_then(|key| self.before.element_by_node(key))
    }

    pub fn target_after(&self) -> Option<&'a SemanticElement> {
        self.target_node
            .and_then(|key| self.after.element_by_node(key))
    }
}
