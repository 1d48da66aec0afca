use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Shared error type for cross-crate plumbing (event bus, stores).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PilotError {
    #[error("{message}")]
    Message { message: String },
}

impl PilotError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one observation cycle. Every snapshot gets a fresh epoch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SnapshotEpoch(pub u64);

impl fmt::Display for SnapshotEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short-lived element handle, valid only for the snapshot epoch it was minted in.
///
/// Rendered as `e{epoch}_{index}` so the decision service can echo it back verbatim.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RefId {
    pub epoch: SnapshotEpoch,
    pub index: u32,
}

impl RefId {
    pub fn new(epoch: SnapshotEpoch, index: u32) -> Self {
        Self { epoch, index }
    }

    pub fn belongs_to(&self, epoch: SnapshotEpoch) -> bool {
        self.epoch == epoch
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}_{}", self.epoch.0, self.index)
    }
}

impl FromStr for RefId {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
        let body = trimmed
            .strip_prefix('e')
            .ok_or_else(|| PilotError::new(format!("malformed ref id: {s}")))?;
        let (epoch, index) = body
            .split_once('_')
            .ok_or_else(|| PilotError::new(format!("malformed ref id: {s}")))?;
        let epoch = epoch
            .parse::<u64>()
            .map_err(|_| PilotError::new(format!("malformed ref epoch: {s}")))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| PilotError::new(format!("malformed ref index: {s}")))?;
        Ok(Self::new(SnapshotEpoch(epoch), index))
    }
}

impl Serialize for RefId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RefId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Result class assigned after every submission attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    SuccessConfirmed,
    ValidationError,
    ExternalBlocked,
    TransientNetwork,
    UnknownBlocked,
}

impl OutcomeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClass::SuccessConfirmed => "success_confirmed",
            OutcomeClass::ValidationError => "validation_error",
            OutcomeClass::ExternalBlocked => "external_blocked",
            OutcomeClass::TransientNetwork => "transient_network",
            OutcomeClass::UnknownBlocked => "unknown_blocked",
        }
    }

    /// Whether the class admits another submit without a repair step.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OutcomeClass::ExternalBlocked
                | OutcomeClass::TransientNetwork
                | OutcomeClass::UnknownBlocked
        )
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    InProgress,
    Paused,
    Applied,
    ManualRequired,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Paused => "paused",
            JobStatus::Applied => "applied",
            JobStatus::ManualRequired => "manual_required",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Applied | JobStatus::ManualRequired | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator phases. Exactly one is active per job.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    #[default]
    Observe,
    Plan,
    ExecuteChain,
    VerifyAction,
    Repair,
    Submit,
    Finalize,
    ManualStop,
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Observe => "observe",
            WorkflowPhase::Plan => "plan",
            WorkflowPhase::ExecuteChain => "execute_chain",
            WorkflowPhase::VerifyAction => "verify_action",
            WorkflowPhase::Repair => "repair",
            WorkflowPhase::Submit => "submit",
            WorkflowPhase::Finalize => "finalize",
            WorkflowPhase::ManualStop => "manual_stop",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowPhase::Finalize | WorkflowPhase::ManualStop)
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SnapshotGenerated,
    PlanProposed,
    ActionExecuted,
    ActionVerified,
    SubmissionOutcomeClassified,
    SemanticLoopGuard,
    WorkflowPhase,
    RetryPolicyApplied,
    VisualFallback,
    Finalized,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SnapshotGenerated => "snapshot_generated",
            EventKind::PlanProposed => "plan_proposed",
            EventKind::ActionExecuted => "action_executed",
            EventKind::ActionVerified => "action_verified",
            EventKind::SubmissionOutcomeClassified => "submission_outcome_classified",
            EventKind::SemanticLoopGuard => "semantic_loop_guard",
            EventKind::WorkflowPhase => "workflow_phase",
            EventKind::RetryPolicyApplied => "retry_policy_applied",
            EventKind::VisualFallback => "visual_fallback",
            EventKind::Finalized => "finalized",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the per-job observability stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub job_id: JobId,
    /// Monotonic per job, starting at 1.
    pub seq: u64,
    pub step: u32,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(job_id: JobId, seq: u64, step: u32, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            job_id,
            seq,
            step,
            kind,
            payload,
            at: Utc::now(),
        }
    }
}
