//! Executor error types

use action_gate::GateError;
use action_primitives::ActionError;
use perceiver_structural::PerceiverError;
use thiserror::Error;

/// Errors that stop an action before or around execution.
///
/// A primitive that runs but fails is not an error here; it comes back as an
/// unsuccessful [`crate::ActionResult`] so the loop guard can count it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlowError {
    /// Plan references a snapshot that is no longer current
    #[error("Stale reference: {0}")]
    StaleRef(String),

    /// Target could not be resolved against the snapshot
    #[error("Unresolvable target: {0}")]
    Unresolvable(String),

    /// Plan is structurally unusable (no target where one is required)
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Observation failed: {0}")]
    Perception(#[from] PerceiverError),

    #[error("Action primitive error: {0}")]
    Action(#[from] ActionError),

    #[error("Gate validation error: {0}")]
    Gate(#[from] GateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    pub fn is_stale(&self) -> bool {
        matches!(self, FlowError::StaleRef(_))
            || matches!(self, FlowError::Action(ActionError::StaleRef(_)))
    }

    /// Rejections the orchestrator answers with a fresh observation and replan.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::StaleRef(_) | FlowError::Unresolvable(_) | FlowError::InvalidPlan(_) => true,
            FlowError::Perception(err) => err.is_retryable(),
            FlowError::Action(err) => err.is_retryable(),
            FlowError::Gate(err) => err.is_retryable(),
            FlowError::Internal(_) => false,
        }
    }
}
