//! Error types for gate validation

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Criterion cannot be evaluated for this action (e.g. no target)
    #[error("Criterion not applicable: {0}")]
    NotApplicable(String),

    /// Target element disappeared from the re-observed page
    #[error("Target missing after action: {0}")]
    TargetMissing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GateError::TargetMissing(_))
    }
}
