use action_flow::FlowError;
use perceiver_structural::PerceiverError;
use thiserror::Error;

/// Errors emitted by the agent-core crate.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Raised when a workflow configuration is out of range.
    #[error("invalid workflow config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Perception(#[from] PerceiverError),

    /// Raised when the job store refuses a checkpoint.
    #[error("job store failure: {0}")]
    Store(String),

    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Typed failure of one decision-service call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecisionError {
    #[error("decision service rate limited: {0}")]
    RateLimited(String),

    /// Model rejected the request shape (vision input, unknown model, ...)
    #[error("model capability mismatch: {0}")]
    CapabilityMismatch(String),

    #[error("decision call failed: {0}")]
    Other(String),

    /// Reply arrived but did not match the decision schema. The raw text is
    /// kept for the terminal guard.
    #[error("malformed decision: {reason}")]
    Malformed { reason: String, raw: String },
}

impl DecisionError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited(message.into())
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::CapabilityMismatch(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    pub fn malformed(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            DecisionError::RateLimited(_) => "rate_limited",
            DecisionError::CapabilityMismatch(_) => "capability_mismatch",
            DecisionError::Other(_) => "other_error",
            DecisionError::Malformed { .. } => "malformed",
        }
    }

    /// Whether the adapter may move on to the next configured model.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            DecisionError::RateLimited(_) | DecisionError::CapabilityMismatch(_)
        )
    }

    /// Fatal for the step: no configured model can serve the request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecisionError::CapabilityMismatch(_))
    }

    pub fn raw_text(&self) -> Option<&str> {
        match self {
            DecisionError::Malformed { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
