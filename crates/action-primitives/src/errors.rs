//! Error types for action primitives

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Ref belongs to another snapshot, or the page mutated since it was minted
    #[error("Stale ref: {0}")]
    StaleRef(String),

    /// Ref or node key could not be resolved
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Element is disabled
    #[error("Element not enabled: {0}")]
    NotEnabled(String),

    /// Dropdown or question option was not found
    #[error("Option not found: {0}")]
    OptionNotFound(String),

    /// Plan is structurally unusable (missing target, wrong control type)
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Wait timeout: {0}")]
    WaitTimeout(String),

    /// Operation was cancelled or interrupted
    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    /// Browser transport failure
    #[error("Browser I/O error: {0}")]
    BrowserIo(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActionError::WaitTimeout(_) | ActionError::BrowserIo(_) | ActionError::StaleRef(_)
        )
    }

    /// Get error severity level (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            ActionError::Internal(_) => 3,
            ActionError::BrowserIo(_) | ActionError::StaleRef(_) => 2,
            ActionError::WaitTimeout(_)
            | ActionError::ElementNotFound(_)
            | ActionError::NotEnabled(_)
            | ActionError::InvalidPlan(_) => 1,
            _ => 0,
        }
    }
}

impl From<perceiver_structural::PerceiverError> for ActionError {
    fn from(err: perceiver_structural::PerceiverError) -> Self {
        use perceiver_structural::PerceiverError;
        match err {
            PerceiverError::SnapshotStale { .. } => ActionError::StaleRef(err.to_string()),
            PerceiverError::ElementNotFound(msg) => ActionError::ElementNotFound(msg),
            PerceiverError::PageUnavailable(msg) => ActionError::BrowserIo(msg),
            PerceiverError::Internal(msg) => ActionError::Internal(msg),
        }
    }
}
