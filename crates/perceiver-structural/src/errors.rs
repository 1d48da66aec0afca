use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PerceiverError {
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("snapshot stale: built at page version {snapshot}, page is at {current}")]
    SnapshotStale { snapshot: u64, current: u64 },
    #[error("page unavailable: {0}")]
    PageUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PerceiverError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PerceiverError::PageUnavailable(_))
    }
}
