use async_trait::async_trait;

use crate::errors::PerceiverError;
use crate::model::RawPage;

/// Read side of the browser layer, owned by exactly one job session.
#[async_trait]
pub trait PerceptionPort: Send + Sync {
    /// Structural state of the page as currently rendered.
    async fn observe(&self) -> Result<RawPage, PerceiverError>;

    /// Current mutation counter, cheap to query.
    async fn page_version(&self) -> Result<u64, PerceiverError>;

    /// Screenshot bytes (PNG). Callers are responsible for budgeting.
    async fn screenshot(&self) -> Result<Vec<u8>, PerceiverError>;
}
