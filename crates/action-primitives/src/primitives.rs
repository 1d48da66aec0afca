//! Browser action port.
//!
//! Every primitive addresses an element by its browser node key; ref-id
//! resolution and staleness checks happen one layer up, in the executor.

use async_trait::async_trait;

use crate::errors::ActionError;
use crate::types::{ActionReport, ExecCtx, Key, ScrollTarget};

#[async_trait]
pub trait ActionPrimitives: Send + Sync {
    async fn click(&self, ctx: &ExecCtx, node_key: &str) -> Result<ActionReport, ActionError>;

    /// Replace the field's value with `text`.
    async fn fill(
        &self,
        ctx: &ExecCtx,
        node_key: &str,
        text: &str,
    ) -> Result<ActionReport, ActionError>;

    /// Select a dropdown option by visible text.
    async fn select_option(
        &self,
        ctx: &ExecCtx,
        node_key: &str,
        option: &str,
    ) -> Result<ActionReport, ActionError>;

    async fn set_checked(
        &self,
        ctx: &ExecCtx,
        node_key: &str,
        checked: bool,
    ) -> Result<ActionReport, ActionError>;

    /// Attach a local file to a file input.
    async fn upload(
        &self,
        ctx: &ExecCtx,
        node_key: &str,
        path: &str,
    ) -> Result<ActionReport, ActionError>;

    async fn scroll(&self, ctx: &ExecCtx, target: ScrollTarget)
        -> Result<ActionReport, ActionError>;

    async fn press_key(&self, ctx: &ExecCtx, key: Key) -> Result<ActionReport, ActionError>;

    /// Soft reload of the current document.
    async fn refresh(&self, ctx: &ExecCtx) -> Result<ActionReport, ActionError>;

    /// Wait up to `ms`, or until `text` is visible when given.
    async fn wait(
        &self,
        ctx: &ExecCtx,
        ms: u64,
        text: Option<&str>,
    ) -> Result<ActionReport, ActionError>;
}
