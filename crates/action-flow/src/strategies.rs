//! Submit retry tactics
//!
//! Blocked or transient submissions are retried with legal, non-identical
//! pacing: a timed wait, a small scroll nudge, a focus round-trip, and at most
//! one soft refresh per job.

use action_primitives::{ActionError, ActionPrimitives, ExecCtx, Key, ScrollTarget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tactic", rename_all = "snake_case")]
pub enum RetryTactic {
    TimedWait { ms: u64 },
    /// Scroll down then partly back up
    ScrollNudge,
    /// Tab away and back to the current field
    Refocus,
    SoftRefresh,
}

impl RetryTactic {
    pub fn name(&self) -> &'static str {
        match self {
            RetryTactic::TimedWait { .. } => "timed_wait",
            RetryTactic::ScrollNudge => "scroll_nudge",
            RetryTactic::Refocus => "refocus",
            RetryTactic::SoftRefresh => "soft_refresh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPacing {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for RetryPacing {
    fn default() -> Self {
        Self {
            min_ms: 900,
            max_ms: 1_800,
        }
    }
}

/// Retry handler trait
#[async_trait]
pub trait RetryHandler: Send + Sync {
    /// Tactics for the given retry (1-based). `refreshes_used` counts soft
    /// refreshes already spent by the job.
    fn tactics_for(&self, attempt: u32, refreshes_used: u32) -> Vec<RetryTactic>;

    /// Wait before the given retry
    fn calculate_backoff(&self, attempt: u32) -> Duration;

    /// Applies tactics in order, returning the names of those applied.
    async fn apply(
        &self,
        primitives: &dyn ActionPrimitives,
        ctx: &ExecCtx,
        tactics: &[RetryTactic],
    ) -> Result<Vec<String>, ActionError>;
}

#[derive(Debug, Clone)]
pub struct DefaultRetryHandler {
    pacing: RetryPacing,
    max_refresh: u32,
}

impl DefaultRetryHandler {
    pub fn new(pacing: RetryPacing, max_refresh: u32) -> Self {
        Self {
            pacing,
            max_refresh,
        }
    }
}

impl Default for DefaultRetryHandler {
    fn default() -> Self {
        Self::new(RetryPacing::default(), 1)
    }
}

#[async_trait]
impl RetryHandler for DefaultRetryHandler {
    fn tactics_for(&self, attempt: u32, refreshes_used: u32) -> Vec<RetryTactic> {
        let wait = RetryTactic::TimedWait {
            ms: self.calculate_backoff(attempt).as_millis() as u64,
        };
        if attempt <= 1 {
            return vec![wait, RetryTactic::ScrollNudge, RetryTactic::Refocus];
        }
        if refreshes_used < self.max_refresh {
            vec![wait, RetryTactic::SoftRefresh]
        } else {
            vec![wait, RetryTactic::Refocus, RetryTactic::ScrollNudge]
        }
    }

    fn calculate_backoff(&self, attempt: u32) -> Duration {
        // Doubling from min_ms, capped at max_ms
        let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1));
        let total = self.pacing.min_ms.saturating_mul(multiplier);
        Duration::from_millis(total.min(self.pacing.max_ms.max(self.pacing.min_ms)))
    }

    async fn apply(
        &self,
        primitives: &dyn ActionPrimitives,
        ctx: &ExecCtx,
        tactics: &[RetryTactic],
    ) -> Result<Vec<String>, ActionError> {
        let mut applied = Vec::with_capacity(tactics.len());
        for tactic in tactics {
            debug!(target: "action.retry", tactic = tactic.name(), "applying");
            match tactic {
                RetryTactic::TimedWait { ms } => {
                    primitives.wait(ctx, *ms, None).await?;
                }
                RetryTactic::ScrollNudge => {
                    primitives.scroll(ctx, ScrollTarget::Pixels(120)).await?;
                    primitives.scroll(ctx, ScrollTarget::Pixels(-80)).await?;
                }
                RetryTactic::Refocus => {
                    primitives.press_key(ctx, Key::Tab).await?;
                    primitives.press_key(ctx, Key::ShiftTab).await?;
                }
                RetryTactic::SoftRefresh => {
                    primitives.refresh(ctx).await?;
                }
            }
            applied.push(tactic.name().to_string());
        }
        info!(target: "action.retry", tactics = ?applied, "retry tactics applied");
        Ok(applied)
    }
}
