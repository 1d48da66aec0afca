//! Per-call context and reports shared by every page primitive.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use formpilot_core_types::JobId;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::ActionError;

/// Execution context for one primitive call.
#[derive(Clone, Debug)]
pub struct ExecCtx {
    pub job_id: JobId,
    pub deadline: Instant,
    /// Child of the job's token; stop and shutdown both reach it
    pub cancel_token: CancellationToken,
    /// Correlates log lines of one primitive call
    pub action_id: String,
}

impl ExecCtx {
    pub fn new(job_id: JobId, timeout: Duration, cancel_token: CancellationToken) -> Self {
        Self {
            job_id,
            deadline: Instant::now() + timeout,
            cancel_token,
            action_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn is_timeout(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Fails fast when the context is already cancelled or past its deadline.
    pub fn precheck(&self) -> Result<(), ActionError> {
        if self.is_cancelled() {
            return Err(ActionError::Interrupted("context cancelled".to_string()));
        }
        if self.is_timeout() {
            return Err(ActionError::WaitTimeout("context deadline exceeded".to_string()));
        }
        Ok(())
    }
}

/// Report of one primitive call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub ok: bool,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub finished_at: DateTime<Utc>,

    pub latency_ms: u64,

    /// Page version after the primitive returned
    pub page_version: Option<u64>,

    pub error: Option<String>,
}

impl ActionReport {
    pub fn success(started_at: DateTime<Utc>, latency_ms: u64) -> Self {
        Self {
            ok: true,
            started_at,
            finished_at: Utc::now(),
            latency_ms,
            page_version: None,
            error: None,
        }
    }

    pub fn failure(started_at: DateTime<Utc>, latency_ms: u64, error: ActionError) -> Self {
        Self {
            ok: false,
            started_at,
            finished_at: Utc::now(),
            latency_ms,
            page_version: None,
            error: Some(error.to_string()),
        }
    }

    pub fn with_page_version(mut self, version: u64) -> Self {
        self.page_version = Some(version);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollTarget {
    Top,
    Bottom,
    /// Scroll the node into view
    Node(String),
    /// Scroll by pixel amount (positive=down, negative=up)
    Pixels(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Tab,
    ShiftTab,
    Enter,
    Escape,
}
