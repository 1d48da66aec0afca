//! Workflow limits and pacing.

use action_flow::RetryPacing;
use action_gate::DEFAULT_COMPLETION_THRESHOLD;
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// Upper bound for chained actions per decision.
pub const MAX_CHAIN_LEN: u32 = 3;

/// Configuration for one job's observe-plan-act workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Observe cycles before the job is failed.
    /// Default: 40
    pub max_steps: u32,

    /// Actions taken from one decision, executed in order.
    /// Default: 1 (at most 3)
    pub max_actions_per_step: u32,

    /// Submit attempts per semantic key for retryable outcomes.
    /// Default: 3
    pub max_submit_attempts: u32,

    /// Screenshots attached to decision requests over the whole job.
    /// Default: 8
    pub visual_fallback_budget: u32,

    /// Score a completion assessment must reach.
    /// Default: 0.72
    pub completion_threshold: f64,

    /// History lines sent with each decision request.
    /// Default: 8
    pub history_window: usize,

    /// Timeout per action in milliseconds.
    /// Default: 15000
    pub action_timeout_ms: u64,

    /// Pause between chained actions in milliseconds.
    /// Default: 300
    pub wait_between_actions_ms: u64,

    /// Backoff window for retry tactics.
    /// Default: 900..1800 ms
    pub retry_pacing_ms: RetryPacing,

    /// Consecutive failed steps before the job is stopped.
    /// Default: 5
    pub max_consecutive_failures: u32,

    /// Soft refreshes the failure recovery path may spend.
    /// Default: 1
    pub max_refresh_attempts: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_steps: 40,
            max_actions_per_step: 1,
            max_submit_attempts: 3,
            visual_fallback_budget: 8,
            completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            history_window: 8,
            action_timeout_ms: 15_000,
            wait_between_actions_ms: 300,
            retry_pacing_ms: RetryPacing::default(),
            max_consecutive_failures: 5,
            max_refresh_attempts: 1,
        }
    }
}

impl WorkflowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// No pacing at all; used by tests and offline replays.
    pub fn minimal() -> Self {
        Self {
            max_steps: 20,
            action_timeout_ms: 2_000,
            wait_between_actions_ms: 0,
            retry_pacing_ms: RetryPacing { min_ms: 0, max_ms: 0 },
            ..Self::default()
        }
    }

    /// Builder: set max steps.
    pub fn max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }

    /// Builder: set chained actions per decision.
    pub fn actions_per_step(mut self, count: u32) -> Self {
        self.max_actions_per_step = count;
        self
    }

    pub fn submit_attempts(mut self, attempts: u32) -> Self {
        self.max_submit_attempts = attempts;
        self
    }

    pub fn visual_budget(mut self, budget: u32) -> Self {
        self.visual_fallback_budget = budget;
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_steps == 0 {
            return Err(AgentError::invalid_config("max_steps must be positive"));
        }
        if self.max_actions_per_step == 0 || self.max_actions_per_step > MAX_CHAIN_LEN {
            return Err(AgentError::invalid_config(format!(
                "max_actions_per_step must be within 1..={MAX_CHAIN_LEN}"
            )));
        }
        if self.max_submit_attempts == 0 {
            return Err(AgentError::invalid_config(
                "max_submit_attempts must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.completion_threshold) {
            return Err(AgentError::invalid_config(
                "completion_threshold must be within 0..=1",
            ));
        }
        if self.retry_pacing_ms.min_ms > self.retry_pacing_ms.max_ms {
            return Err(AgentError::invalid_config(
                "retry_pacing_ms.min_ms exceeds max_ms",
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(AgentError::invalid_config(
                "max_consecutive_failures must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.max_steps, 40);
        assert_eq!(config.max_submit_attempts, 3);
        assert_eq!(config.visual_fallback_budget, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = WorkflowConfig::new().max_steps(5).actions_per_step(3);
        assert_eq!(config.max_steps, 5);
        assert!(config.validate().is_ok());
        assert!(config.actions_per_step(4).validate().is_err());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: WorkflowConfig = serde_json::from_str(r#"{"max_steps": 12}"#).unwrap();
        assert_eq!(config.max_steps, 12);
        assert_eq!(config.history_window, 8);
        assert_eq!(config.retry_pacing_ms.max_ms, 1_800);
    }
}
