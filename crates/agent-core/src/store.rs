//! Job record and the checkpoint store it is persisted through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use formpilot_core_types::{JobId, JobStatus, OutcomeClass, WorkflowPhase};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// Persistence contract of one job, written only at checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub phase: WorkflowPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome_class: Option<OutcomeClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
    pub steps: u32,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            phase: WorkflowPhase::Observe,
            failure_class: None,
            failure_code: None,
            retry_count: 0,
            last_outcome_class: None,
            last_outcome_at: None,
            last_error_snippet: None,
            manual_reason: None,
            fail_reason: None,
            steps: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Human-readable reason for a non-applied terminal state.
    pub fn reason(&self) -> Option<&str> {
        self.manual_reason
            .as_deref()
            .or(self.fail_reason.as_deref())
    }
}

/// Where checkpoints go. Implementations must tolerate repeated saves of the
/// same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, job_id: &JobId) -> Result<Option<JobRecord>, AgentError>;

    async fn save(&self, record: &JobRecord) -> Result<(), AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_without_empty_fields() {
        let mut record = JobRecord::new(JobId::from("job-7"));
        record.status = JobStatus::ManualRequired;
        record.manual_reason = Some("reason=loop_guard_stop".to_string());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "manual_required");
        assert_eq!(value["job_id"], "job-7");
        assert!(value.get("fail_reason").is_none());
        assert_eq!(record.reason(), Some("reason=loop_guard_stop"));
        assert!(record.is_terminal());
    }
}
