use std::sync::Arc;

use agent_core::{DecisionOracle, JobSession, JobSpec, RunControl, WorkflowReport};
use async_trait::async_trait;
use formpilot_core_types::JobId;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::SchedulerError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Jobs allowed to run at the same time
    pub worker_slots: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { worker_slots: 2 }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_slots == 0 {
            return Err(SchedulerError::InvalidConfig(
                "worker_slots must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Opens the browser session a job owns for its whole run.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, spec: &JobSpec) -> Result<JobSession, SchedulerError>;
}

/// Builds the decision oracle for one job.
///
/// Oracles carry job state (the model that last answered), so every job gets
/// its own instance.
pub trait OracleFactory: Send + Sync {
    fn oracle(&self, spec: &JobSpec) -> Result<Arc<dyn DecisionOracle>, SchedulerError>;
}

impl<F> OracleFactory for F
where
    F: Fn(&JobSpec) -> Result<Arc<dyn DecisionOracle>, SchedulerError> + Send + Sync,
{
    fn oracle(&self, spec: &JobSpec) -> Result<Arc<dyn DecisionOracle>, SchedulerError> {
        self(spec)
    }
}

/// Handle to one scheduled job.
pub struct JobHandle {
    pub job_id: JobId,
    control: RunControl,
    task: JoinHandle<Result<WorkflowReport, SchedulerError>>,
}

impl JobHandle {
    pub(crate) fn new(
        job_id: JobId,
        control: RunControl,
        task: JoinHandle<Result<WorkflowReport, SchedulerError>>,
    ) -> Self {
        Self {
            job_id,
            control,
            task,
        }
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Waits for the job to reach a terminal state.
    pub async fn wait(self) -> Result<WorkflowReport, SchedulerError> {
        self.task
            .await
            .map_err(|err| SchedulerError::Join(err.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_slots_are_rejected() {
        assert!(SchedulerConfig::default().validate().is_ok());
        let config = SchedulerConfig { worker_slots: 0 };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
