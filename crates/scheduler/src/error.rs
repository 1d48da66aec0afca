use agent_core::AgentError;
use formpilot_core_types::{JobId, PilotError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    Closed,
    #[error("job {0} is already scheduled")]
    Duplicate(JobId),
    #[error("unknown job {0}")]
    UnknownJob(JobId),
    #[error("job {0} was stopped before it started")]
    Stopped(JobId),
    #[error("could not open a session for {job}: {message}")]
    Session { job: JobId, message: String },
    #[error("no decision service for {job}: {message}")]
    Oracle { job: JobId, message: String },
    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),
    #[error("job task failed: {0}")]
    Join(String),
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl SchedulerError {
    pub fn session(job: &JobId, message: impl Into<String>) -> Self {
        Self::Session {
            job: job.clone(),
            message: message.into(),
        }
    }
}

impl SchedulerError {
    pub fn oracle(job: &JobId, message: impl Into<String>) -> Self {
        Self::Oracle {
            job: job.clone(),
            message: message.into(),
        }
    }
}

impl From<SchedulerError> for PilotError {
    fn from(value: SchedulerError) -> Self {
        PilotError::new(value.to_string())
    }
}
