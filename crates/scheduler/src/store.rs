use agent_core::{AgentError, JobRecord, JobStore};
use async_trait::async_trait;
use dashmap::DashMap;
use formpilot_core_types::{JobId, JobStatus};
use tracing::debug;

/// Keeps the latest checkpoint of every job in memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: DashMap<JobId, JobRecord>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.records.get(job_id).map(|entry| entry.clone())
    }

    pub fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.records.get(job_id).map(|entry| entry.status)
    }

    pub fn records(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.job_id.0.cmp(&b.job_id.0));
        records
    }

    pub(crate) fn put(&self, record: JobRecord) {
        debug!(target: "scheduler.store", job = %record.job_id, status = record.status.as_str(), "checkpoint");
        self.records.insert(record.job_id.clone(), record);
    }

    pub(crate) fn contains(&self, job_id: &JobId) -> bool {
        self.records.contains_key(job_id)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn load(&self, job_id: &JobId) -> Result<Option<JobRecord>, AgentError> {
        Ok(self.get(job_id))
    }

    async fn save(&self, record: &JobRecord) -> Result<(), AgentError> {
        self.put(record.clone());
        Ok(())
    }
}
