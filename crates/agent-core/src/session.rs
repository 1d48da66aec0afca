use std::sync::Arc;

use action_primitives::{ActionPrimitives, ScriptedPage};
use formpilot_core_types::{JobId, SessionId};
use perceiver_structural::PerceptionPort;
use serde::{Deserialize, Serialize};

/// Browser session owned by exactly one job.
#[derive(Clone)]
pub struct JobSession {
    pub id: SessionId,
    pub perception: Arc<dyn PerceptionPort>,
    pub primitives: Arc<dyn ActionPrimitives>,
}

impl JobSession {
    pub fn new(perception: Arc<dyn PerceptionPort>, primitives: Arc<dyn ActionPrimitives>) -> Self {
        Self {
            id: SessionId::new(),
            perception,
            primitives,
        }
    }

    /// Both ports served by one in-memory page.
    pub fn from_page(page: Arc<ScriptedPage>) -> Self {
        Self::new(page.clone(), page)
    }
}

/// What the job is about: who applies and which file may be uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: JobId,
    /// Applicant facts handed to the decision service
    #[serde(default)]
    pub profile: String,
    /// The only file `upload_file` may attach
    #[serde(default)]
    pub upload_path: Option<String>,
}

impl JobSpec {
    pub fn new(job_id: impl Into<JobId>, profile: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            profile: profile.into(),
            upload_path: None,
        }
    }

    pub fn with_upload(mut self, path: impl Into<String>) -> Self {
        self.upload_path = Some(path.into());
        self
    }
}
