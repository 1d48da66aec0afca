use std::sync::Arc;

use agent_core::{
    JobRecord, JobSpec, RunControl, RunSignal, WorkflowConfig, WorkflowOrchestrator,
    WorkflowReport,
};
use dashmap::DashMap;
use formpilot_core_types::{JobId, JobStatus, WorkflowEvent};
use formpilot_event_bus::{EventBus, JobJournal};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::metrics::{Counters, SchedulerMetricsSnapshot};
use crate::model::{JobHandle, OracleFactory, SchedulerConfig, SessionFactory};
use crate::store::InMemoryJobStore;

struct Shared {
    slots: Arc<Semaphore>,
    sessions: Arc<dyn SessionFactory>,
    oracles: Arc<dyn OracleFactory>,
    workflow: WorkflowConfig,
    store: Arc<InMemoryJobStore>,
    events: Option<Arc<dyn EventBus<WorkflowEvent>>>,
    controls: DashMap<JobId, RunControl>,
    counters: Counters,
    shutdown: CancellationToken,
}

/// Worker pool for job instances. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Shared>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        sessions: Arc<dyn SessionFactory>,
        oracles: Arc<dyn OracleFactory>,
    ) -> Result<Self, SchedulerError> {
        Self::with_workflow(config, sessions, oracles, WorkflowConfig::default())
    }

    /// `workflow` applies to every job submitted without its own limits.
    pub fn with_workflow(
        config: SchedulerConfig,
        sessions: Arc<dyn SessionFactory>,
        oracles: Arc<dyn OracleFactory>,
        workflow: WorkflowConfig,
    ) -> Result<Self, SchedulerError> {
        Self::build(config, sessions, oracles, workflow, None)
    }

    /// Like [`Scheduler::with_workflow`], forwarding every job's events to `bus`.
    pub fn with_event_bus(
        config: SchedulerConfig,
        sessions: Arc<dyn SessionFactory>,
        oracles: Arc<dyn OracleFactory>,
        workflow: WorkflowConfig,
        bus: Arc<dyn EventBus<WorkflowEvent>>,
    ) -> Result<Self, SchedulerError> {
        Self::build(config, sessions, oracles, workflow, Some(bus))
    }

    fn build(
        config: SchedulerConfig,
        sessions: Arc<dyn SessionFactory>,
        oracles: Arc<dyn OracleFactory>,
        workflow: WorkflowConfig,
        events: Option<Arc<dyn EventBus<WorkflowEvent>>>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        workflow.validate()?;
        Ok(Self {
            inner: Arc::new(Shared {
                slots: Arc::new(Semaphore::new(config.worker_slots)),
                sessions,
                oracles,
                workflow,
                store: Arc::new(InMemoryJobStore::new()),
                events,
                controls: DashMap::new(),
                counters: Counters::default(),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn store(&self) -> Arc<InMemoryJobStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.inner.counters.snapshot()
    }

    /// Jobs submitted and not yet finished, queued ones included.
    pub fn active(&self) -> usize {
        self.inner.controls.len()
    }

    pub fn available_slots(&self) -> usize {
        self.inner.slots.available_permits()
    }

    /// Queues a job. It starts as soon as a worker slot frees up.
    pub fn submit(&self, spec: JobSpec) -> Result<JobHandle, SchedulerError> {
        let workflow = self.inner.workflow.clone();
        self.submit_with_workflow(spec, workflow)
    }

    /// Queues a job with its own workflow limits.
    pub fn submit_with_workflow(
        &self,
        spec: JobSpec,
        workflow: WorkflowConfig,
    ) -> Result<JobHandle, SchedulerError> {
        workflow.validate()?;
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::Closed);
        }
        let job_id = spec.job_id.clone();
        if self.inner.controls.contains_key(&job_id) || self.inner.store.contains(&job_id) {
            return Err(SchedulerError::Duplicate(job_id));
        }

        let control = RunControl::new();
        self.inner.controls.insert(job_id.clone(), control.clone());
        self.inner.store.put(JobRecord::new(job_id.clone()));
        self.inner.counters.record_submitted();
        info!(target: "scheduler", job = %job_id, "job queued");

        let shared = Arc::clone(&self.inner);
        let job_control = control.clone();
        let key = job_id.clone();
        let task = tokio::spawn(async move {
            let result = run_job(&shared, spec, workflow, &job_control).await;
            shared.controls.remove(&key);
            result
        });
        Ok(JobHandle::new(job_id, control, task))
    }

    pub fn pause(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        self.control(job_id)?.pause();
        Ok(())
    }

    pub fn resume(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        self.control(job_id)?.resume();
        Ok(())
    }

    pub fn stop(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        self.control(job_id)?.stop();
        Ok(())
    }

    /// Refuses new jobs and stops the ones still running.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        for entry in self.inner.controls.iter() {
            entry.value().stop();
        }
        self.inner.slots.close();
    }

    fn control(&self, job_id: &JobId) -> Result<RunControl, SchedulerError> {
        self.inner
            .controls
            .get(job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SchedulerError::UnknownJob(job_id.clone()))
    }
}

async fn run_job(
    shared: &Shared,
    spec: JobSpec,
    workflow: WorkflowConfig,
    control: &RunControl,
) -> Result<WorkflowReport, SchedulerError> {
    let job_id = spec.job_id.clone();
    let _permit = match Arc::clone(&shared.slots).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            finish_unstarted(shared, &job_id, "reason=scheduler_shutdown");
            return Err(SchedulerError::Closed);
        }
    };

    if control.signal() == RunSignal::Stop {
        shared.counters.record_cancelled();
        finish_unstarted(shared, &job_id, "reason=stopped_by_operator; phase=queued");
        return Err(SchedulerError::Stopped(job_id));
    }

    let oracle = match shared.oracles.oracle(&spec) {
        Ok(oracle) => oracle,
        Err(err) => {
            warn!(target: "scheduler", job = %job_id, error = %err, "decision service unavailable");
            shared.counters.record_finished(JobStatus::Failed);
            finish_unstarted(
                shared,
                &job_id,
                &format!("reason=decision_service_unavailable; error={err}"),
            );
            return Err(err);
        }
    };
    let session = match shared.sessions.open(&spec).await {
        Ok(session) => session,
        Err(err) => {
            warn!(target: "scheduler", job = %job_id, error = %err, "session unavailable");
            shared.counters.record_finished(JobStatus::Failed);
            finish_unstarted(
                shared,
                &job_id,
                &format!("reason=session_unavailable; error={err}"),
            );
            return Err(err);
        }
    };
    shared.counters.record_started();
    info!(target: "scheduler", job = %job_id, session = %session.id, "job started");

    let mut journal = JobJournal::new(job_id.clone());
    if let Some(bus) = &shared.events {
        journal = journal.with_bus(Arc::clone(bus));
    }
    let orchestrator = WorkflowOrchestrator::new(spec, session, oracle, workflow)?
        .with_journal(Arc::new(journal))
        .with_store(shared.store.clone())
        .with_control(control)
        .with_cancel_token(shared.shutdown.child_token());

    let report = orchestrator.run().await?;
    shared.counters.record_finished(report.record.status);
    info!(
        target: "scheduler",
        job = %job_id,
        status = report.record.status.as_str(),
        steps = report.record.steps,
        "job finished"
    );
    Ok(report)
}

fn finish_unstarted(shared: &Shared, job_id: &JobId, reason: &str) {
    let mut record = shared
        .store
        .get(job_id)
        .unwrap_or_else(|| JobRecord::new(job_id.clone()));
    record.status = JobStatus::Failed;
    record.fail_reason = Some(reason.to_string());
    record.touch();
    shared.store.put(record);
}
