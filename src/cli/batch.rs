use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use agent_core::{DecisionOracle, JobSession, JobSpec, WorkflowReport};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Args;
use formpilot_core_types::WorkflowEvent;
use formpilot_event_bus::{to_mpsc, EventBus, InMemoryBus};
use formpilot_scheduler::{
    OracleFactory, Scheduler, SchedulerError, SchedulerMetricsSnapshot, SessionFactory,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::context::CliContext;
use super::output::{print_json, OutputFormat};
use crate::fixture::Fixture;

const EVENT_BUFFER: usize = 256;

#[derive(Args, Clone, Debug)]
pub struct BatchArgs {
    /// Scenario files, one job each (YAML)
    #[arg(required = true, value_name = "FIXTURE")]
    pub fixtures: Vec<PathBuf>,

    /// Override `scheduler.worker_slots`
    #[arg(long)]
    pub slots: Option<usize>,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Serialize)]
struct BatchSummary {
    jobs: Vec<WorkflowReport>,
    metrics: SchedulerMetricsSnapshot,
}

/// Opens each job's scripted page from its fixture.
struct FixtureSessions {
    fixtures: Arc<HashMap<String, Fixture>>,
}

#[async_trait]
impl SessionFactory for FixtureSessions {
    async fn open(&self, spec: &JobSpec) -> Result<JobSession, SchedulerError> {
        let fixture = self
            .fixtures
            .get(spec.job_id.0.as_str())
            .ok_or_else(|| SchedulerError::session(&spec.job_id, "no fixture for job"))?;
        let (_, session) = fixture.session();
        Ok(session)
    }
}

fn fixture_oracles(fixtures: Arc<HashMap<String, Fixture>>) -> Arc<dyn OracleFactory> {
    Arc::new(
        move |spec: &JobSpec| -> Result<Arc<dyn DecisionOracle>, SchedulerError> {
            let fixture = fixtures
                .get(spec.job_id.0.as_str())
                .ok_or_else(|| SchedulerError::oracle(&spec.job_id, "no fixture for job"))?;
            let adapter = fixture
                .adapter()
                .map_err(|err| SchedulerError::oracle(&spec.job_id, format!("{err:#}")))?;
            Ok(Arc::new(adapter) as Arc<dyn DecisionOracle>)
        },
    )
}

pub async fn cmd_batch(args: BatchArgs, ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    let mut scheduler_config = config.scheduler.clone();
    if let Some(slots) = args.slots {
        scheduler_config.worker_slots = slots;
    }

    let mut loaded = Vec::with_capacity(args.fixtures.len());
    for path in &args.fixtures {
        loaded.push(Fixture::load(path).await?);
    }
    let mut fixtures = HashMap::new();
    for fixture in &loaded {
        if fixtures
            .insert(fixture.job_id.clone(), fixture.clone())
            .is_some()
        {
            bail!("job id {} appears in more than one fixture", fixture.job_id);
        }
    }
    let fixtures = Arc::new(fixtures);

    let bus = InMemoryBus::<WorkflowEvent>::new(EVENT_BUFFER);
    let mut events = to_mpsc(bus.clone(), EVENT_BUFFER);
    let live = matches!(args.output, OutputFormat::Text);
    let printer = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(event) = events.recv().await {
            seen += 1;
            if live {
                println!(
                    "[{}] #{:<3} {:<30} {}",
                    event.job_id,
                    event.seq,
                    event.kind.as_str(),
                    event.payload
                );
            } else {
                debug!(target: "batch", job = %event.job_id, seq = event.seq, kind = event.kind.as_str(), "event");
            }
        }
        seen
    });

    let scheduler = Scheduler::with_event_bus(
        scheduler_config,
        Arc::new(FixtureSessions {
            fixtures: fixtures.clone(),
        }),
        fixture_oracles(fixtures),
        config.workflow.clone(),
        bus as Arc<dyn EventBus<WorkflowEvent>>,
    )
    .context("Invalid scheduler configuration")?;
    info!(
        jobs = loaded.len(),
        slots = scheduler.available_slots(),
        "running batch"
    );

    let mut handles = Vec::with_capacity(loaded.len());
    for fixture in &loaded {
        let workflow = fixture
            .workflow
            .clone()
            .unwrap_or_else(|| config.workflow.clone());
        let handle = scheduler
            .submit_with_workflow(fixture.spec(), workflow)
            .with_context(|| format!("Failed to queue {}", fixture.job_id))?;
        handles.push(handle);
    }

    let mut jobs = Vec::with_capacity(handles.len());
    for handle in handles {
        let job_id = handle.job_id.clone();
        match handle.wait().await {
            Ok(report) => jobs.push(report),
            Err(err) => warn!(job = %job_id, error = %err, "job ended without a report"),
        }
    }
    let metrics = scheduler.metrics();

    // The bridge ends once the last bus handle is gone.
    drop(scheduler);
    let seen = printer.await.context("Event printer failed")?;
    debug!(target: "batch", events = seen, "event stream drained");

    let summary = BatchSummary { jobs, metrics };
    match args.output {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => print_summary(&summary),
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!("jobs:");
    for report in &summary.jobs {
        let record = &report.record;
        println!(
            "  {:<20} {:<16} {}",
            record.job_id.to_string(),
            record.status.as_str(),
            report.termination.reason()
        );
    }
    let metrics = &summary.metrics;
    println!(
        "submitted: {}  started: {}  applied: {}  manual: {}  failed: {}  cancelled: {}",
        metrics.submitted,
        metrics.started,
        metrics.applied,
        metrics.manual_required,
        metrics.failed,
        metrics.cancelled
    );
}
