use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use action_primitives::{ActionPlan, PageTransition, PlannedAction, ScriptedPage};
use agent_core::decision::{ChatModel, DecisionAdapter, ScriptedChatModel};
use agent_core::{
    Decision, DecisionError, DecisionOracle, DecisionRequest, DecisionStatus, JobSession, JobSpec,
    WorkflowConfig,
};
use async_trait::async_trait;
use formpilot_core_types::{EventKind, JobId, JobStatus, WorkflowEvent};
use formpilot_event_bus::{to_mpsc, InMemoryBus};
use formpilot_scheduler::{
    OracleFactory, Scheduler, SchedulerConfig, SchedulerError, SessionFactory,
};
use perceiver_structural::{RawNode, RawPage};

/// Submits on every call, tracking how many calls overlap.
#[derive(Default)]
struct SlowSubmitter {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl DecisionOracle for SlowSubmitter {
    async fn decide(&self, _request: &DecisionRequest) -> Result<Decision, DecisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Decision {
            status: DecisionStatus::Continue,
            summary: "submit the completed form".to_string(),
            plans: vec![ActionPlan::new(PlannedAction::Submit { ref_id: None })],
            model_index: 0,
        })
    }
}

/// One fresh application page per job; `broken-*` jobs get no session.
struct FormFactory {
    opened: AtomicUsize,
}

#[async_trait]
impl SessionFactory for FormFactory {
    async fn open(&self, spec: &JobSpec) -> Result<JobSession, SchedulerError> {
        if spec.job_id.0.starts_with("broken") {
            return Err(SchedulerError::session(&spec.job_id, "browser crashed"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(JobSession::from_page(Arc::new(application_page())))
    }
}

fn application_page() -> ScriptedPage {
    let page = RawPage {
        url: "https://jobs.example.org/openings/88/apply".to_string(),
        title: "Apply".to_string(),
        visible_text: "Data Engineer".to_string(),
        version: 1,
        nodes: vec![
            RawNode {
                node_key: "name".to_string(),
                role: "textbox".to_string(),
                name: "Full name".to_string(),
                value: "Grace Hopper".to_string(),
                required: true,
                visible: true,
                ..RawNode::default()
            },
            RawNode {
                node_key: "submit".to_string(),
                role: "button".to_string(),
                name: "Submit application".to_string(),
                visible: true,
                ..RawNode::default()
            },
        ],
    };
    ScriptedPage::new(page).on_click(
        "submit",
        PageTransition {
            title: Some("Application Submitted".to_string()),
            visible_text: Some("Thank you for applying.".to_string()),
            nodes: Some(Vec::new()),
            ..PageTransition::default()
        },
    )
}

const SUBMIT: &str = r#"{"status":"continue","actions":[{"action":"submit"}]}"#;

/// Hands the same stateless oracle to every job.
fn shared(oracle: Arc<SlowSubmitter>) -> Arc<dyn OracleFactory> {
    Arc::new(
        move |_: &JobSpec| -> Result<Arc<dyn DecisionOracle>, SchedulerError> {
            Ok(oracle.clone() as Arc<dyn DecisionOracle>)
        },
    )
}

fn form_factory() -> Arc<FormFactory> {
    Arc::new(FormFactory {
        opened: AtomicUsize::new(0),
    })
}

fn scheduler(slots: usize, oracle: Arc<SlowSubmitter>) -> (Scheduler, Arc<FormFactory>) {
    let factory = form_factory();
    let scheduler = Scheduler::with_workflow(
        SchedulerConfig {
            worker_slots: slots,
        },
        factory.clone(),
        shared(oracle),
        WorkflowConfig::minimal(),
    )
    .unwrap();
    (scheduler, factory)
}

fn spec(id: &str) -> JobSpec {
    JobSpec::new(id, "Name: Grace Hopper")
}

#[tokio::test]
async fn worker_slots_bound_concurrent_jobs() {
    let oracle = Arc::new(SlowSubmitter::default());
    let (scheduler, factory) = scheduler(2, oracle.clone());

    let handles: Vec<_> = (0..4)
        .map(|i| scheduler.submit(spec(&format!("job-{i}"))).unwrap())
        .collect();
    for handle in handles {
        let report = handle.wait().await.unwrap();
        assert_eq!(report.record.status, JobStatus::Applied);
    }

    assert!(oracle.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 4);
    assert_eq!(factory.opened.load(Ordering::SeqCst), 4);
    assert_eq!(scheduler.available_slots(), 2);
    assert_eq!(scheduler.active(), 0);
    let metrics = scheduler.metrics();
    assert_eq!(metrics.submitted, 4);
    assert_eq!(metrics.applied, 4);
    assert!(scheduler
        .store()
        .records()
        .iter()
        .all(|r| r.status == JobStatus::Applied));
}

#[tokio::test]
async fn stopping_a_queued_job_never_opens_a_session() {
    let oracle = Arc::new(SlowSubmitter::default());
    let (scheduler, factory) = scheduler(1, oracle);

    let first = scheduler.submit(spec("job-a")).unwrap();
    let second = scheduler.submit(spec("job-b")).unwrap();
    scheduler.stop(&JobId::from("job-b")).unwrap();

    assert!(first.wait().await.is_ok());
    assert!(matches!(second.wait().await, Err(SchedulerError::Stopped(_))));
    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);

    let record = scheduler.store().get(&JobId::from("job-b")).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(
        record.fail_reason.as_deref(),
        Some("reason=stopped_by_operator; phase=queued")
    );
    assert_eq!(scheduler.metrics().cancelled, 1);
}

#[tokio::test]
async fn paused_job_waits_for_resume() {
    let oracle = Arc::new(SlowSubmitter::default());
    let (scheduler, _factory) = scheduler(1, oracle.clone());
    let job = JobId::from("job-p");

    let handle = scheduler.submit(spec("job-p")).unwrap();
    scheduler.pause(&job).unwrap();

    let store = scheduler.store();
    let mut paused = false;
    for _ in 0..200 {
        if store.status(&job) == Some(JobStatus::Paused) {
            paused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(paused, "job never reached paused");
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);

    scheduler.resume(&job).unwrap();
    let report = handle.wait().await.unwrap();
    assert_eq!(report.record.status, JobStatus::Applied);
}

#[tokio::test]
async fn duplicate_and_unknown_jobs_are_rejected() {
    let oracle = Arc::new(SlowSubmitter::default());
    let (scheduler, _factory) = scheduler(2, oracle);

    let handle = scheduler.submit(spec("job-1")).unwrap();
    assert!(matches!(
        scheduler.submit(spec("job-1")),
        Err(SchedulerError::Duplicate(_))
    ));
    assert!(matches!(
        scheduler.pause(&JobId::from("nope")),
        Err(SchedulerError::UnknownJob(_))
    ));
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn session_failure_fails_only_that_job() {
    let oracle = Arc::new(SlowSubmitter::default());
    let (scheduler, _factory) = scheduler(2, oracle);

    let broken = scheduler.submit(spec("broken-1")).unwrap();
    let healthy = scheduler.submit(spec("job-ok")).unwrap();

    assert!(matches!(
        broken.wait().await,
        Err(SchedulerError::Session { .. })
    ));
    assert_eq!(
        healthy.wait().await.unwrap().record.status,
        JobStatus::Applied
    );
    let record = scheduler.store().get(&JobId::from("broken-1")).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record
        .fail_reason
        .unwrap()
        .starts_with("reason=session_unavailable"));
}

#[tokio::test]
async fn shutdown_refuses_new_jobs() {
    let oracle = Arc::new(SlowSubmitter::default());
    let (scheduler, _factory) = scheduler(1, oracle);
    scheduler.shutdown();
    assert!(matches!(
        scheduler.submit(spec("late")),
        Err(SchedulerError::Closed)
    ));
}

#[tokio::test]
async fn shutdown_during_a_decision_stops_the_running_job() {
    let oracle = Arc::new(SlowSubmitter::default());
    let (scheduler, _factory) = scheduler(1, oracle.clone());
    let handle = scheduler.submit(spec("job-s")).unwrap();

    for _ in 0..200 {
        if oracle.in_flight.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    scheduler.shutdown();

    let report = handle.wait().await.unwrap();
    assert_eq!(report.record.status, JobStatus::Failed);
    let reason = report.record.fail_reason.unwrap();
    assert!(reason.starts_with("reason=stopped_by_operator"), "{reason}");
    assert!(reason.contains("source=shutdown"), "{reason}");
    assert_eq!(scheduler.metrics().failed, 1);
}

#[tokio::test]
async fn model_fallback_is_remembered_per_job() {
    // Both jobs share the model clients; each job builds its own adapter.
    let primary = Arc::new(ScriptedChatModel::new(
        "primary",
        vec![
            Err(DecisionError::rate_limited("429 Too Many Requests")),
            Ok(SUBMIT.to_string()),
        ],
    ));
    let secondary = Arc::new(ScriptedChatModel::replying("secondary", vec![SUBMIT]));
    let models: Vec<Arc<dyn ChatModel>> = vec![primary.clone(), secondary.clone()];
    let oracles: Arc<dyn OracleFactory> = Arc::new(
        move |_: &JobSpec| -> Result<Arc<dyn DecisionOracle>, SchedulerError> {
            let adapter = DecisionAdapter::new(models.clone())?;
            Ok(Arc::new(adapter) as Arc<dyn DecisionOracle>)
        },
    );
    let scheduler = Scheduler::with_workflow(
        SchedulerConfig { worker_slots: 1 },
        form_factory(),
        oracles,
        WorkflowConfig::minimal(),
    )
    .unwrap();

    let plan_model = |report: &agent_core::WorkflowReport| {
        report
            .events
            .iter()
            .find(|e| e.kind == EventKind::PlanProposed)
            .map(|e| e.payload["model_index"].clone())
    };

    let job_a = scheduler.submit(spec("job-a")).unwrap().wait().await.unwrap();
    assert_eq!(job_a.record.status, JobStatus::Applied);
    assert_eq!(plan_model(&job_a), Some(1.into()));

    let job_b = scheduler.submit(spec("job-b")).unwrap().wait().await.unwrap();
    assert_eq!(job_b.record.status, JobStatus::Applied);
    assert_eq!(plan_model(&job_b), Some(0.into()));
    assert_eq!(primary.calls(), 2);
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test]
async fn events_of_every_job_reach_the_bus() {
    let bus = InMemoryBus::<WorkflowEvent>::new(256);
    let mut events = to_mpsc(bus.clone(), 256);
    let scheduler = Scheduler::with_event_bus(
        SchedulerConfig { worker_slots: 2 },
        form_factory(),
        shared(Arc::new(SlowSubmitter::default())),
        WorkflowConfig::minimal(),
        bus,
    )
    .unwrap();

    let first = scheduler.submit(spec("job-x")).unwrap();
    let second = scheduler.submit(spec("job-y")).unwrap();
    let reports = [first.wait().await.unwrap(), second.wait().await.unwrap()];

    let expected: usize = reports.iter().map(|r| r.events.len()).sum();
    let mut finalized = Vec::new();
    for _ in 0..expected {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        if event.kind == EventKind::Finalized {
            finalized.push(event.job_id.0.clone());
        }
    }
    finalized.sort();
    assert_eq!(finalized, vec!["job-x", "job-y"]);
}
