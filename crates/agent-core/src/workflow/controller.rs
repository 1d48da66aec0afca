//! Finite-state orchestrator.
//!
//! One job runs as an explicit phase machine:
//! `observe -> plan -> execute_chain -> verify_action -> (repair | submit)`,
//! ending in `finalize` or `manual_stop`, or `failed` for operator stops and an
//! exhausted step budget. Every transition is journaled and checkpointed, and
//! operator signals are honoured only between phases.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use action_flow::{
    resolve_target, ActionExecutor, ActionResult, DefaultActionExecutor, DefaultRetryHandler,
    ExecutorConfig, FlowError, ResolvedTarget, RetryHandler, RetryTactic,
};
use action_gate::{
    assess_completion, looks_like_completion_text, CompletionAssessment, CompletionInput,
    DefaultGateValidator,
};
use action_primitives::{ActionKind, ActionPlan, ExecCtx, PlannedAction};
use chrono::Utc;
use formpilot_core_types::{
    EventKind, JobStatus, OutcomeClass, RefId, WorkflowEvent, WorkflowPhase,
};
use formpilot_event_bus::JobJournal;
use perceiver_structural::{
    FormGraph, PageScope, SemanticElement, SemanticSnapshot, SnapshotBuilder, SnapshotConfig,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decision::{DecisionOracle, DecisionRequest, DecisionStatus};
use crate::errors::{AgentError, DecisionError};
use crate::intent::{ActionSemantics, Intent, IntentEngine};
use crate::loop_guard::{Escalation, SemanticKey};
use crate::session::{JobSession, JobSpec};
use crate::store::{JobRecord, JobStore};
use crate::terminal_guard::raw_response_implies_completion;
use crate::workflow::config::WorkflowConfig;
use crate::workflow::state::{structured_reason, RunControl, RunSignal, RunState, Termination};
use crate::workflow::visual::{visual_trigger, VisualContext};

/// Consecutive failed steps that trigger the soft-refresh recovery.
const RECOVERY_THRESHOLD: u32 = 3;
/// Identical validation errors tolerated before handing over to a human.
const VALIDATION_STOP_REPEATS: u32 = 3;
/// `unknown_blocked` outcomes per key before manual stop.
const UNKNOWN_BLOCKED_LIMIT: u32 = 2;
const FORM_FIELD_LIMIT: usize = 60;

enum Transition {
    Next(WorkflowPhase),
    Terminate(Termination),
}

/// An action that ran and awaits verification.
struct Executed {
    plan: ActionPlan,
    semantics: ActionSemantics,
    key: SemanticKey,
    fingerprint: String,
    before: SemanticSnapshot,
    result: ActionResult,
}

/// Everything a finished run leaves behind.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub record: JobRecord,
    pub termination: Termination,
    pub events: Vec<WorkflowEvent>,
    pub decisions: u32,
    pub actions: u32,
    pub screenshots: u32,
}

pub struct WorkflowOrchestrator {
    spec: JobSpec,
    session: JobSession,
    oracle: Arc<dyn DecisionOracle>,
    config: WorkflowConfig,
    snapshot_config: SnapshotConfig,
    intent_overrides: BTreeMap<String, Intent>,
    journal: Arc<JobJournal>,
    store: Option<Arc<dyn JobStore>>,
    control: watch::Receiver<RunSignal>,
    cancel: CancellationToken,
}

impl WorkflowOrchestrator {
    pub fn new(
        spec: JobSpec,
        session: JobSession,
        oracle: Arc<dyn DecisionOracle>,
        config: WorkflowConfig,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let journal = Arc::new(JobJournal::new(spec.job_id.clone()));
        Ok(Self {
            spec,
            session,
            oracle,
            config,
            snapshot_config: SnapshotConfig::default(),
            intent_overrides: BTreeMap::new(),
            journal,
            store: None,
            control: RunControl::new().subscribe(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Journal to emit into; it must belong to the same job.
    pub fn with_journal(mut self, journal: Arc<JobJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_control(mut self, control: &RunControl) -> Self {
        self.control = control.subscribe();
        self
    }

    pub fn with_snapshot_config(mut self, config: SnapshotConfig) -> Self {
        self.snapshot_config = config;
        self
    }

    pub fn with_intent_overrides(mut self, overrides: BTreeMap<String, Intent>) -> Self {
        self.intent_overrides = overrides;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn journal(&self) -> Arc<JobJournal> {
        self.journal.clone()
    }

    /// Drives the job to a terminal state.
    pub async fn run(self) -> Result<WorkflowReport, AgentError> {
        let mut run = WorkflowRun::prepare(self);
        let termination = run.drive().await;
        run.finish(termination).await
    }
}

struct WorkflowRun {
    spec: JobSpec,
    config: WorkflowConfig,
    session: JobSession,
    oracle: Arc<dyn DecisionOracle>,
    builder: Arc<SnapshotBuilder>,
    executor: Arc<dyn ActionExecutor>,
    retry: Arc<dyn RetryHandler>,
    journal: Arc<JobJournal>,
    store: Option<Arc<dyn JobStore>>,
    control: watch::Receiver<RunSignal>,
    cancel: CancellationToken,
    record: JobRecord,
    state: RunState,
    last: Option<Executed>,
    decisions: u32,
    actions: u32,
}

impl WorkflowRun {
    fn prepare(orchestrator: WorkflowOrchestrator) -> Self {
        let WorkflowOrchestrator {
            spec,
            session,
            oracle,
            config,
            snapshot_config,
            intent_overrides,
            journal,
            store,
            control,
            cancel,
        } = orchestrator;

        let builder = Arc::new(SnapshotBuilder::new(snapshot_config));
        let executor = DefaultActionExecutor::new(
            session.perception.clone(),
            session.primitives.clone(),
            builder.clone(),
            Arc::new(DefaultGateValidator::new()),
            journal.clone(),
        )
        .with_config(ExecutorConfig {
            action_timeout: Duration::from_millis(config.action_timeout_ms),
            ..ExecutorConfig::default()
        });
        let retry = DefaultRetryHandler::new(config.retry_pacing_ms, config.max_refresh_attempts);
        let state = RunState::new(
            IntentEngine::with_overrides(&intent_overrides),
            config.visual_fallback_budget,
            config.history_window,
        );

        Self {
            record: JobRecord::new(spec.job_id.clone()),
            spec,
            config,
            session,
            oracle,
            builder,
            executor: Arc::new(executor),
            retry: Arc::new(retry),
            journal,
            store,
            control,
            cancel,
            state,
            last: None,
            decisions: 0,
            actions: 0,
        }
    }

    async fn drive(&mut self) -> Termination {
        info!(target: "agent.workflow", job = %self.spec.job_id, "workflow started");
        self.record.status = JobStatus::InProgress;
        let mut phase = WorkflowPhase::Observe;
        self.enter(None, phase).await;

        loop {
            if let Some(stop) = self.honour_control(phase).await {
                return stop;
            }
            let transition = match self.run_phase(phase).await {
                Ok(transition) => transition,
                Err(err) => {
                    warn!(
                        target: "agent.workflow",
                        job = %self.spec.job_id,
                        phase = %phase,
                        error = %err,
                        "phase failed"
                    );
                    Transition::Terminate(Termination::manual(
                        OutcomeClass::UnknownBlocked.as_str(),
                        "phase_error",
                        structured_reason(
                            "phase_error",
                            &[("phase", phase.to_string()), ("error", err.to_string())],
                        ),
                    ))
                }
            };
            match transition {
                Transition::Next(next) => {
                    self.enter(Some(phase), next).await;
                    phase = next;
                }
                Transition::Terminate(termination) => {
                    let terminal = match &termination {
                        Termination::Applied { .. } => Some(WorkflowPhase::Finalize),
                        Termination::ManualRequired { .. } => Some(WorkflowPhase::ManualStop),
                        Termination::Failed { .. } => None,
                    };
                    if let Some(terminal) = terminal {
                        self.enter(Some(phase), terminal).await;
                    }
                    return termination;
                }
            }
        }
    }

    async fn run_phase(&mut self, phase: WorkflowPhase) -> Result<Transition, AgentError> {
        match phase {
            WorkflowPhase::Observe => self.observe().await,
            WorkflowPhase::Plan => self.plan().await,
            WorkflowPhase::ExecuteChain => self.execute_chain().await,
            WorkflowPhase::VerifyAction => self.verify_action().await,
            WorkflowPhase::Repair => self.repair().await,
            WorkflowPhase::Submit => self.submit().await,
            WorkflowPhase::Finalize | WorkflowPhase::ManualStop => Err(AgentError::internal(
                format!("{phase} has no outgoing transition"),
            )),
        }
    }

    async fn enter(&mut self, from: Option<WorkflowPhase>, to: WorkflowPhase) {
        self.journal
            .emit(
                EventKind::WorkflowPhase,
                json!({
                    "from": from.map(|p| p.as_str()),
                    "to": to.as_str(),
                    "step": self.state.step,
                }),
            )
            .await;
        self.record.phase = to;
        self.record.steps = self.state.step;
        self.checkpoint().await;
    }

    async fn checkpoint(&mut self) {
        self.record.touch();
        if let Some(store) = &self.store {
            if let Err(err) = store.save(&self.record).await {
                warn!(target: "agent.workflow", job = %self.spec.job_id, error = %err, "checkpoint failed");
            }
        }
    }

    fn operator_stop(&self, phase: WorkflowPhase, source: &str) -> Termination {
        info!(target: "agent.workflow", job = %self.spec.job_id, phase = %phase, source, "stopped by operator");
        Termination::Failed {
            reason: structured_reason(
                "stopped_by_operator",
                &[("phase", phase.to_string()), ("source", source.to_string())],
            ),
        }
    }

    async fn honour_control(&mut self, phase: WorkflowPhase) -> Option<Termination> {
        loop {
            if self.cancel.is_cancelled() {
                return Some(self.operator_stop(phase, "shutdown"));
            }
            let signal = *self.control.borrow_and_update();
            match signal {
                RunSignal::Run => {
                    if self.record.status == JobStatus::Paused {
                        info!(target: "agent.workflow", job = %self.spec.job_id, phase = %phase, "resumed");
                        self.record.status = JobStatus::InProgress;
                        self.checkpoint().await;
                    }
                    return None;
                }
                RunSignal::Stop => return Some(self.operator_stop(phase, "signal")),
                RunSignal::Pause => {
                    if self.record.status != JobStatus::Paused {
                        info!(target: "agent.workflow", job = %self.spec.job_id, phase = %phase, "paused");
                        self.record.status = JobStatus::Paused;
                        self.checkpoint().await;
                    }
                    let cancel = self.cancel.clone();
                    tokio::select! {
                        changed = self.control.changed() => {
                            if changed.is_err() {
                                return Some(Termination::Failed {
                                    reason: structured_reason(
                                        "control_channel_closed",
                                        &[("phase", phase.to_string())],
                                    ),
                                });
                            }
                        }
                        _ = cancel.cancelled() => {}
                    }
                }
            }
        }
    }

    /// Primitives run to completion; the job token is only read between phases.
    fn exec_ctx(&self) -> ExecCtx {
        ExecCtx::new(
            self.spec.job_id.clone(),
            Duration::from_millis(self.config.action_timeout_ms),
            CancellationToken::new(),
        )
    }

    fn current_snapshot(&self) -> Result<&SemanticSnapshot, AgentError> {
        self.state
            .snapshot
            .as_ref()
            .ok_or_else(|| AgentError::internal("no snapshot observed yet"))
    }

    fn assess(&self, snapshot: &SemanticSnapshot) -> CompletionAssessment {
        let body = format!("{}\n{}", snapshot.title, snapshot.visible_text);
        assess_completion(
            CompletionInput {
                body_text: &body,
                current_url: &snapshot.url,
                has_submit_button: snapshot.has_submit_candidate(),
                has_error: snapshot.has_errors(),
            },
            self.config.completion_threshold,
        )
    }

    fn step_failure(&mut self, code: &str) -> Transition {
        self.state.step_failed();
        let line = format!("step {}: {code}", self.state.step);
        self.state.remember(line);
        Transition::Next(WorkflowPhase::Observe)
    }

    // --- observe -----------------------------------------------------------

    async fn observe(&mut self) -> Result<Transition, AgentError> {
        self.state.step += 1;
        if self.state.step > self.config.max_steps {
            return Ok(Transition::Terminate(Termination::Failed {
                reason: structured_reason(
                    "max_steps_exhausted",
                    &[("max_steps", self.config.max_steps.to_string())],
                ),
            }));
        }
        self.journal.set_step(self.state.step);

        if let Some(stop) = self.recover_from_failures().await? {
            return Ok(Transition::Terminate(stop));
        }

        let raw = self.session.perception.observe().await?;
        let snapshot = self.builder.build(&raw);
        self.journal
            .emit(
                EventKind::SnapshotGenerated,
                json!({
                    "epoch": snapshot.epoch.0,
                    "page_version": snapshot.page_version,
                    "url": snapshot.url,
                    "page_id": snapshot.page_id,
                    "elements": snapshot.elements.len(),
                    "actionable": snapshot.actionable_count(),
                    "errors": snapshot.errors,
                    "required_unfilled": snapshot.required_unfilled,
                    "submit_candidates": snapshot
                        .submit_candidates
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>(),
                }),
            )
            .await;

        let page_text = format!("{}\n{}", snapshot.title, snapshot.visible_text);
        if looks_like_completion_text(&page_text) && snapshot.required_unfilled.is_empty() {
            let assessment = self.assess(&snapshot);
            if assessment.confirmed {
                info!(
                    target: "agent.workflow",
                    job = %self.spec.job_id,
                    score = assessment.score,
                    "completion detected on observation"
                );
                self.state.snapshot = Some(snapshot);
                return Ok(Transition::Terminate(Termination::Applied {
                    reason: structured_reason(
                        "completion_detected",
                        &[
                            ("stage", "observe".to_string()),
                            ("score", format!("{:.3}", assessment.score)),
                        ],
                    ),
                }));
            }
        }

        self.state.screenshot = None;
        let trigger = visual_trigger(
            &snapshot,
            VisualContext {
                step: self.state.step,
                recovering: self.state.recovering,
                repair_pending: self.state.repair_pending,
                after_submit: self.state.after_submit,
            },
        );
        self.state.recovering = false;
        self.state.after_submit = false;

        if let Some(trigger) = trigger {
            if self.state.visual.try_consume() {
                match self.session.perception.screenshot().await {
                    Ok(bytes) => {
                        self.state.screenshot = Some(bytes);
                        self.journal
                            .emit(
                                EventKind::VisualFallback,
                                json!({
                                    "trigger": trigger.as_str(),
                                    "used": self.state.visual.used(),
                                    "remaining": self.state.visual.remaining(),
                                }),
                            )
                            .await;
                    }
                    Err(err) => {
                        warn!(target: "agent.workflow", error = %err, "screenshot unavailable");
                    }
                }
            } else {
                if self.state.visual.take_exhaustion_notice() {
                    self.journal
                        .emit(
                            EventKind::VisualFallback,
                            json!({
                                "trigger": trigger.as_str(),
                                "budget_exhausted": true,
                                "used": self.state.visual.used(),
                            }),
                        )
                        .await;
                }
                if snapshot.actionable_count() == 0 {
                    return Ok(Transition::Terminate(Termination::manual(
                        "visual_budget_exhausted",
                        "no_actionable_elements",
                        structured_reason(
                            "visual_budget_exhausted",
                            &[
                                ("trigger", trigger.as_str().to_string()),
                                ("url", snapshot.url.clone()),
                            ],
                        ),
                    )));
                }
            }
        }

        self.state.snapshot = Some(snapshot);
        Ok(Transition::Next(WorkflowPhase::Plan))
    }

    async fn recover_from_failures(&mut self) -> Result<Option<Termination>, AgentError> {
        let failures = self.state.consecutive_failures;
        if failures >= RECOVERY_THRESHOLD {
            if self.state.refreshes_used < self.config.max_refresh_attempts {
                let ctx = self.exec_ctx();
                let applied = self
                    .retry
                    .apply(
                        self.session.primitives.as_ref(),
                        &ctx,
                        &[RetryTactic::SoftRefresh],
                    )
                    .await
                    .map_err(FlowError::from)?;
                self.state.refreshes_used += 1;
                self.state.consecutive_failures = 0;
                self.state.recovering = true;
                self.state.hint("page was refreshed after repeated failures; re-read the form");
                self.journal
                    .emit(
                        EventKind::RetryPolicyApplied,
                        json!({
                            "classification": "consecutive_failures",
                            "reason_code": "soft_refresh_recovery",
                            "failures": failures,
                            "refreshes_used": self.state.refreshes_used,
                            "tactics": applied,
                        }),
                    )
                    .await;
                return Ok(None);
            }
            return Ok(Some(Termination::manual(
                "consecutive_failures",
                "stop_refresh_exhausted",
                structured_reason(
                    "stop_refresh_exhausted",
                    &[
                        ("failures", failures.to_string()),
                        ("refreshes_used", self.state.refreshes_used.to_string()),
                    ],
                ),
            )));
        }
        if failures >= self.config.max_consecutive_failures {
            return Ok(Some(Termination::manual(
                "consecutive_failures",
                "stop_max_failures",
                structured_reason("stop_max_failures", &[("failures", failures.to_string())]),
            )));
        }
        Ok(None)
    }

    // --- plan --------------------------------------------------------------

    async fn plan(&mut self) -> Result<Transition, AgentError> {
        let snapshot = self.current_snapshot()?.clone();
        let mut hints = std::mem::take(&mut self.state.hints);
        if self.state.repair_pending {
            hints.push("repair_pending: fix the fields named in the errors before submitting".to_string());
        }
        let request = DecisionRequest {
            job_id: self.spec.job_id.to_string(),
            step: self.state.step,
            profile: self.spec.profile.clone(),
            url: snapshot.url.clone(),
            title: snapshot.title.clone(),
            form: FormGraph::from_snapshot(&snapshot).render(FORM_FIELD_LIMIT),
            visible_text: snapshot.visible_text.clone(),
            history: self.state.history.iter().cloned().collect(),
            hints,
            screenshot: self.state.screenshot.take(),
        };

        self.decisions += 1;
        let decided = self.oracle.decide(&request).await;
        let decision = match decided {
            Ok(decision) => decision,
            Err(err) => return self.decision_failed(&snapshot, err).await,
        };

        self.journal
            .emit(
                EventKind::PlanProposed,
                json!({
                    "status": decision.status.as_str(),
                    "summary": decision.summary,
                    "model_index": decision.model_index,
                    "actions": decision.plans,
                }),
            )
            .await;

        match decision.status {
            DecisionStatus::Continue => {
                if decision.plans.is_empty() {
                    return Ok(self.step_failure("decision_without_action"));
                }
                let limit = self.config.max_actions_per_step as usize;
                if decision.plans.len() > limit {
                    debug!(
                        target: "agent.workflow",
                        proposed = decision.plans.len(),
                        limit,
                        "truncating action chain"
                    );
                }
                self.state.pending = decision.plans.into_iter().take(limit).collect();
                Ok(Transition::Next(WorkflowPhase::ExecuteChain))
            }
            DecisionStatus::Done => {
                let assessment = self.assess(&snapshot);
                if assessment.confirmed {
                    return Ok(Transition::Terminate(Termination::Applied {
                        reason: structured_reason(
                            "decision_done",
                            &[("score", format!("{:.3}", assessment.score))],
                        ),
                    }));
                }
                self.state
                    .hint("done was rejected: the page does not confirm the submission");
                Ok(self.step_failure("done_without_confirmation"))
            }
            DecisionStatus::Stuck => Ok(Transition::Terminate(Termination::manual(
                "decision_stuck",
                "oracle_reported_stuck",
                structured_reason("decision_stuck", &[("summary", decision.summary)]),
            ))),
        }
    }

    async fn decision_failed(
        &mut self,
        snapshot: &SemanticSnapshot,
        err: DecisionError,
    ) -> Result<Transition, AgentError> {
        warn!(
            target: "agent.workflow",
            job = %self.spec.job_id,
            class = err.class(),
            error = %err,
            "decision failed"
        );
        self.journal
            .emit(
                EventKind::PlanProposed,
                json!({ "error_class": err.class(), "error": err.to_string() }),
            )
            .await;

        match &err {
            DecisionError::Malformed { raw, .. } => {
                if raw_response_implies_completion(raw) {
                    let assessment = self.assess(snapshot);
                    if assessment.confirmed {
                        return Ok(Transition::Terminate(Termination::Applied {
                            reason: structured_reason(
                                "implicit_completion",
                                &[("score", format!("{:.3}", assessment.score))],
                            ),
                        }));
                    }
                }
                self.state
                    .hint("previous reply was not valid decision JSON; answer with one JSON object");
                Ok(self.step_failure("malformed_decision"))
            }
            DecisionError::CapabilityMismatch(_) => Ok(Transition::Terminate(Termination::manual(
                "decision_service",
                "model_unsupported_exhausted",
                structured_reason("model_unsupported_exhausted", &[("error", err.to_string())]),
            ))),
            DecisionError::RateLimited(_) | DecisionError::Other(_) => {
                Ok(self.step_failure(err.class()))
            }
        }
    }

    // --- execute_chain -------------------------------------------------------

    async fn execute_chain(&mut self) -> Result<Transition, AgentError> {
        let Some(plan) = self.state.pending.pop_front() else {
            return Ok(Transition::Next(WorkflowPhase::Observe));
        };
        let snapshot = self.current_snapshot()?.clone();
        let scope = PageScope {
            domain: snapshot.domain.clone(),
            normalized_path: snapshot.normalized_path.clone(),
        };

        let (plan, target) = match self.bind(plan, &snapshot) {
            Ok(bound) => bound,
            Err((plan, err)) => return self.flow_failure(&plan, None, &scope, err).await,
        };
        let semantics = self.state.intents.describe(&plan, target.as_ref());
        let key = SemanticKey::new(&scope, &semantics);
        let fingerprint = plan.fingerprint(target.as_ref().map(ResolvedTarget::signature).as_deref());

        if plan.kind() == ActionKind::Submit && self.state.repair_pending {
            let escalation = self.state.guard.record_failure(&key, None);
            self.emit_guard(&key, &semantics, escalation, "submit_while_repair_pending", None)
                .await;
            self.state.step_failed();
            let line = format!("step {}: submit rejected, repair pending", self.state.step);
            self.state.remember(line);
            return Ok(self.after_guard_failure(&key, escalation, "submit_while_repair_pending"));
        }

        let already_failed = self
            .state
            .guard
            .state(&key)
            .is_some_and(|s| s.has_failed(&fingerprint));
        let (plan, target, fingerprint) = match self.state.guard.pending(&key) {
            Escalation::None => (plan, target, fingerprint),
            Escalation::Stop => {
                return Ok(self.after_guard_failure(&key, Escalation::Stop, "key_already_stopped"));
            }
            Escalation::Replan if !already_failed => (plan, target, fingerprint),
            Escalation::Replan => {
                let escalation = self.state.guard.promote(&key);
                self.emit_guard(&key, &semantics, escalation, "identical_retry_rejected", Some(&fingerprint))
                    .await;
                self.state.step_failed();
                self.state.hint(format!(
                    "{} already failed; choose a different action",
                    semantics.action_intent
                ));
                return Ok(self.after_guard_failure(&key, escalation, "identical_retry_rejected"));
            }
            Escalation::Alternate if !already_failed => (plan, target, fingerprint),
            Escalation::Alternate => {
                match self.synthesize_alternate(&plan, target.as_ref(), &snapshot, &key) {
                    Some((alternate, alternate_target, alternate_fp)) => {
                        info!(
                            target: "agent.loop_guard",
                            key = %key,
                            from = %fingerprint,
                            to = %alternate_fp,
                            "identical retry replaced by alternate"
                        );
                        self.emit_guard(
                            &key,
                            &semantics,
                            Escalation::Alternate,
                            "alternate_synthesized",
                            Some(&alternate_fp),
                        )
                        .await;
                        (alternate, Some(alternate_target), alternate_fp)
                    }
                    None => {
                        let escalation = self.state.guard.promote(&key);
                        self.emit_guard(
                            &key,
                            &semantics,
                            escalation,
                            "alternate_missing_replan",
                            Some(&fingerprint),
                        )
                        .await;
                        self.state.step_failed();
                        return Ok(self.after_guard_failure(&key, escalation, "alternate_missing_replan"));
                    }
                }
            }
        };

        self.actions += 1;
        match self.executor.execute(&plan, &snapshot).await {
            Ok(result) => {
                // Alternates keep the key of the action they replace.
                self.last = Some(Executed {
                    plan,
                    semantics,
                    key,
                    fingerprint,
                    before: snapshot,
                    result,
                });
                Ok(Transition::Next(WorkflowPhase::VerifyAction))
            }
            Err(err) => self.flow_failure(&plan, target.as_ref(), &scope, err).await,
        }
    }

    /// Resolves the plan's target and folds equivalent spellings onto one
    /// action kind: clicks on choices become set-radio/set-checkbox, clicks on
    /// a submit candidate become submit, uploads get the configured path.
    fn bind(
        &self,
        plan: ActionPlan,
        snapshot: &SemanticSnapshot,
    ) -> Result<(ActionPlan, Option<ResolvedTarget>), (ActionPlan, FlowError)> {
        let mut plan = plan;
        if let PlannedAction::UploadFile { path, .. } = &mut plan.action {
            match &self.spec.upload_path {
                Some(configured) => *path = configured.clone(),
                None => {
                    return Err((
                        plan,
                        FlowError::InvalidPlan("no upload file configured for this job".to_string()),
                    ))
                }
            }
        }

        let target = match resolve_target(&plan, snapshot) {
            Ok(target) => target,
            Err(err) => return Err((plan, err)),
        };

        let folded = match (&plan.action, &target) {
            (PlannedAction::ClickRef { ref_id }, Some(resolved)) => {
                fold_click(*ref_id, &resolved.element, snapshot)
            }
            _ => None,
        };
        if let Some(action) = folded {
            debug!(target: "agent.workflow", from = %plan.kind(), to = %action.kind(), "click folded");
            plan.action = action;
        }
        Ok((plan, target))
    }

    fn synthesize_alternate(
        &self,
        plan: &ActionPlan,
        target: Option<&ResolvedTarget>,
        snapshot: &SemanticSnapshot,
        key: &SemanticKey,
    ) -> Option<(ActionPlan, ResolvedTarget, String)> {
        let target = target?;
        let candidates: Vec<&SemanticElement> = if plan.kind() == ActionKind::Submit {
            snapshot
                .submit_candidates
                .iter()
                .filter(|id| **id != target.ref_id)
                .filter_map(|id| snapshot.element(id))
                .collect()
        } else if target.element.is_choice() {
            snapshot
                .group_members(&target.element)
                .into_iter()
                .filter(|el| el.ref_id != target.ref_id && !el.disabled)
                .collect()
        } else {
            Vec::new()
        };

        let guard_state = self.state.guard.state(key);
        candidates.into_iter().find_map(|element| {
            let action = match &plan.action {
                PlannedAction::Submit { .. } => PlannedAction::Submit {
                    ref_id: Some(element.ref_id),
                },
                PlannedAction::SetCheckbox { checked, .. } => PlannedAction::SetCheckbox {
                    ref_id: Some(element.ref_id),
                    target_question: None,
                    checked: *checked,
                },
                _ => PlannedAction::SetRadio {
                    ref_id: Some(element.ref_id),
                    target_question: None,
                    value: element.name.clone(),
                },
            };
            let alternate = ActionPlan {
                action,
                success_criteria: Vec::new(),
                timeout_ms: plan.timeout_ms,
                reason: Some("alternate to a failed action".to_string()),
            };
            let alternate_target = resolve_target(&alternate, snapshot).ok().flatten()?;
            let fingerprint = alternate.fingerprint(Some(alternate_target.signature().as_str()));
            let failed = guard_state.is_some_and(|s| s.has_failed(&fingerprint));
            (!failed).then_some((alternate, alternate_target, fingerprint))
        })
    }

    async fn flow_failure(
        &mut self,
        plan: &ActionPlan,
        target: Option<&ResolvedTarget>,
        scope: &PageScope,
        err: FlowError,
    ) -> Result<Transition, AgentError> {
        if err.is_stale() {
            info!(target: "agent.workflow", action = %plan.kind(), error = %err, "stale ref rejected");
            self.state.step_failed();
            self.state
                .hint("refs expire on every page change; use refs from the latest listing");
            let line = format!("step {}: {} rejected (stale ref)", self.state.step, plan.kind());
            self.state.remember(line);
            return Ok(Transition::Next(WorkflowPhase::Observe));
        }
        if !err.is_retryable() {
            return Err(err.into());
        }

        let semantics = self.state.intents.describe(plan, target);
        let key = SemanticKey::new(scope, &semantics);
        let fingerprint = plan.fingerprint(target.map(ResolvedTarget::signature).as_deref());
        let escalation = self.state.guard.record_failure(&key, Some(&fingerprint));
        self.emit_guard(&key, &semantics, escalation, "action_rejected", Some(&fingerprint))
            .await;
        self.state.step_failed();
        self.state.hint(format!("{} was rejected: {err}", plan.kind()));
        let line = format!("step {}: {} rejected ({err})", self.state.step, plan.kind());
        self.state.remember(line);
        Ok(self.after_guard_failure(&key, escalation, "action_rejected"))
    }

    fn after_guard_failure(&self, key: &SemanticKey, escalation: Escalation, code: &str) -> Transition {
        if escalation == Escalation::Stop {
            return Transition::Terminate(Termination::manual(
                "loop_guard",
                code,
                structured_reason(
                    "loop_guard_stop",
                    &[
                        ("key", key.to_string()),
                        ("last_failure", code.to_string()),
                        ("fail_count", self.state.guard.fail_count(key).to_string()),
                    ],
                ),
            ));
        }
        Transition::Next(WorkflowPhase::Observe)
    }

    async fn emit_guard(
        &self,
        key: &SemanticKey,
        semantics: &ActionSemantics,
        escalation: Escalation,
        decision: &str,
        fingerprint: Option<&str>,
    ) {
        self.journal
            .emit(
                EventKind::SemanticLoopGuard,
                json!({
                    "semantic_key": key.to_string(),
                    "intent": key.intent.as_str(),
                    "action_intent": semantics.action_intent,
                    "fail_count": self.state.guard.fail_count(key),
                    "escalation": escalation.as_str(),
                    "decision": decision,
                    "fingerprint": fingerprint,
                }),
            )
            .await;
    }

    // --- verify_action -------------------------------------------------------

    async fn verify_action(&mut self) -> Result<Transition, AgentError> {
        let executed = self
            .last
            .take()
            .ok_or_else(|| AgentError::internal("nothing to verify"))?;
        if let Some(observed) = &executed.result.observed {
            self.state.snapshot = Some(observed.clone());
        }
        if executed.plan.kind() == ActionKind::Submit {
            self.last = Some(executed);
            return Ok(Transition::Next(WorkflowPhase::Submit));
        }

        let Executed {
            plan,
            semantics,
            key,
            fingerprint,
            before,
            result,
        } = executed;
        let line = format!(
            "step {}: {} {} -> {}",
            self.state.step,
            plan.kind(),
            result.target.as_deref().unwrap_or("page"),
            if result.success {
                "ok".to_string()
            } else {
                format!("no effect ({})", result.reasons.join("; "))
            }
        );
        self.state.remember(line);

        if result.success {
            if self.state.guard.fail_count(&key) > 0 {
                self.state.guard.record_success(&key);
                self.emit_guard(&key, &semantics, Escalation::None, "reset", None)
                    .await;
            }
            self.state.consecutive_failures = 0;
            self.rebind_pending(&before);
            if self.state.repair_pending && is_repair_action(plan.kind()) {
                return Ok(Transition::Next(WorkflowPhase::Repair));
            }
            return Ok(self.continue_chain().await);
        }

        let escalation = self.state.guard.record_failure(&key, Some(&fingerprint));
        self.emit_guard(&key, &semantics, escalation, "verification_failed", Some(&fingerprint))
            .await;
        self.state.step_failed();
        match escalation {
            Escalation::Replan => self.state.hint(format!(
                "{} had no effect; choose a different approach",
                semantics.action_intent
            )),
            Escalation::Alternate => self.state.hint(format!(
                "{} failed twice; do not repeat a failed answer",
                semantics.action_intent
            )),
            Escalation::None | Escalation::Stop => {}
        }
        Ok(self.after_guard_failure(&key, escalation, "verification_failed"))
    }

    async fn continue_chain(&mut self) -> Transition {
        if self.state.pending.is_empty() {
            return Transition::Next(WorkflowPhase::Observe);
        }
        if self.config.wait_between_actions_ms > 0 {
            sleep(Duration::from_millis(self.config.wait_between_actions_ms)).await;
        }
        Transition::Next(WorkflowPhase::ExecuteChain)
    }

    /// Moves refs of the remaining chain onto the freshly observed snapshot,
    /// matching elements by node key. The chain is cut at the first plan whose
    /// element did not survive the page change.
    fn rebind_pending(&mut self, before: &SemanticSnapshot) {
        let Some(after) = self.state.snapshot.as_ref() else {
            self.state.pending.clear();
            return;
        };
        let mut rebound = Vec::with_capacity(self.state.pending.len());
        for plan in self.state.pending.drain(..) {
            let Some(old) = plan.action.target_ref() else {
                rebound.push(plan);
                continue;
            };
            let fresh = before
                .element(&old)
                .and_then(|el| after.element_by_node(&el.node_key))
                .map(|el| el.ref_id);
            match fresh {
                Some(ref_id) => rebound.push(ActionPlan {
                    action: retarget(&plan.action, ref_id),
                    ..plan
                }),
                None => {
                    debug!(target: "agent.workflow", %old, "chain cut: element gone after page change");
                    break;
                }
            }
        }
        self.state.pending = rebound.into();
    }

    // --- repair --------------------------------------------------------------

    async fn repair(&mut self) -> Result<Transition, AgentError> {
        self.state.repair_pending = false;
        info!(target: "agent.workflow", job = %self.spec.job_id, step = self.state.step, "validation repair applied");
        let line = format!("step {}: repair applied, resubmission allowed", self.state.step);
        self.state.remember(line);
        Ok(self.continue_chain().await)
    }

    // --- submit --------------------------------------------------------------

    async fn submit(&mut self) -> Result<Transition, AgentError> {
        let executed = self
            .last
            .take()
            .ok_or_else(|| AgentError::internal("no submission to classify"))?;
        let outcome = executed
            .result
            .outcome
            .clone()
            .ok_or_else(|| AgentError::internal("submit finished without an outcome"))?;
        let after = match executed.result.observed.as_ref() {
            Some(after) => after.clone(),
            None => self.current_snapshot()?.clone(),
        };
        let class = outcome.outcome_class;
        let target = executed.result.target.clone().unwrap_or_default();

        self.journal
            .emit(
                EventKind::SubmissionOutcomeClassified,
                json!({
                    "outcome_class": class.as_str(),
                    "failure_code": outcome.failure_code,
                    "confidence": outcome.confidence,
                    "evidence": outcome.evidence_snippet,
                    "retryable": outcome.retryable,
                    "target": target,
                }),
            )
            .await;
        self.record.last_outcome_class = Some(class);
        self.record.last_outcome_at = Some(Utc::now());
        if !outcome.is_success() {
            self.record.last_error_snippet = Some(outcome.evidence_snippet.clone());
        }
        let line = format!("step {}: submit -> {}", self.state.step, class);
        self.state.remember(line);
        self.state.pending.clear();
        self.state.after_submit = true;
        let key = executed.key.to_string();
        if !matches!(class, OutcomeClass::ValidationError) {
            self.state.clear_validation_streak();
        }

        match class {
            OutcomeClass::SuccessConfirmed => {
                let assessment = self.assess(&after);
                if assessment.confirmed || assessment.score > self.config.completion_threshold {
                    self.state.guard.record_success(&executed.key);
                    return Ok(Transition::Terminate(Termination::Applied {
                        reason: structured_reason(
                            "submission_confirmed",
                            &[
                                ("confidence", format!("{:.2}", outcome.confidence)),
                                ("score", format!("{:.3}", assessment.score)),
                            ],
                        ),
                    }));
                }
                self.state
                    .hint("success text appeared but the page does not confirm the submission");
                Ok(self.step_failure("submission_unconfirmed"))
            }
            OutcomeClass::ValidationError => {
                let signature = format!("{}|{}", outcome.failure_code, outcome.evidence_snippet);
                let repeats = self.state.record_validation(signature);
                self.state.repair_pending = true;
                if repeats >= VALIDATION_STOP_REPEATS {
                    return Ok(Transition::Terminate(Termination::manual(
                        class.as_str(),
                        outcome.failure_code.clone(),
                        structured_reason(
                            "validation_error_unresolved",
                            &[
                                ("code", outcome.failure_code.clone()),
                                ("repeats", repeats.to_string()),
                                ("evidence", outcome.evidence_snippet.clone()),
                            ],
                        ),
                    )));
                }
                if repeats >= 2 {
                    self.state.hint("repeat_same_validation_error");
                }
                self.state.hint(format!(
                    "submission rejected by validation: {}",
                    outcome.evidence_snippet
                ));
                Ok(Transition::Next(WorkflowPhase::Observe))
            }
            OutcomeClass::ExternalBlocked | OutcomeClass::TransientNetwork => {
                let attempts = {
                    let entry = self.state.submit_attempts.entry(key.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                self.record.retry_count = attempts;
                let limit = self.config.max_submit_attempts;
                let exhausted = attempts >= limit;
                let tactics = if exhausted {
                    Vec::new()
                } else {
                    self.retry.tactics_for(attempts, self.state.refreshes_used)
                };
                self.journal
                    .emit(
                        EventKind::RetryPolicyApplied,
                        json!({
                            "classification": class.as_str(),
                            "reason_code": outcome.failure_code,
                            "retry_count": attempts,
                            "retry_limit": limit,
                            "semantic_key": key,
                            "evidence": outcome.evidence_snippet,
                            "decision": if exhausted { "manual_stop" } else { "retry" },
                            "tactics": tactics.iter().map(RetryTactic::name).collect::<Vec<_>>(),
                        }),
                    )
                    .await;
                if exhausted {
                    return Ok(Transition::Terminate(Termination::manual(
                        class.as_str(),
                        outcome.failure_code.clone(),
                        outcome.manual_reason(ActionKind::Submit.as_str(), &target),
                    )));
                }

                let ctx = self.exec_ctx();
                self.retry
                    .apply(self.session.primitives.as_ref(), &ctx, &tactics)
                    .await
                    .map_err(FlowError::from)?;
                self.state.refreshes_used += tactics
                    .iter()
                    .filter(|t| matches!(t, RetryTactic::SoftRefresh))
                    .count() as u32;
                self.state.hint(format!(
                    "submission attempt {attempts} of {limit} ended {class}; retry the submission"
                ));
                Ok(Transition::Next(WorkflowPhase::Observe))
            }
            OutcomeClass::UnknownBlocked => {
                let seen = {
                    let entry = self.state.unknown_blocked.entry(key).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if seen >= UNKNOWN_BLOCKED_LIMIT {
                    return Ok(Transition::Terminate(Termination::manual(
                        class.as_str(),
                        outcome.failure_code.clone(),
                        structured_reason(
                            "unknown_blocked_repeated",
                            &[
                                ("code", outcome.failure_code.clone()),
                                ("target", target),
                                ("evidence", outcome.evidence_snippet.clone()),
                            ],
                        ),
                    )));
                }
                self.state
                    .hint("submission had no visible effect; re-check the form before submitting again");
                Ok(self.step_failure("unknown_blocked_replan"))
            }
        }
    }

    // --- finish --------------------------------------------------------------

    async fn finish(mut self, termination: Termination) -> Result<WorkflowReport, AgentError> {
        self.state.guard.clear();
        self.record.status = termination.status();
        self.record.steps = self.state.step;
        match &termination {
            Termination::Applied { .. } => {
                self.record.failure_class = None;
                self.record.failure_code = None;
            }
            Termination::ManualRequired {
                failure_class,
                failure_code,
                reason,
            } => {
                self.record.failure_class = Some(failure_class.clone());
                self.record.failure_code = Some(failure_code.clone());
                self.record.manual_reason = Some(reason.clone());
            }
            Termination::Failed { reason } => {
                self.record.fail_reason = Some(reason.clone());
            }
        }

        self.journal
            .emit(
                EventKind::Finalized,
                json!({
                    "status": self.record.status.as_str(),
                    "reason": termination.reason(),
                    "failure_class": self.record.failure_class,
                    "retry_count": self.record.retry_count,
                    "steps": self.state.step,
                    "decisions": self.decisions,
                    "actions": self.actions,
                }),
            )
            .await;
        info!(
            target: "agent.workflow",
            job = %self.spec.job_id,
            status = %self.record.status,
            reason = termination.reason(),
            steps = self.state.step,
            "workflow finished"
        );

        self.record.touch();
        if let Some(store) = &self.store {
            store.save(&self.record).await?;
        }
        Ok(WorkflowReport {
            record: self.record,
            termination,
            events: self.journal.events(),
            decisions: self.decisions,
            actions: self.actions,
            screenshots: self.state.visual.used(),
        })
    }
}

fn is_repair_action(kind: ActionKind) -> bool {
    matches!(
        kind,
        ActionKind::ClickRef
            | ActionKind::TypeRef
            | ActionKind::SelectRef
            | ActionKind::SetCheckbox
            | ActionKind::SetRadio
            | ActionKind::UploadFile
    )
}

fn fold_click(
    ref_id: RefId,
    element: &SemanticElement,
    snapshot: &SemanticSnapshot,
) -> Option<PlannedAction> {
    if snapshot.submit_candidates.contains(&ref_id) {
        return Some(PlannedAction::Submit {
            ref_id: Some(ref_id),
        });
    }
    if !element.is_choice() {
        return None;
    }
    if element.role == "checkbox" {
        Some(PlannedAction::SetCheckbox {
            ref_id: Some(ref_id),
            target_question: None,
            checked: !element.is_checked(),
        })
    } else {
        Some(PlannedAction::SetRadio {
            ref_id: Some(ref_id),
            target_question: None,
            value: element.name.clone(),
        })
    }
}

fn retarget(action: &PlannedAction, fresh: RefId) -> PlannedAction {
    let mut action = action.clone();
    match &mut action {
        PlannedAction::ClickRef { ref_id }
        | PlannedAction::TypeRef { ref_id, .. }
        | PlannedAction::SelectRef { ref_id, .. }
        | PlannedAction::UploadFile { ref_id, .. } => *ref_id = fresh,
        PlannedAction::SetCheckbox { ref_id, .. }
        | PlannedAction::SetRadio { ref_id, .. }
        | PlannedAction::Submit { ref_id } => *ref_id = Some(fresh),
        PlannedAction::WaitFor { .. } | PlannedAction::RefreshSoft => {}
    }
    action
}

#[cfg(test)]
mod tests {
    use super::*;
    use formpilot_core_types::SnapshotEpoch;

    #[test]
    fn retarget_keeps_values() {
        let fresh = RefId::new(SnapshotEpoch(4), 2);
        let typed = retarget(
            &PlannedAction::TypeRef {
                ref_id: RefId::new(SnapshotEpoch(3), 0),
                value: "Ada".to_string(),
            },
            fresh,
        );
        assert_eq!(typed.target_ref(), Some(fresh));
        assert_eq!(typed.intended_value(), Some("Ada"));
        assert_eq!(
            retarget(&PlannedAction::Submit { ref_id: None }, fresh).target_ref(),
            Some(fresh)
        );
        assert_eq!(retarget(&PlannedAction::RefreshSoft, fresh).target_ref(), None);
    }

    #[test]
    fn only_field_actions_complete_a_repair() {
        assert!(is_repair_action(ActionKind::TypeRef));
        assert!(is_repair_action(ActionKind::SetRadio));
        assert!(!is_repair_action(ActionKind::Submit));
        assert!(!is_repair_action(ActionKind::WaitFor));
        assert!(!is_repair_action(ActionKind::RefreshSoft));
    }
}
