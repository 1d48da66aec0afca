//! Action executor: resolve one plan against its snapshot, run it, re-observe
//! and verify.

use std::sync::Arc;
use std::time::Instant;

use action_gate::{
    GateValidator, OutcomeClassifier, PostSubmitEvidence, SubmissionOutcome, ValidationContext,
};
use action_primitives::{
    ActionError, ActionKind, ActionPlan, ActionPrimitives, ActionReport, ExecCtx, PlannedAction,
};
use async_trait::async_trait;
use formpilot_core_types::{EventKind, RefId};
use formpilot_event_bus::JobJournal;
use perceiver_structural::{
    diff, FormGraph, PerceptionPort, SemanticElement, SemanticSnapshot, SnapshotBuilder,
};
use serde_json::json;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::FlowError;
use crate::types::{ActionResult, ExecutorConfig, ResolvedTarget};

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute exactly one plan against the snapshot it was derived from.
    async fn execute(
        &self,
        plan: &ActionPlan,
        snapshot: &SemanticSnapshot,
    ) -> Result<ActionResult, FlowError>;
}

/// Binds the plan's target to an element of `snapshot`.
///
/// Refs minted by another snapshot, or unknown to this one, are rejected as
/// stale. Choice plans may name a question plus option text instead of a ref.
pub fn resolve_target(
    plan: &ActionPlan,
    snapshot: &SemanticSnapshot,
) -> Result<Option<ResolvedTarget>, FlowError> {
    if let Some(ref_id) = plan.action.target_ref() {
        if !ref_id.belongs_to(snapshot.epoch) {
            return Err(FlowError::StaleRef(format!(
                "{ref_id} belongs to epoch {}, current snapshot is epoch {}",
                ref_id.epoch, snapshot.epoch
            )));
        }
        let element = snapshot.element(&ref_id).ok_or_else(|| {
            FlowError::StaleRef(format!("{ref_id} is unknown in epoch {}", snapshot.epoch))
        })?;
        return Ok(Some(bind(ref_id, element)));
    }

    match &plan.action {
        PlannedAction::SetRadio {
            target_question: Some(question),
            value,
            ..
        } => resolve_option(snapshot, question, Some(value)).map(Some),
        PlannedAction::SetCheckbox {
            target_question: Some(question),
            ..
        } => resolve_option(snapshot, question, None).map(Some),
        PlannedAction::Submit { .. } => {
            let ref_id = snapshot
                .submit_candidates
                .iter()
                .next()
                .copied()
                .ok_or_else(|| FlowError::Unresolvable("no submit candidate on page".to_string()))?;
            let element = snapshot
                .element(&ref_id)
                .ok_or_else(|| FlowError::Internal(format!("submit candidate {ref_id} missing")))?;
            Ok(Some(bind(ref_id, element)))
        }
        PlannedAction::WaitFor { .. } | PlannedAction::RefreshSoft => Ok(None),
        other => Err(FlowError::InvalidPlan(format!(
            "{} requires a target",
            other.kind()
        ))),
    }
}

fn bind(ref_id: RefId, element: &SemanticElement) -> ResolvedTarget {
    ResolvedTarget {
        ref_id,
        element: element.clone(),
        question: element.group_label.clone(),
    }
}

fn resolve_option(
    snapshot: &SemanticSnapshot,
    question: &str,
    value: Option<&str>,
) -> Result<ResolvedTarget, FlowError> {
    let graph = FormGraph::from_snapshot(snapshot);
    let block = graph
        .question_by_text(question)
        .ok_or_else(|| FlowError::Unresolvable(format!("no question matching '{question}'")))?;
    let option = match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => block.option_by_text(value),
        None if block.options.len() == 1 => block.options.first(),
        None => None,
    }
    .ok_or_else(|| {
        FlowError::Unresolvable(format!(
            "question '{}' has no option '{}'",
            block.question_text,
            value.unwrap_or_default()
        ))
    })?;
    let ref_id = option
        .ref_id
        .ok_or_else(|| FlowError::Unresolvable(format!("option '{}' is not addressable", option.text)))?;
    let element = snapshot
        .element(&ref_id)
        .ok_or_else(|| FlowError::Internal(format!("option ref {ref_id} missing")))?;
    let mut target = bind(ref_id, element);
    target.question = Some(block.question_text.clone());
    Ok(target)
}

pub struct DefaultActionExecutor {
    perception: Arc<dyn PerceptionPort>,
    primitives: Arc<dyn ActionPrimitives>,
    builder: Arc<SnapshotBuilder>,
    validator: Arc<dyn GateValidator>,
    classifier: OutcomeClassifier,
    journal: Arc<JobJournal>,
    cancel: CancellationToken,
    config: ExecutorConfig,
}

impl DefaultActionExecutor {
    pub fn new(
        perception: Arc<dyn PerceptionPort>,
        primitives: Arc<dyn ActionPrimitives>,
        builder: Arc<SnapshotBuilder>,
        validator: Arc<dyn GateValidator>,
        journal: Arc<JobJournal>,
    ) -> Self {
        Self {
            perception,
            primitives,
            builder,
            validator,
            classifier: OutcomeClassifier::new(),
            journal,
            cancel: CancellationToken::new(),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn build_exec_ctx(&self, plan: &ActionPlan) -> ExecCtx {
        let budget = plan
            .timeout_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or(self.config.action_timeout);
        ExecCtx::new(
            self.journal.job_id().clone(),
            budget,
            self.cancel.child_token(),
        )
    }

    async fn ensure_fresh(&self, snapshot: &SemanticSnapshot) -> Result<(), FlowError> {
        let current = self.perception.page_version().await?;
        if current != snapshot.page_version {
            return Err(FlowError::StaleRef(format!(
                "page version {current} differs from snapshot version {}",
                snapshot.page_version
            )));
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        ctx: &ExecCtx,
        plan: &ActionPlan,
        target: Option<&ResolvedTarget>,
    ) -> Result<ActionReport, ActionError> {
        let node = || {
            target
                .map(|t| t.element.node_key.as_str())
                .ok_or_else(|| ActionError::InvalidPlan(format!("{} has no target", plan.kind())))
        };
        let call = async {
            match &plan.action {
                PlannedAction::ClickRef { .. } | PlannedAction::Submit { .. } => {
                    self.primitives.click(ctx, node()?).await
                }
                PlannedAction::TypeRef { value, .. } => {
                    self.primitives.fill(ctx, node()?, value).await
                }
                PlannedAction::SelectRef { value, .. } => {
                    self.primitives.select_option(ctx, node()?, value).await
                }
                PlannedAction::SetCheckbox { checked, .. } => {
                    self.primitives.set_checked(ctx, node()?, *checked).await
                }
                PlannedAction::SetRadio { .. } => {
                    self.primitives.set_checked(ctx, node()?, true).await
                }
                PlannedAction::UploadFile { path, .. } => {
                    self.primitives.upload(ctx, node()?, path).await
                }
                PlannedAction::WaitFor { text, ms } => {
                    self.primitives
                        .wait(ctx, ms.unwrap_or(self.config.default_wait_ms), text.as_deref())
                        .await
                }
                PlannedAction::RefreshSoft => self.primitives.refresh(ctx).await,
            }
        };
        match timeout(ctx.remaining_time(), call).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::WaitTimeout(format!(
                "{} exceeded its deadline",
                plan.kind()
            ))),
        }
    }

    fn intended(plan: &ActionPlan, target: Option<&ResolvedTarget>) -> (Option<String>, Option<bool>) {
        match &plan.action {
            PlannedAction::SetCheckbox { checked, .. } => (None, Some(*checked)),
            PlannedAction::SetRadio { .. } => (target.map(|t| t.element.name.clone()), Some(true)),
            other => (other.intended_value().map(str::to_string), None),
        }
    }

    fn classify(
        &self,
        plan: &ActionPlan,
        before: &SemanticSnapshot,
        after: &SemanticSnapshot,
        error: Option<&ActionError>,
    ) -> Option<SubmissionOutcome> {
        if plan.kind() != ActionKind::Submit {
            return None;
        }
        let evidence =
            PostSubmitEvidence::from_snapshots(before, after, error.map(ToString::to_string));
        Some(self.classifier.classify(&evidence))
    }
}

#[async_trait]
impl ActionExecutor for DefaultActionExecutor {
    async fn execute(
        &self,
        plan: &ActionPlan,
        snapshot: &SemanticSnapshot,
    ) -> Result<ActionResult, FlowError> {
        let started = Instant::now();
        let target = resolve_target(plan, snapshot)?;
        if target.is_some() {
            self.ensure_fresh(snapshot).await?;
        }

        let ctx = self.build_exec_ctx(plan);
        debug!(
            target: "action.executor",
            action = %plan.kind(),
            action_id = %ctx.action_id,
            target = ?target.as_ref().map(|t| t.ref_id.to_string()),
            "dispatching"
        );
        let dispatched = self.dispatch(&ctx, plan, target.as_ref()).await;
        let action_error = dispatched.as_ref().err().cloned();
        if let Some(err) = &action_error {
            if matches!(err, ActionError::Interrupted(_)) {
                return Err(FlowError::Action(err.clone()));
            }
            warn!(target: "action.executor", action = %plan.kind(), error = %err, "primitive failed");
        }

        self.journal
            .emit(
                EventKind::ActionExecuted,
                json!({
                    "action": plan.kind().as_str(),
                    "ref": target.as_ref().map(|t| t.ref_id.to_string()),
                    "target": target.as_ref().map(|t| t.element.name.clone()),
                    "ok": action_error.is_none(),
                    "error": action_error.as_ref().map(ToString::to_string),
                    "page_version": dispatched.as_ref().ok().and_then(|r| r.page_version),
                }),
            )
            .await;

        if !self.config.settle_delay.is_zero() {
            sleep(self.config.settle_delay).await;
        }
        let raw = self.perception.observe().await?;
        let after = self.builder.build(&raw);
        let delta = diff(snapshot, &after);
        let outcome = self.classify(plan, snapshot, &after, action_error.as_ref());

        let (intended_value, intended_checked) = Self::intended(plan, target.as_ref());
        let (success, matched, reasons, evidence) = match (&action_error, &outcome) {
            (Some(err), None) => (false, None, vec![err.to_string()], Vec::new()),
            _ => {
                let context = ValidationContext {
                    plan,
                    target_node: target.as_ref().map(|t| t.element.node_key.as_str()),
                    intended_value: intended_value.as_deref(),
                    intended_checked,
                    before: snapshot,
                    after: &after,
                    diff: &delta,
                    outcome: outcome.as_ref(),
                };
                let gate = self
                    .validator
                    .validate(&plan.effective_criteria(), &context)
                    .await?;
                (gate.passed, gate.matched, gate.reasons, gate.evidence)
            }
        };

        self.journal
            .emit(
                EventKind::ActionVerified,
                json!({
                    "action": plan.kind().as_str(),
                    "success": success,
                    "matched": matched,
                    "reasons": reasons,
                    "changes": delta.change_count(),
                }),
            )
            .await;
        info!(
            target: "action.executor",
            action = %plan.kind(),
            success,
            matched = ?matched,
            "action verified"
        );

        Ok(ActionResult {
            kind: plan.kind(),
            success,
            matched,
            reasons,
            evidence,
            diff: delta,
            outcome,
            error: action_error.map(|err| err.to_string()),
            target: target.as_ref().map(|t| t.element.name.clone()),
            target_signature: target.as_ref().map(ResolvedTarget::signature),
            latency_ms: started.elapsed().as_millis() as u64,
            observed: Some(after),
        })
    }
}
