//! Per-run state of the orchestrator and the operator control channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use action_primitives::ActionPlan;
use formpilot_core_types::JobStatus;
use perceiver_structural::SemanticSnapshot;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::intent::IntentEngine;
use crate::loop_guard::LoopGuard;
use crate::workflow::visual::VisualBudget;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSignal {
    #[default]
    Run,
    Pause,
    Stop,
}

/// Operator handle for one job. Signals are honoured at phase transitions
/// only, never in the middle of an action.
#[derive(Clone, Debug)]
pub struct RunControl {
    tx: Arc<watch::Sender<RunSignal>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunSignal::Run);
        Self { tx: Arc::new(tx) }
    }

    pub fn pause(&self) {
        self.tx.send_replace(RunSignal::Pause);
    }

    pub fn resume(&self) {
        self.tx.send_replace(RunSignal::Run);
    }

    pub fn stop(&self) {
        self.tx.send_replace(RunSignal::Stop);
    }

    pub fn signal(&self) -> RunSignal {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunSignal> {
        self.tx.subscribe()
    }
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Termination {
    Applied {
        reason: String,
    },
    ManualRequired {
        failure_class: String,
        failure_code: String,
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl Termination {
    pub fn manual(
        failure_class: impl Into<String>,
        failure_code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Termination::ManualRequired {
            failure_class: failure_class.into(),
            failure_code: failure_code.into(),
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Termination::Applied { .. } => JobStatus::Applied,
            Termination::ManualRequired { .. } => JobStatus::ManualRequired,
            Termination::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Termination::Applied { reason }
            | Termination::ManualRequired { reason, .. }
            | Termination::Failed { reason } => reason,
        }
    }
}

/// `reason=<code>; key=value; ...`
pub fn structured_reason(code: &str, fields: &[(&str, String)]) -> String {
    let mut out = format!("reason={code}");
    for (key, value) in fields {
        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if value.is_empty() {
            continue;
        }
        out.push_str("; ");
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
    }
    out
}

/// Mutable state of one job run, owned by the orchestrator task.
pub(crate) struct RunState {
    pub step: u32,
    pub snapshot: Option<SemanticSnapshot>,
    pub screenshot: Option<Vec<u8>>,
    pub pending: VecDeque<ActionPlan>,
    pub guard: LoopGuard,
    pub intents: IntentEngine,
    pub visual: VisualBudget,
    pub consecutive_failures: u32,
    pub refreshes_used: u32,
    pub recovering: bool,
    pub after_submit: bool,
    pub repair_pending: bool,
    pub validation_signature: Option<String>,
    pub validation_repeats: u32,
    /// Retryable submit outcomes per semantic key
    pub submit_attempts: HashMap<String, u32>,
    pub unknown_blocked: HashMap<String, u32>,
    pub history: VecDeque<String>,
    pub hints: Vec<String>,
    history_window: usize,
}

impl RunState {
    pub fn new(intents: IntentEngine, visual_budget: u32, history_window: usize) -> Self {
        Self {
            step: 0,
            snapshot: None,
            screenshot: None,
            pending: VecDeque::new(),
            guard: LoopGuard::new(),
            intents,
            visual: VisualBudget::new(visual_budget),
            consecutive_failures: 0,
            refreshes_used: 0,
            recovering: false,
            after_submit: false,
            repair_pending: false,
            validation_signature: None,
            validation_repeats: 0,
            submit_attempts: HashMap::new(),
            unknown_blocked: HashMap::new(),
            history: VecDeque::new(),
            hints: Vec::new(),
            history_window: history_window.max(1),
        }
    }

    pub fn remember(&mut self, line: impl Into<String>) {
        self.history.push_back(line.into());
        while self.history.len() > self.history_window {
            self.history.pop_front();
        }
    }

    pub fn hint(&mut self, hint: impl Into<String>) {
        let hint = hint.into();
        if !self.hints.contains(&hint) {
            self.hints.push(hint);
        }
    }

    /// Counts consecutive validation rejections with the same code and evidence.
    pub fn record_validation(&mut self, signature: String) -> u32 {
        if self.validation_signature.as_deref() == Some(signature.as_str()) {
            self.validation_repeats += 1;
        } else {
            self.validation_signature = Some(signature);
            self.validation_repeats = 1;
        }
        self.validation_repeats
    }

    /// Any other submit outcome breaks the streak.
    pub fn clear_validation_streak(&mut self) {
        self.validation_signature = None;
        self.validation_repeats = 0;
    }

    /// Counts a failed step and drops whatever was left of the chain.
    pub fn step_failed(&mut self) {
        self.consecutive_failures += 1;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_is_key_value_pairs() {
        let reason = structured_reason(
            "loop_guard_stop",
            &[
                ("key", "ats.example.com/apply|sponsorship|q".to_string()),
                ("evidence", "  two\n lines ".to_string()),
                ("empty", String::new()),
            ],
        );
        assert_eq!(
            reason,
            "reason=loop_guard_stop; key=ats.example.com/apply|sponsorship|q; evidence=two lines"
        );
    }

    #[test]
    fn validation_streak_breaks_on_other_outcomes() {
        let mut state = RunState::new(IntentEngine::default(), 2, 4);
        assert_eq!(state.record_validation("required|Email is required".into()), 1);
        assert_eq!(state.record_validation("required|Email is required".into()), 2);
        state.clear_validation_streak();
        assert_eq!(state.record_validation("required|Email is required".into()), 1);
        assert_eq!(state.record_validation("format|Phone is invalid".into()), 1);
    }

    #[tokio::test]
    async fn control_signals_reach_subscribers() {
        let control = RunControl::new();
        let mut rx = control.subscribe();
        assert_eq!(*rx.borrow(), RunSignal::Run);
        control.pause();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), RunSignal::Pause);
        control.stop();
        assert_eq!(control.signal(), RunSignal::Stop);
    }

    #[test]
    fn history_is_bounded() {
        let mut state = RunState::new(IntentEngine::new(), 8, 2);
        state.remember("a");
        state.remember("b");
        state.remember("c");
        assert_eq!(state.history.iter().cloned().collect::<Vec<_>>(), vec!["b", "c"]);
        state.hint("x");
        state.hint("x");
        assert_eq!(state.hints.len(), 1);
    }
}
