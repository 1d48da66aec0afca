//! Semantic loop guard.
//!
//! A per-job circuit breaker keyed by page scope plus the semantic identity of
//! an action, so a retry on a re-rendered page with fresh refs still lands on
//! the same counter. The escalation ladder is `1 -> replan`, `2 -> alternate`,
//! `>=3 -> stop`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use perceiver_structural::PageScope;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::intent::{ActionSemantics, Intent};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    #[default]
    None,
    Replan,
    Alternate,
    Stop,
}

impl Escalation {
    pub fn for_count(fail_count: u32) -> Self {
        match fail_count {
            0 => Escalation::None,
            1 => Escalation::Replan,
            2 => Escalation::Alternate,
            _ => Escalation::Stop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Escalation::None => "none",
            Escalation::Replan => "replan",
            Escalation::Alternate => "alternate",
            Escalation::Stop => "stop",
        }
    }
}

impl fmt::Display for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SemanticKey {
    pub domain: String,
    pub normalized_path: String,
    pub intent: Intent,
    pub question_signature: String,
}

impl SemanticKey {
    pub fn new(scope: &PageScope, semantics: &ActionSemantics) -> Self {
        Self {
            domain: scope.domain.clone(),
            normalized_path: scope.normalized_path.clone(),
            intent: semantics.intent,
            question_signature: semantics.question_signature.clone(),
        }
    }
}

impl fmt::Display for SemanticKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}|{}|{}",
            self.domain, self.normalized_path, self.intent, self.question_signature
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LoopGuardState {
    pub fail_count: u32,
    pub last_escalation: Escalation,
    /// Fingerprints of actions that failed under this key
    pub failed_fingerprints: BTreeSet<String>,
}

impl LoopGuardState {
    pub fn escalation(&self) -> Escalation {
        Escalation::for_count(self.fail_count)
    }

    pub fn has_failed(&self, fingerprint: &str) -> bool {
        self.failed_fingerprints.contains(fingerprint)
    }
}

#[derive(Debug, Default)]
pub struct LoopGuard {
    states: HashMap<SemanticKey, LoopGuardState>,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &SemanticKey) -> Option<&LoopGuardState> {
        self.states.get(key)
    }

    pub fn fail_count(&self, key: &SemanticKey) -> u32 {
        self.states.get(key).map(|s| s.fail_count).unwrap_or(0)
    }

    /// Escalation owed by the key before its next action runs.
    pub fn pending(&self, key: &SemanticKey) -> Escalation {
        Escalation::for_count(self.fail_count(key))
    }

    pub fn record_failure(&mut self, key: &SemanticKey, fingerprint: Option<&str>) -> Escalation {
        let state = self.states.entry(key.clone()).or_default();
        state.fail_count = state.fail_count.saturating_add(1);
        if let Some(fp) = fingerprint {
            state.failed_fingerprints.insert(fp.to_string());
        }
        state.last_escalation = state.escalation();
        debug!(
            target: "agent.loop_guard",
            key = %key,
            fail_count = state.fail_count,
            escalation = %state.last_escalation,
            "failure recorded"
        );
        state.last_escalation
    }

    /// Advances the counter without an executed action, e.g. when the guard
    /// refused an identical retry and no alternate exists.
    pub fn promote(&mut self, key: &SemanticKey) -> Escalation {
        self.record_failure(key, None)
    }

    /// Resets the key's counter. The entry itself is kept.
    pub fn record_success(&mut self, key: &SemanticKey) {
        if let Some(state) = self.states.get_mut(key) {
            state.fail_count = 0;
            state.last_escalation = Escalation::None;
            state.failed_fingerprints.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drops every key; called once the workflow terminates.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}
