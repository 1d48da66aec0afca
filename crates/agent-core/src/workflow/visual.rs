//! When to attach a screenshot to a decision request.
//!
//! Screenshots are expensive, so they are sent only when the text snapshot is
//! likely insufficient, and never more than the job's budget allows.

use perceiver_structural::SemanticSnapshot;
use serde::Serialize;

/// Below this many actionable elements the text view is considered thin.
pub const SPARSE_ELEMENT_THRESHOLD: usize = 6;
/// Early steps always get a look.
pub const BOOTSTRAP_STEPS: u32 = 2;

const RISK_MARKERS: &[&str] = &[
    "captcha",
    "verify you are human",
    "unusual activity",
    "security check",
    "robot",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualTrigger {
    Bootstrap,
    FailureRecovery,
    RepairPending,
    PostSubmit,
    SparseSnapshot,
    RiskMarker,
}

impl VisualTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualTrigger::Bootstrap => "bootstrap",
            VisualTrigger::FailureRecovery => "failure_recovery",
            VisualTrigger::RepairPending => "repair_pending",
            VisualTrigger::PostSubmit => "post_submit",
            VisualTrigger::SparseSnapshot => "sparse_snapshot",
            VisualTrigger::RiskMarker => "risk_marker",
        }
    }
}

/// Step context the trigger check needs besides the snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct VisualContext {
    pub step: u32,
    pub recovering: bool,
    pub repair_pending: bool,
    pub after_submit: bool,
}

/// First matching trigger, if any.
pub fn visual_trigger(snapshot: &SemanticSnapshot, ctx: VisualContext) -> Option<VisualTrigger> {
    if ctx.step <= BOOTSTRAP_STEPS {
        return Some(VisualTrigger::Bootstrap);
    }
    if ctx.recovering {
        return Some(VisualTrigger::FailureRecovery);
    }
    if ctx.repair_pending {
        return Some(VisualTrigger::RepairPending);
    }
    if ctx.after_submit {
        return Some(VisualTrigger::PostSubmit);
    }
    if snapshot.actionable_count() < SPARSE_ELEMENT_THRESHOLD {
        return Some(VisualTrigger::SparseSnapshot);
    }
    let text = format!("{}\n{}", snapshot.title, snapshot.visible_text).to_lowercase();
    if RISK_MARKERS.iter().any(|marker| text.contains(marker)) {
        return Some(VisualTrigger::RiskMarker);
    }
    None
}

/// Screenshot budget for one job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisualBudget {
    limit: u32,
    used: u32,
    exhaustion_reported: bool,
}

impl VisualBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: 0,
            exhaustion_reported: false,
        }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    /// Consumes one unit; `false` when nothing is left.
    pub fn try_consume(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.used += 1;
        true
    }

    /// `true` exactly once, the first time exhaustion is observed.
    pub fn take_exhaustion_notice(&mut self) -> bool {
        if self.is_exhausted() && !self.exhaustion_reported {
            self.exhaustion_reported = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perceiver_structural::{RawNode, RawPage, SnapshotBuilder};

    fn page(text: &str, fields: usize) -> SemanticSnapshot {
        let nodes = (0..fields)
            .map(|i| RawNode {
                node_key: format!("f{i}"),
                role: "textbox".to_string(),
                name: format!("Field {i}"),
                visible: true,
                ..RawNode::default()
            })
            .collect();
        SnapshotBuilder::default().build(&RawPage {
            url: "https://ats.example.com/apply".to_string(),
            title: "Apply".to_string(),
            visible_text: text.to_string(),
            version: 1,
            nodes,
        })
    }

    #[test]
    fn triggers_in_priority_order() {
        let rich = page("Tell us about yourself", 8);
        let ctx = VisualContext {
            step: 5,
            ..VisualContext::default()
        };
        assert_eq!(visual_trigger(&rich, ctx), None);
        assert_eq!(
            visual_trigger(&rich, VisualContext { step: 1, ..ctx }),
            Some(VisualTrigger::Bootstrap)
        );
        assert_eq!(
            visual_trigger(&rich, VisualContext { repair_pending: true, ..ctx }),
            Some(VisualTrigger::RepairPending)
        );
        assert_eq!(
            visual_trigger(&page("", 2), ctx),
            Some(VisualTrigger::SparseSnapshot)
        );
        assert_eq!(
            visual_trigger(&page("Please complete the security check", 8), ctx),
            Some(VisualTrigger::RiskMarker)
        );
    }

    #[test]
    fn budget_reports_exhaustion_once() {
        let mut budget = VisualBudget::new(2);
        assert!(budget.try_consume());
        assert!(!budget.take_exhaustion_notice());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.used(), 2);
        assert!(budget.take_exhaustion_notice());
        assert!(!budget.take_exhaustion_notice());
    }
}
