//! Action plans proposed by the decision service.
//!
//! [`PlannedAction`] is the closed set of things the workflow may do to a page.
//! A plan is consumed once by the executor and then dropped.

use std::fmt;

use formpilot_core_types::RefId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ClickRef,
    TypeRef,
    SelectRef,
    SetCheckbox,
    SetRadio,
    UploadFile,
    Submit,
    WaitFor,
    RefreshSoft,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ClickRef => "click_ref",
            ActionKind::TypeRef => "type_ref",
            ActionKind::SelectRef => "select_ref",
            ActionKind::SetCheckbox => "set_checkbox",
            ActionKind::SetRadio => "set_radio",
            ActionKind::UploadFile => "upload_file",
            ActionKind::Submit => "submit",
            ActionKind::WaitFor => "wait_for",
            ActionKind::RefreshSoft => "refresh_soft",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_checked() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    #[serde(alias = "click-ref", alias = "click")]
    ClickRef {
        #[serde(rename = "ref")]
        ref_id: RefId,
    },
    #[serde(alias = "type-ref", alias = "type", alias = "fill")]
    TypeRef {
        #[serde(rename = "ref")]
        ref_id: RefId,
        value: String,
    },
    #[serde(alias = "select-ref", alias = "select")]
    SelectRef {
        #[serde(rename = "ref")]
        ref_id: RefId,
        value: String,
    },
    #[serde(alias = "set-checkbox")]
    SetCheckbox {
        #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
        ref_id: Option<RefId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_question: Option<String>,
        #[serde(default = "default_checked")]
        checked: bool,
    },
    #[serde(alias = "set-radio")]
    SetRadio {
        #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
        ref_id: Option<RefId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_question: Option<String>,
        /// Option text; used when the ref is absent.
        #[serde(default)]
        value: String,
    },
    #[serde(alias = "upload-file", alias = "upload")]
    UploadFile {
        #[serde(rename = "ref")]
        ref_id: RefId,
        path: String,
    },
    Submit {
        #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
        ref_id: Option<RefId>,
    },
    #[serde(alias = "wait-for", alias = "wait")]
    WaitFor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ms: Option<u64>,
    },
    #[serde(alias = "refresh-soft", alias = "refresh")]
    RefreshSoft,
}

impl PlannedAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            PlannedAction::ClickRef { .. } => ActionKind::ClickRef,
            PlannedAction::TypeRef { .. } => ActionKind::TypeRef,
            PlannedAction::SelectRef { .. } => ActionKind::SelectRef,
            PlannedAction::SetCheckbox { .. } => ActionKind::SetCheckbox,
            PlannedAction::SetRadio { .. } => ActionKind::SetRadio,
            PlannedAction::UploadFile { .. } => ActionKind::UploadFile,
            PlannedAction::Submit { .. } => ActionKind::Submit,
            PlannedAction::WaitFor { .. } => ActionKind::WaitFor,
            PlannedAction::RefreshSoft => ActionKind::RefreshSoft,
        }
    }

    pub fn target_ref(&self) -> Option<RefId> {
        match self {
            PlannedAction::ClickRef { ref_id }
            | PlannedAction::TypeRef { ref_id, .. }
            | PlannedAction::SelectRef { ref_id, .. }
            | PlannedAction::UploadFile { ref_id, .. } => Some(*ref_id),
            PlannedAction::SetCheckbox { ref_id, .. }
            | PlannedAction::SetRadio { ref_id, .. }
            | PlannedAction::Submit { ref_id } => *ref_id,
            PlannedAction::WaitFor { .. } | PlannedAction::RefreshSoft => None,
        }
    }

    pub fn target_question(&self) -> Option<&str> {
        match self {
            PlannedAction::SetCheckbox {
                target_question, ..
            }
            | PlannedAction::SetRadio {
                target_question, ..
            } => target_question.as_deref(),
            _ => None,
        }
    }

    /// Value the action is meant to leave behind, if any.
    pub fn intended_value(&self) -> Option<&str> {
        match self {
            PlannedAction::TypeRef { value, .. } | PlannedAction::SelectRef { value, .. } => {
                Some(value)
            }
            PlannedAction::SetRadio { value, .. } if !value.is_empty() => Some(value),
            PlannedAction::UploadFile { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Whether the action points at something at all.
    pub fn has_target(&self) -> bool {
        match self {
            PlannedAction::SetCheckbox {
                ref_id,
                target_question,
                ..
            } => ref_id.is_some() || target_question.is_some(),
            PlannedAction::SetRadio {
                ref_id,
                target_question,
                value,
            } => ref_id.is_some() || (target_question.is_some() && !value.is_empty()),
            _ => true,
        }
    }
}

/// Condition checked against the re-observed page after an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuccessCriterion {
    /// Target option ends in the requested checked state
    TargetChecked,
    /// A conflicting option in the same group went from checked to unchecked
    GroupExclusive,
    /// The bound question carried an error before and no longer does
    QuestionErrorCleared,
    /// Normalized field value equals or contains the intended value
    ValueMatches,
    /// File name visible on the field, or attached-file count > 0
    FileAttached,
    /// A submission outcome was produced
    OutcomeClassified,
    /// Snapshot diff is non-empty
    PageChanged,
    TextVisible { text: String },
    PageReloaded,
}

impl SuccessCriterion {
    pub fn name(&self) -> &'static str {
        match self {
            SuccessCriterion::TargetChecked => "target_checked",
            SuccessCriterion::GroupExclusive => "group_exclusive",
            SuccessCriterion::QuestionErrorCleared => "question_error_cleared",
            SuccessCriterion::ValueMatches => "value_matches",
            SuccessCriterion::FileAttached => "file_attached",
            SuccessCriterion::OutcomeClassified => "outcome_classified",
            SuccessCriterion::PageChanged => "page_changed",
            SuccessCriterion::TextVisible { .. } => "text_visible",
            SuccessCriterion::PageReloaded => "page_reloaded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    #[serde(flatten)]
    pub action: PlannedAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_criteria: Vec<SuccessCriterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ActionPlan {
    pub fn new(action: PlannedAction) -> Self {
        Self {
            action,
            success_criteria: Vec::new(),
            timeout_ms: None,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_criteria(mut self, criteria: Vec<SuccessCriterion>) -> Self {
        self.success_criteria = criteria;
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    /// Declared criteria, or the kind defaults when none were declared.
    pub fn effective_criteria(&self) -> Vec<SuccessCriterion> {
        if self.success_criteria.is_empty() {
            default_criteria(&self.action)
        } else {
            self.success_criteria.clone()
        }
    }

    /// Identity of the action for "do not repeat the exact failed action" checks.
    /// Ref ids are excluded because they change every snapshot; the caller
    /// passes the resolved element signature instead.
    pub fn fingerprint(&self, target_signature: Option<&str>) -> String {
        let target = target_signature
            .map(str::to_string)
            .or_else(|| self.action.target_question().map(|q| q.trim().to_lowercase()))
            .unwrap_or_default();
        let value = match &self.action {
            PlannedAction::SetCheckbox { checked, .. } => checked.to_string(),
            other => other
                .intended_value()
                .map(|v| v.trim().to_lowercase())
                .unwrap_or_default(),
        };
        format!("{}|{}|{}", self.kind(), target, value)
    }
}

pub fn default_criteria(action: &PlannedAction) -> Vec<SuccessCriterion> {
    match action {
        PlannedAction::SetCheckbox { .. } | PlannedAction::SetRadio { .. } => vec![
            SuccessCriterion::TargetChecked,
            SuccessCriterion::GroupExclusive,
            SuccessCriterion::QuestionErrorCleared,
        ],
        PlannedAction::TypeRef { .. } | PlannedAction::SelectRef { .. } => {
            vec![SuccessCriterion::ValueMatches]
        }
        PlannedAction::UploadFile { .. } => vec![SuccessCriterion::FileAttached],
        PlannedAction::Submit { .. } => vec![SuccessCriterion::OutcomeClassified],
        PlannedAction::ClickRef { .. } => vec![
            SuccessCriterion::TargetChecked,
            SuccessCriterion::PageChanged,
        ],
        PlannedAction::WaitFor { text: Some(text), .. } => vec![SuccessCriterion::TextVisible {
            text: text.clone(),
        }],
        PlannedAction::WaitFor { text: None, .. } => vec![SuccessCriterion::PageChanged],
        PlannedAction::RefreshSoft => vec![SuccessCriterion::PageReloaded],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formpilot_core_types::SnapshotEpoch;

    #[test]
    fn parses_radio_by_question() {
        let plan: ActionPlan = serde_json::from_str(
            r#"{"action":"set-radio","target_question":"Authorized to work?","value":"Yes"}"#,
        )
        .unwrap();
        assert_eq!(plan.kind(), ActionKind::SetRadio);
        assert!(plan.action.has_target());
        assert_eq!(plan.action.target_question(), Some("Authorized to work?"));
        assert_eq!(plan.effective_criteria().len(), 3);
    }

    #[test]
    fn parses_type_ref_with_criteria() {
        let plan: ActionPlan = serde_json::from_str(
            r#"{"action":"type_ref","ref":"e4_2","value":"Ada","success_criteria":[{"kind":"value_matches"}],"timeout_ms":5000}"#,
        )
        .unwrap();
        assert_eq!(
            plan.action.target_ref(),
            Some(RefId::new(SnapshotEpoch(4), 2))
        );
        assert_eq!(plan.timeout_ms, Some(5000));
        assert_eq!(plan.success_criteria, vec![SuccessCriterion::ValueMatches]);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let parsed = serde_json::from_str::<ActionPlan>(r#"{"action":"navigate","url":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn fingerprint_ignores_ref_ids() {
        let a = ActionPlan::new(PlannedAction::SetRadio {
            ref_id: Some(RefId::new(SnapshotEpoch(1), 3)),
            target_question: None,
            value: "Yes".to_string(),
        });
        let b = ActionPlan::new(PlannedAction::SetRadio {
            ref_id: Some(RefId::new(SnapshotEpoch(2), 9)),
            target_question: None,
            value: "yes".to_string(),
        });
        assert_eq!(
            a.fingerprint(Some("radio:sponsorship")),
            b.fingerprint(Some("radio:sponsorship"))
        );
        let c = ActionPlan::new(PlannedAction::SetRadio {
            ref_id: None,
            target_question: None,
            value: "No".to_string(),
        });
        assert_ne!(
            a.fingerprint(Some("radio:sponsorship")),
            c.fingerprint(Some("radio:sponsorship"))
        );
    }
}
