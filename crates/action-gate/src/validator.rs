//! Post-action verifier.
//!
//! A plan passes when at least one of its success criteria holds against the
//! re-observed page. No matching evidence is a failure, never a silent pass.

use std::time::Instant;

use action_primitives::SuccessCriterion;
use async_trait::async_trait;
use perceiver_structural::{normalize_value, SemanticElement};
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::GateError;
use crate::types::{Evidence, EvidenceType, GateResult, ValidationContext};

#[async_trait]
pub trait GateValidator: Send + Sync {
    async fn validate(
        &self,
        criteria: &[SuccessCriterion],
        context: &ValidationContext<'_>,
    ) -> Result<GateResult, GateError>;

    async fn validate_condition(
        &self,
        criterion: &SuccessCriterion,
        context: &ValidationContext<'_>,
    ) -> Result<bool, GateError>;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultGateValidator;

impl DefaultGateValidator {
    pub fn new() -> Self {
        Self
    }

    fn target_after<'a>(
        context: &ValidationContext<'a>,
    ) -> Result<&'a SemanticElement, GateError> {
        let key = context
            .target_node
            .ok_or_else(|| GateError::NotApplicable("action has no target".to_string()))?;
        context
            .target_after()
            .ok_or_else(|| GateError::TargetMissing(key.to_string()))
    }

    fn target_checked(context: &ValidationContext<'_>) -> Result<bool, GateError> {
        let after = Self::target_after(context)?;
        if !after.is_choice() {
            return Ok(false);
        }
        Ok(match context.intended_checked {
            Some(wanted) => after.is_checked() == wanted,
            None if after.role == "checkbox" => context
                .target_before()
                .map(|before| before.checked != after.checked)
                .unwrap_or(after.is_checked()),
            None => after.is_checked(),
        })
    }

    fn group_exclusive(context: &ValidationContext<'_>) -> Result<bool, GateError> {
        let after = Self::target_after(context)?;
        let Some(signature) = after.group_signature.as_deref() else {
            return Ok(false);
        };
        if !after.is_checked() {
            return Ok(false);
        }
        let others_before_checked = context.before.elements.iter().any(|el| {
            el.group_signature.as_deref() == Some(signature)
                && el.node_key != after.node_key
                && el.is_checked()
        });
        let others_after_clear = context
            .after
            .elements
            .iter()
            .filter(|el| el.group_signature.as_deref() == Some(signature))
            .filter(|el| el.node_key != after.node_key)
            .all(|el| !el.is_checked());
        Ok(others_before_checked && others_after_clear && after.role == "radio")
    }

    fn question_error_cleared(context: &ValidationContext<'_>) -> Result<bool, GateError> {
        let after = Self::target_after(context)?;
        let label = after
            .group_label
            .clone()
            .unwrap_or_else(|| after.name.clone())
            .to_lowercase();
        let flagged = |snapshot: &perceiver_structural::SemanticSnapshot| {
            let member_invalid = match after.group_signature.as_deref() {
                Some(signature) => snapshot
                    .elements
                    .iter()
                    .filter(|el| el.group_signature.as_deref() == Some(signature))
                    .any(|el| el.invalid),
                None => snapshot
                    .element_by_node(&after.node_key)
                    .is_some_and(|el| el.invalid),
            };
            let mentioned = label.len() >= 4
                && snapshot
                    .errors
                    .iter()
                    .any(|err| err.to_lowercase().contains(&label));
            member_invalid || mentioned
        };
        Ok(flagged(context.before) && !flagged(context.after))
    }

    fn value_matches(context: &ValidationContext<'_>) -> Result<bool, GateError> {
        let after = Self::target_after(context)?;
        let intended = context
            .intended_value
            .map(|v| normalize_value(v).to_lowercase())
            .unwrap_or_default();
        let actual = normalize_value(&after.value).to_lowercase();
        if intended.is_empty() {
            return Ok(actual.is_empty());
        }
        Ok(actual == intended || actual.contains(&intended))
    }

    fn file_attached(context: &ValidationContext<'_>) -> Result<bool, GateError> {
        let after = Self::target_after(context)?;
        if !after.attached_files.is_empty() {
            return Ok(true);
        }
        let file_name = context
            .intended_value
            .and_then(|path| std::path::Path::new(path).file_name())
            .map(|name| name.to_string_lossy().to_lowercase());
        Ok(match file_name {
            Some(name) if !name.is_empty() => after.value.to_lowercase().contains(&name),
            _ => false,
        })
    }

    fn evidence_for(criterion: &SuccessCriterion, context: &ValidationContext<'_>) -> Evidence {
        let target = context.target_after();
        match criterion {
            SuccessCriterion::TargetChecked
            | SuccessCriterion::GroupExclusive
            | SuccessCriterion::ValueMatches => Evidence::new(
                if matches!(criterion, SuccessCriterion::GroupExclusive) {
                    EvidenceType::Group
                } else {
                    EvidenceType::Element
                },
                criterion.name().to_string(),
                json!({
                    "node": context.target_node,
                    "checked": target.and_then(|t| t.checked),
                    "value": target.map(|t| t.value.clone()),
                }),
            ),
            SuccessCriterion::QuestionErrorCleared => Evidence::new(
                EvidenceType::Question,
                criterion.name().to_string(),
                json!({ "errors_removed": context.diff.errors_removed }),
            ),
            SuccessCriterion::FileAttached => Evidence::new(
                EvidenceType::File,
                criterion.name().to_string(),
                json!({ "files": target.map(|t| t.attached_files.clone()) }),
            ),
            SuccessCriterion::OutcomeClassified => Evidence::new(
                EvidenceType::Outcome,
                criterion.name().to_string(),
                json!({ "outcome": context.outcome }),
            ),
            SuccessCriterion::PageChanged | SuccessCriterion::PageReloaded => Evidence::new(
                EvidenceType::Diff,
                criterion.name().to_string(),
                context.diff.to_json(),
            ),
            SuccessCriterion::TextVisible { text } => Evidence::new(
                EvidenceType::Text,
                criterion.name().to_string(),
                json!({ "text": text }),
            ),
        }
    }
}

#[async_trait]
impl GateValidator for DefaultGateValidator {
    async fn validate(
        &self,
        criteria: &[SuccessCriterion],
        context: &ValidationContext<'_>,
    ) -> Result<GateResult, GateError> {
        let start = Instant::now();
        if criteria.is_empty() {
            warn!(target: "gate.validator", kind = %context.kind(), "no success criteria; failing");
            return Ok(GateResult::fail(vec!["no success criteria declared".to_string()])
                .with_latency(start.elapsed().as_millis() as u64));
        }

        let mut reasons = Vec::new();
        for criterion in criteria {
            match self.validate_condition(criterion, context).await {
                Ok(true) => {
                    debug!(
                        target: "gate.validator",
                        kind = %context.kind(),
                        criterion = criterion.name(),
                        "criterion held"
                    );
                    return Ok(GateResult::pass(criterion.name(), reasons)
                        .with_evidence(Self::evidence_for(criterion, context))
                        .with_latency(start.elapsed().as_millis() as u64));
                }
                Ok(false) => reasons.push(format!("{} not met", criterion.name())),
                Err(err) => {
                    debug!(
                        target: "gate.validator",
                        criterion = criterion.name(),
                        error = %err,
                        "criterion not evaluable"
                    );
                    reasons.push(format!("{}: {}", criterion.name(), err));
                }
            }
        }

        warn!(
            target: "gate.validator",
            kind = %context.kind(),
            reasons = ?reasons,
            "no success criterion held"
        );
        Ok(GateResult::fail(reasons)
            .with_evidence(Evidence::new(
                EvidenceType::Diff,
                "observed diff".to_string(),
                context.diff.to_json(),
            ))
            .with_latency(start.elapsed().as_millis() as u64))
    }

    async fn validate_condition(
        &self,
        criterion: &SuccessCriterion,
        context: &ValidationContext<'_>,
    ) -> Result<bool, GateError> {
        match criterion {
            SuccessCriterion::TargetChecked => Self::target_checked(context),
            SuccessCriterion::GroupExclusive => Self::group_exclusive(context),
            SuccessCriterion::QuestionErrorCleared => Self::question_error_cleared(context),
            SuccessCriterion::ValueMatches => Self::value_matches(context),
            SuccessCriterion::FileAttached => Self::file_attached(context),
            SuccessCriterion::OutcomeClassified => Ok(context.outcome.is_some()),
            SuccessCriterion::PageChanged => Ok(!context.diff.is_empty()),
            SuccessCriterion::TextVisible { text } => {
                let needle = text.trim().to_lowercase();
                if needle.is_empty() {
                    return Err(GateError::NotApplicable("empty text".to_string()));
                }
                Ok(context.after.visible_text.to_lowercase().contains(&needle)
                    || context.after.title.to_lowercase().contains(&needle))
            }
            SuccessCriterion::PageReloaded => Ok(context.diff.page_version_changed),
        }
    }
}
