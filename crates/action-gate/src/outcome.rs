//! Submission outcome classification.
//!
//! Precedence is fixed: completion text, then external-block phrasing, then
//! network/server phrasing, then visible validation problems, else unknown.

use formpilot_core_types::OutcomeClass;
use once_cell::sync::Lazy;
use perceiver_structural::SemanticSnapshot;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const EVIDENCE_SNIPPET_LIMIT: usize = 220;

const COMPLETION_PHRASES: &[&str] = &[
    "thank you for applying",
    "thanks for your application",
    "application submitted",
    "application received",
    "successfully submitted",
    "your application has been submitted",
    "application complete",
    "thanks for submitting",
];

static EXTERNAL_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)flagged as possible spam|suspicious activity|anti-spam|\brisk\b|rate limit|too many requests|try again later|couldn't submit your application",
    )
    .expect("static regex")
});

static TRANSIENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)network error|temporarily unavailable|\btimeout\b|timed out|connection error|server error|\b5xx\b|\b50[234]\b",
    )
    .expect("static regex")
});

pub fn looks_like_completion_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMPLETION_PHRASES.iter().any(|p| lower.contains(p))
}

pub fn looks_transient(text: &str) -> bool {
    TRANSIENT.is_match(text)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub outcome_class: OutcomeClass,
    pub failure_code: String,
    pub confidence: f64,
    pub evidence_snippet: String,
    pub retryable: bool,
}

impl SubmissionOutcome {
    fn new(class: OutcomeClass, code: &str, confidence: f64, evidence: &str) -> Self {
        Self {
            outcome_class: class,
            failure_code: code.to_string(),
            confidence,
            evidence_snippet: snippet(evidence),
            retryable: class.is_retryable(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome_class == OutcomeClass::SuccessConfirmed
    }

    /// `key=value; ...` reason used for manual hand-off.
    pub fn manual_reason(&self, action: &str, target: &str) -> String {
        let evidence: String = self.evidence_snippet.chars().take(160).collect();
        format!(
            "submission blocked after retry limit; classification={}; code={}; action={}:{}; evidence={}",
            self.outcome_class, self.failure_code, action, target, evidence
        )
    }
}

pub fn snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(EVIDENCE_SNIPPET_LIMIT).collect()
}

/// Everything the classifier looks at after a submit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostSubmitEvidence {
    pub visible_text: String,
    pub title: String,
    pub url_before: String,
    pub url_after: String,
    pub errors: Vec<String>,
    pub required_unfilled: Vec<String>,
    pub submit_visible: bool,
    /// Error raised by the submit primitive itself, if it failed.
    pub action_error: Option<String>,
}

impl PostSubmitEvidence {
    pub fn from_snapshots(
        before: &SemanticSnapshot,
        after: &SemanticSnapshot,
        action_error: Option<String>,
    ) -> Self {
        Self {
            visible_text: after.visible_text.clone(),
            title: after.title.clone(),
            url_before: before.url.clone(),
            url_after: after.url.clone(),
            errors: after.errors.iter().cloned().collect(),
            required_unfilled: after.required_unfilled.iter().cloned().collect(),
            submit_visible: after.has_submit_candidate(),
            action_error,
        }
    }

    pub fn url_changed(&self) -> bool {
        !self.url_before.is_empty() && self.url_before != self.url_after
    }

    fn page_text(&self) -> String {
        format!("{}\n{}", self.title, self.visible_text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutcomeClassifier;

impl OutcomeClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, evidence: &PostSubmitEvidence) -> SubmissionOutcome {
        let page_text = evidence.page_text();
        let outcome = self.classify_inner(evidence, &page_text);
        debug!(
            target: "gate.outcome",
            class = %outcome.outcome_class,
            code = %outcome.failure_code,
            confidence = outcome.confidence,
            "submission outcome classified"
        );
        outcome
    }

    fn classify_inner(&self, evidence: &PostSubmitEvidence, page_text: &str) -> SubmissionOutcome {
        if looks_like_completion_text(page_text) {
            let mut confidence: f64 = 0.85;
            if evidence.url_changed() {
                confidence += 0.07;
            }
            if !evidence.submit_visible {
                confidence += 0.05;
            }
            return SubmissionOutcome::new(
                OutcomeClass::SuccessConfirmed,
                "completion_detected",
                confidence.min(0.99),
                page_text,
            );
        }

        let action_error = evidence.action_error.as_deref().unwrap_or_default();
        let haystack = format!("{page_text}\n{action_error}");
        if let Some(found) = EXTERNAL_BLOCK.find(&haystack) {
            return SubmissionOutcome::new(
                OutcomeClass::ExternalBlocked,
                "anti_spam_or_risk_blocked",
                0.85,
                around(&haystack, found.start()),
            );
        }
        if let Some(found) = TRANSIENT.find(&haystack) {
            return SubmissionOutcome::new(
                OutcomeClass::TransientNetwork,
                "network_or_server_transient",
                0.75,
                around(&haystack, found.start()),
            );
        }

        if !evidence.errors.is_empty() || !evidence.required_unfilled.is_empty() {
            let joined: Vec<&str> = evidence
                .errors
                .iter()
                .chain(evidence.required_unfilled.iter())
                .map(String::as_str)
                .take(2)
                .collect();
            let confidence = if !evidence.errors.is_empty() && !evidence.required_unfilled.is_empty()
            {
                0.9
            } else {
                0.8
            };
            return SubmissionOutcome::new(
                OutcomeClass::ValidationError,
                "missing_required_field",
                confidence,
                &joined.join(" | "),
            );
        }

        if evidence.action_error.is_none() {
            SubmissionOutcome::new(
                OutcomeClass::UnknownBlocked,
                "submit_clicked_without_confirmed_transition",
                0.4,
                page_text,
            )
        } else {
            SubmissionOutcome::new(
                OutcomeClass::UnknownBlocked,
                "submit_action_failed",
                0.5,
                &haystack,
            )
        }
    }
}

/// Text window starting a little before the match.
fn around(text: &str, byte_start: usize) -> &str {
    let mut start = byte_start.saturating_sub(40);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    text[start..].trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(text: &str) -> PostSubmitEvidence {
        PostSubmitEvidence {
            visible_text: text.to_string(),
            url_before: "https://example.com/apply".to_string(),
            url_after: "https://example.com/apply".to_string(),
            submit_visible: true,
            ..PostSubmitEvidence::default()
        }
    }

    #[test]
    fn completion_text_wins_over_everything() {
        let mut ev = evidence("Application Submitted! Please try again later if you want to edit.");
        ev.errors = vec!["stale banner".to_string()];
        let outcome = OutcomeClassifier::new().classify(&ev);
        assert_eq!(outcome.outcome_class, OutcomeClass::SuccessConfirmed);
        assert!(!outcome.retryable);
    }

    #[test]
    fn spam_flag_is_external_block() {
        let outcome = OutcomeClassifier::new()
            .classify(&evidence("Your submission was flagged as possible spam."));
        assert_eq!(outcome.outcome_class, OutcomeClass::ExternalBlocked);
        assert_eq!(outcome.failure_code, "anti_spam_or_risk_blocked");
        assert!(outcome.retryable);
        assert!(outcome.evidence_snippet.contains("flagged as possible spam"));
    }

    #[test]
    fn risk_requires_word_boundary() {
        let outcome = OutcomeClassifier::new().classify(&evidence("Fields marked with an asterisk"));
        assert_eq!(outcome.outcome_class, OutcomeClass::UnknownBlocked);
    }

    #[test]
    fn network_failure_from_action_error_is_transient() {
        let mut ev = evidence("Apply");
        ev.action_error = Some("request timed out".to_string());
        let outcome = OutcomeClassifier::new().classify(&ev);
        assert_eq!(outcome.outcome_class, OutcomeClass::TransientNetwork);
    }

    #[test]
    fn visible_errors_are_validation_errors() {
        let mut ev = evidence("Apply");
        ev.errors = vec!["Phone is required".to_string()];
        ev.required_unfilled = vec!["textbox:phone".to_string()];
        let outcome = OutcomeClassifier::new().classify(&ev);
        assert_eq!(outcome.outcome_class, OutcomeClass::ValidationError);
        assert_eq!(outcome.failure_code, "missing_required_field");
        assert!(!outcome.retryable);
        assert_eq!(outcome.evidence_snippet, "Phone is required | textbox:phone");
    }

    #[test]
    fn silent_submit_is_unknown_blocked() {
        let outcome = OutcomeClassifier::new().classify(&evidence("Apply"));
        assert_eq!(outcome.outcome_class, OutcomeClass::UnknownBlocked);
        assert_eq!(outcome.failure_code, "submit_clicked_without_confirmed_transition");
        assert!(outcome.retryable);
    }

    #[test]
    fn snippet_is_capped() {
        let long = "rate limit ".repeat(60);
        let outcome = OutcomeClassifier::new().classify(&evidence(&long));
        assert!(outcome.evidence_snippet.chars().count() <= EVIDENCE_SNIPPET_LIMIT);
    }

    #[test]
    fn manual_reason_is_structured() {
        let outcome = OutcomeClassifier::new().classify(&evidence("Too many requests"));
        let reason = outcome.manual_reason("submit", "Submit application");
        assert!(reason.contains("classification=external_blocked"));
        assert!(reason.contains("code=anti_spam_or_risk_blocked"));
        assert!(reason.contains("action=submit:Submit application"));
    }
}
