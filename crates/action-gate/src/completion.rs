//! Multi-signal completion scoring.
//!
//! Independent of the outcome classifier so a single weak signal (a stray
//! "thank you" line, a URL containing `/success`) cannot by itself end a run.

use serde::{Deserialize, Serialize};

use crate::outcome::looks_like_completion_text;

pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 0.72;

const EXTRA_SUCCESS_PHRASES: &[&str] = &[
    "we'll be in touch",
    "we will review your application",
    "application complete",
];

/// Broader than the classifier's block pattern: any "try again" prompt
/// withholds confirmation, not only "try again later".
const BLOCK_PHRASES: &[&str] = &[
    "flagged as possible spam",
    "couldn't submit your application",
    "suspicious activity",
    "try again",
    "rate limit",
];

const URL_SUCCESS_HINTS: &[&str] = &[
    "/thanks",
    "/thank-you",
    "/success",
    "/submitted",
    "/complete",
    "/confirmation",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionSignals {
    pub success_text: bool,
    pub submit_button_visible: bool,
    pub has_error: bool,
    pub url_success_hint: bool,
    pub external_blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionAssessment {
    pub confirmed: bool,
    pub score: f64,
    pub reason: String,
    pub signals: CompletionSignals,
}

/// Inputs for [`assess_completion`].
#[derive(Debug, Clone, Copy)]
pub struct CompletionInput<'a> {
    pub body_text: &'a str,
    pub current_url: &'a str,
    pub has_submit_button: bool,
    pub has_error: bool,
}

pub fn assess_completion(input: CompletionInput<'_>, threshold: f64) -> CompletionAssessment {
    let lower = input.body_text.to_lowercase();
    let url_lower = input.current_url.to_lowercase();

    let signals = CompletionSignals {
        success_text: looks_like_completion_text(&lower)
            || EXTRA_SUCCESS_PHRASES.iter().any(|p| lower.contains(p)),
        submit_button_visible: input.has_submit_button,
        has_error: input.has_error,
        url_success_hint: URL_SUCCESS_HINTS.iter().any(|h| url_lower.contains(h)),
        external_blocked: BLOCK_PHRASES.iter().any(|p| lower.contains(p)),
    };

    let mut score: f64 = 0.0;
    if signals.success_text {
        score += 0.68;
    }
    if signals.submit_button_visible {
        score -= 0.30;
    } else {
        score += 0.16;
    }
    if signals.has_error {
        score -= 0.48;
    } else {
        score += 0.10;
    }
    if signals.url_success_hint {
        score += 0.12;
    }
    if signals.external_blocked {
        score -= 0.60;
    }
    let score = (score.clamp(0.0, 1.0) * 1000.0).round() / 1000.0;
    let confirmed = score >= threshold && !signals.has_error && !signals.external_blocked;

    CompletionAssessment {
        confirmed,
        score,
        reason: if confirmed {
            "high_confidence_success".to_string()
        } else {
            "not_confident_enough".to_string()
        },
        signals,
    }
}
