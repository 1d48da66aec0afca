//! Completion heuristics for decision replies that failed to parse.

const COMPLETION_INDICATORS: &[&str] = &[
    "successfully submitted",
    "application was successfully submitted",
    "your application has been submitted",
    "thanks for your application",
    "thank you for applying",
    "process is complete",
    "application complete",
];

/// Whether free text from the decision service claims the submission is done.
///
/// Only a hint: the orchestrator still requires a passing completion
/// assessment before finalizing.
pub fn raw_response_implies_completion(raw: &str) -> bool {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return false;
    }
    COMPLETION_INDICATORS.iter().any(|token| text.contains(token))
}
