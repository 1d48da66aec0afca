//! Intent engine.
//!
//! Maps label and question text onto a small closed vocabulary. The mapping is
//! keyword based, overrides win over the built-in rules, and lookups are cached
//! for the lifetime of one job.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use action_flow::ResolvedTarget;
use action_primitives::{ActionPlan, PlannedAction};
use serde::{Deserialize, Serialize};
use tracing::trace;

const SIGNATURE_LIMIT: usize = 80;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    WorkAuthorization,
    Relocation,
    Sponsorship,
    LocationPreference,
    OfficePreference,
    Progression,
    Upload,
    FreeText,
    Unclassified,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::WorkAuthorization => "work_authorization",
            Intent::Relocation => "relocation",
            Intent::Sponsorship => "sponsorship",
            Intent::LocationPreference => "location_preference",
            Intent::OfficePreference => "office_preference",
            Intent::Progression => "progression",
            Intent::Upload => "upload",
            Intent::FreeText => "free_text",
            Intent::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered rules; the first match wins. Keywords with surrounding spaces
/// only match whole words.
const RULES: &[(Intent, &[&str])] = &[
    (
        Intent::Sponsorship,
        &["sponsor", " visa ", " visas ", "h1b", "h 1b", "immigration"],
    ),
    (
        Intent::WorkAuthorization,
        &[
            "authorized to work",
            "authorised to work",
            "authorization to work",
            "work authorization",
            "eligible to work",
            "right to work",
            "legally",
            "work permit",
        ],
    ),
    (
        Intent::Relocation,
        &["relocat", "willing to move", "move to"],
    ),
    (
        Intent::OfficePreference,
        &[
            "which office",
            " office",
            "hybrid",
            "on site",
            "onsite",
            "in person",
            " remote",
        ],
    ),
    (
        Intent::LocationPreference,
        &[
            "location",
            "where are you",
            " city ",
            "located",
            " reside",
            " live ",
            "country",
        ],
    ),
    (
        Intent::Upload,
        &[" resume", " cv ", "upload", "attach", "cover letter"],
    ),
    (
        Intent::Progression,
        &[" submit", " apply", " continue", " next ", " review", " proceed"],
    ),
    (
        Intent::FreeText,
        &[
            " why ",
            "describe",
            "tell us",
            "explain",
            "anything else",
            "additional information",
            "how did you hear",
        ],
    ),
];

const FREE_TEXT_ROLES: &[&str] = &["textbox", "searchbox"];

/// Lowercase, strips punctuation, asterisks and digits, collapses whitespace
/// and truncates to 80 characters.
pub fn question_signature(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphabetic() { c } else { ' ' })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .chars()
        .take(SIGNATURE_LIMIT)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// `yes`/`y` and `no`/`n`, ignoring case and punctuation.
pub fn normalize_yes_no(text: &str) -> Option<&'static str> {
    match question_signature(text).as_str() {
        "yes" | "y" => Some("yes"),
        "no" | "n" => Some("no"),
        _ => None,
    }
}

fn matches_rule(padded: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| padded.contains(kw))
}

/// Per-job intent classifier.
#[derive(Debug, Clone, Default)]
pub struct IntentEngine {
    overrides: Vec<(String, Intent)>,
    cache: HashMap<String, Intent>,
}

impl IntentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override substrings are matched against the question signature before
    /// any built-in rule.
    pub fn with_overrides(overrides: &BTreeMap<String, Intent>) -> Self {
        let overrides = overrides
            .iter()
            .map(|(needle, intent)| (question_signature(needle), *intent))
            .filter(|(needle, _)| !needle.is_empty())
            .collect();
        Self {
            overrides,
            cache: HashMap::new(),
        }
    }

    pub fn cached_labels(&self) -> usize {
        self.cache.len()
    }

    pub fn classify(&mut self, text: &str) -> Intent {
        let signature = question_signature(text);
        if signature.is_empty() {
            return Intent::Unclassified;
        }
        if let Some(intent) = self.cache.get(&signature) {
            return *intent;
        }
        let intent = self.lookup(&signature);
        trace!(target: "agent.intent", %signature, %intent, "classified");
        self.cache.insert(signature, intent);
        intent
    }

    fn lookup(&self, signature: &str) -> Intent {
        if let Some((_, intent)) = self
            .overrides
            .iter()
            .find(|(needle, _)| signature.contains(needle.as_str()))
        {
            return *intent;
        }
        let padded = format!(" {signature} ");
        RULES
            .iter()
            .find(|(_, keywords)| matches_rule(&padded, keywords))
            .map(|(intent, _)| *intent)
            .unwrap_or(Intent::Unclassified)
    }

    /// Classifies a field by its label, falling back to `free_text` for
    /// unmatched text inputs.
    pub fn classify_field(&mut self, role: &str, label: &str) -> Intent {
        match self.classify(label) {
            Intent::Unclassified if FREE_TEXT_ROLES.contains(&role) => Intent::FreeText,
            intent => intent,
        }
    }

    /// Semantic identity of a planned action.
    ///
    /// Answers to the same question share an [`ActionSemantics::intent`] and
    /// [`ActionSemantics::question_signature`] regardless of the option picked;
    /// the option only shows up in `action_intent`.
    pub fn describe(&mut self, plan: &ActionPlan, target: Option<&ResolvedTarget>) -> ActionSemantics {
        let element = target.map(|t| &t.element);
        let is_choice = element.is_some_and(|el| el.is_choice())
            || matches!(
                plan.action,
                PlannedAction::SetRadio { .. } | PlannedAction::SetCheckbox { .. }
            );

        if matches!(plan.action, PlannedAction::Submit { .. }) {
            return ActionSemantics::progression();
        }

        if is_choice {
            let question = target
                .and_then(|t| t.question.clone())
                .or_else(|| plan.action.target_question().map(str::to_string))
                .or_else(|| element.map(|el| el.name.clone()))
                .unwrap_or_default();
            let option = element
                .map(|el| el.name.clone())
                .or_else(|| plan.action.intended_value().map(str::to_string))
                .unwrap_or_default();
            let signature = question_signature(&question);
            let answer = normalize_yes_no(&option).unwrap_or("option");
            return ActionSemantics {
                intent: self.classify(&question),
                action_intent: format!("answer::{signature}::{answer}"),
                question_signature: signature,
            };
        }

        match (&plan.action, element) {
            (PlannedAction::ClickRef { .. }, Some(el))
                if matches!(el.role.as_str(), "button" | "link")
                    && self.classify(&el.name) == Intent::Progression =>
            {
                ActionSemantics::progression()
            }
            (_, Some(el)) => {
                let intent = self.classify_field(&el.role, &el.name);
                ActionSemantics {
                    intent,
                    action_intent: format!("field::{intent}"),
                    question_signature: question_signature(&el.name),
                }
            }
            (action, None) => ActionSemantics {
                intent: Intent::Unclassified,
                action_intent: format!("page::{}", action.kind()),
                question_signature: action.kind().to_string(),
            },
        }
    }
}

/// Output of [`IntentEngine::describe`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionSemantics {
    pub intent: Intent,
    /// `answer::<signature>::<yes|no|option>`, `progression::submit` or `field::<intent>`
    pub action_intent: String,
    pub question_signature: String,
}

impl ActionSemantics {
    fn progression() -> Self {
        Self {
            intent: Intent::Progression,
            action_intent: "progression::submit".to_string(),
            question_signature: "submit".to_string(),
        }
    }

    pub fn is_progression(&self) -> bool {
        self.intent == Intent::Progression
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_strips_noise() {
        assert_eq!(
            question_signature("  Are you legally authorized to work in the U.S.? *"),
            "are you legally authorized to work in the u s"
        );
        assert_eq!(question_signature("Question 12: Visa?"), "question visa");
        assert_eq!(question_signature(&"word ".repeat(40)).len(), 79);
    }

    #[test]
    fn keyword_rules() {
        let mut engine = IntentEngine::new();
        assert_eq!(
            engine.classify("Will you now or in the future require sponsorship?"),
            Intent::Sponsorship
        );
        assert_eq!(
            engine.classify("Are you legally authorized to work in the US?"),
            Intent::WorkAuthorization
        );
        assert_eq!(
            engine.classify("Are you open to relocating?"),
            Intent::Relocation
        );
        assert_eq!(
            engine.classify("Which office would you like to work from?"),
            Intent::OfficePreference
        );
        assert_eq!(engine.classify("Current location"), Intent::LocationPreference);
        assert_eq!(engine.classify("Resume/CV"), Intent::Upload);
        assert_eq!(engine.classify("Submit application"), Intent::Progression);
        assert_eq!(engine.classify("Favourite colour"), Intent::Unclassified);
        assert_eq!(engine.classify("***"), Intent::Unclassified);
    }

    #[test]
    fn whole_word_keywords_do_not_match_inside_words() {
        let mut engine = IntentEngine::new();
        assert_eq!(engine.classify("Delivery preferences"), Intent::Unclassified);
        assert_eq!(engine.classify("Where do you live?"), Intent::LocationPreference);
    }

    #[test]
    fn overrides_win_and_results_are_cached() {
        let mut overrides = BTreeMap::new();
        overrides.insert("Visa status".to_string(), Intent::WorkAuthorization);
        let mut engine = IntentEngine::with_overrides(&overrides);
        assert_eq!(
            engine.classify("What is your current visa status?"),
            Intent::WorkAuthorization
        );
        assert_eq!(engine.cached_labels(), 1);
        engine.classify("What is your current VISA status?!");
        assert_eq!(engine.cached_labels(), 1);
    }

    #[test]
    fn unmatched_textbox_is_free_text() {
        let mut engine = IntentEngine::new();
        assert_eq!(engine.classify_field("textbox", "Portfolio URL"), Intent::FreeText);
        assert_eq!(engine.classify_field("combobox", "Portfolio URL"), Intent::Unclassified);
    }

    #[test]
    fn yes_no_normalization() {
        assert_eq!(normalize_yes_no(" Yes "), Some("yes"));
        assert_eq!(normalize_yes_no("N"), Some("no"));
        assert_eq!(normalize_yes_no("Not sure"), None);
    }
}
