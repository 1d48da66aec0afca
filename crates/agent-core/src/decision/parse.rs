use action_primitives::ActionPlan;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{Decision, DecisionStatus};
use crate::errors::DecisionError;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_]*\s*(.*?)```").expect("valid fence pattern"));

/// Pulls the first JSON object out of a model reply: bare, fenced, or inline.
pub fn extract_json_object(raw: &str) -> Option<String> {
    if raw.trim_start().starts_with('{') {
        return Some(trim_fences(raw));
    }

    if let Some(block) = FENCED_BLOCK
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
    {
        if block.contains('{') {
            return Some(trim_fences(block));
        }
    }

    let start = raw.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..=start + idx].trim().to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn trim_fences(value: &str) -> String {
    value.trim().trim_matches('`').trim().to_string()
}

#[derive(Debug, Deserialize)]
struct DecisionEnvelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    actions: Vec<Value>,
    #[serde(default)]
    next_action: Option<Value>,
}

/// Parses a raw reply into a [`Decision`].
///
/// Anything that does not fit the schema is reported as
/// [`DecisionError::Malformed`] with the raw text attached.
pub fn parse_decision(raw: &str) -> Result<Decision, DecisionError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| DecisionError::malformed("reply contains no JSON object", raw))?;
    let envelope: DecisionEnvelope = serde_json::from_str(&json)
        .map_err(|err| DecisionError::malformed(format!("invalid decision JSON: {err}"), raw))?;

    let status = match envelope
        .status
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .as_deref()
    {
        None | Some("") | Some("continue") | Some("in_progress") => DecisionStatus::Continue,
        Some("done") | Some("complete") | Some("completed") => DecisionStatus::Done,
        Some("stuck") | Some("blocked") => DecisionStatus::Stuck,
        Some(other) => {
            return Err(DecisionError::malformed(
                format!("unknown status '{other}'"),
                raw,
            ))
        }
    };

    let mut values = envelope.actions;
    if values.is_empty() {
        if let Some(next) = envelope.next_action.filter(|v| !v.is_null()) {
            values.push(next);
        }
    }
    let mut plans = Vec::with_capacity(values.len());
    for (idx, value) in values.into_iter().enumerate() {
        let plan: ActionPlan = serde_json::from_value(value)
            .map_err(|err| DecisionError::malformed(format!("action {idx} invalid: {err}"), raw))?;
        plans.push(plan);
    }

    if status == DecisionStatus::Continue && plans.is_empty() {
        return Err(DecisionError::malformed(
            "status continue without an action",
            raw,
        ));
    }

    Ok(Decision {
        status,
        summary: envelope.summary.unwrap_or_default(),
        plans,
        model_index: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::PlannedAction;

    #[test]
    fn extracts_from_fenced_block() {
        let input = "Here is my answer:\n```json\n{\"status\":\"done\"}\n```";
        let extracted = extract_json_object(input).unwrap();
        assert_eq!(extracted, "{\"status\":\"done\"}");
    }

    #[test]
    fn inline_extraction_ignores_braces_in_strings() {
        let input = r#"sure { "summary": "fill {name}", "status": "done" } trailing }"#;
        let extracted = extract_json_object(input).unwrap();
        assert_eq!(extracted, r#"{ "summary": "fill {name}", "status": "done" }"#);
        assert!(extract_json_object("no braces here").is_none());
    }

    #[test]
    fn parses_next_action() {
        let raw = r#"{"status":"continue","summary":"answer auth","next_action":{"action":"set_radio","target_question":"Are you authorized to work?","value":"Yes"}}"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.status, DecisionStatus::Continue);
        assert_eq!(decision.plans.len(), 1);
        assert!(matches!(
            &decision.plans[0].action,
            PlannedAction::SetRadio { value, .. } if value == "Yes"
        ));
    }

    #[test]
    fn parses_action_chain_with_refs() {
        let raw = r#"```json
{"status":"continue","actions":[
  {"action":"type_ref","ref":"e2_0","value":"Ada"},
  {"action":"click","ref":"e2_3"}
]}
```"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.plans.len(), 2);
        assert_eq!(decision.plans[1].kind().as_str(), "click_ref");
    }

    #[test]
    fn done_needs_no_action() {
        let decision = parse_decision(r#"{"status":"done","summary":"submitted"}"#).unwrap();
        assert_eq!(decision.status, DecisionStatus::Done);
        assert!(decision.plans.is_empty());
    }

    #[test]
    fn schema_violations_are_malformed() {
        let err = parse_decision("I think the application is complete.").unwrap_err();
        assert_eq!(err.raw_text(), Some("I think the application is complete."));

        let err = parse_decision(r#"{"status":"continue"}"#).unwrap_err();
        assert_eq!(err.class(), "malformed");

        let err = parse_decision(r#"{"status":"continue","next_action":{"action":"drag_drop"}}"#)
            .unwrap_err();
        assert_eq!(err.class(), "malformed");

        let err = parse_decision(r#"{"status":"pondering"}"#).unwrap_err();
        assert_eq!(err.class(), "malformed");
    }
}
