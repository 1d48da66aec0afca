use std::collections::BTreeSet;

use formpilot_core_types::{RefId, SnapshotEpoch};
use serde::{Deserialize, Serialize};

/// One structural node as reported by the browser layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawNode {
    /// Opaque, browser-side handle. Stable for the lifetime of the DOM node.
    pub node_key: String,
    pub role: String,
    pub name: String,
    pub value: String,
    pub required: bool,
    pub disabled: bool,
    pub checked: Option<bool>,
    #[serde(default = "default_true")]
    pub visible: bool,
    pub input_type: Option<String>,
    /// Radio/checkbox group identifier (usually the `name` attribute).
    pub group: Option<String>,
    /// Human-readable question text for the group, if any.
    pub group_label: Option<String>,
    pub section: Option<String>,
    pub in_assist_region: bool,
    pub invalid: bool,
    pub options: Vec<String>,
    pub attached_files: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Raw page state handed over by a [`crate::PerceptionPort`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPage {
    pub url: String,
    pub title: String,
    pub visible_text: String,
    /// Browser mutation counter; bumps on every DOM change.
    pub version: u64,
    pub nodes: Vec<RawNode>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementWeight {
    #[default]
    Primary,
    /// Inside an assist/plugin panel; never part of the primary form.
    Assist,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticElement {
    pub ref_id: RefId,
    #[serde(skip_serializing)]
    pub node_key: String,
    pub role: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub value: String,
    pub required: bool,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub weight: ElementWeight,
    pub invalid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub attached_files: Vec<String>,
}

impl SemanticElement {
    pub fn is_choice(&self) -> bool {
        matches!(self.role.as_str(), "radio" | "checkbox")
    }

    pub fn is_file_input(&self) -> bool {
        self.role == "file_input"
    }

    pub fn is_assist(&self) -> bool {
        self.weight == ElementWeight::Assist
    }

    pub fn is_checked(&self) -> bool {
        self.checked.unwrap_or(false)
    }

    /// Stable identity of the field, independent of ref ids.
    pub fn field_signature(&self) -> String {
        match &self.group_signature {
            Some(group) => group.clone(),
            None => signature_for(&self.role, &self.name),
        }
    }

    /// Whether the field holds a usable value.
    pub fn is_filled(&self) -> bool {
        if self.is_choice() {
            return self.is_checked();
        }
        if self.is_file_input() {
            return !self.attached_files.is_empty() || !normalize_value(&self.value).is_empty();
        }
        !normalize_value(&self.value).is_empty()
    }

    /// Content-only view used for determinism checks.
    pub fn content_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{:?}|{}|{:?}|{:?}|{}",
            self.role,
            self.name,
            self.value,
            self.required,
            self.disabled,
            self.checked,
            self.visible,
            self.group_signature,
            self.weight,
            self.invalid
        )
    }
}

/// Immutable, normalized view of one observation cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticSnapshot {
    pub epoch: SnapshotEpoch,
    pub page_version: u64,
    pub url: String,
    pub domain: String,
    pub normalized_path: String,
    pub title: String,
    pub elements: Vec<SemanticElement>,
    pub errors: BTreeSet<String>,
    pub required_unfilled: BTreeSet<String>,
    pub submit_candidates: BTreeSet<RefId>,
    /// Hash of url plus the leading element identities; survives re-observation.
    #[serde(default)]
    pub page_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub visible_text: String,
}

impl SemanticSnapshot {
    pub fn element(&self, ref_id: &RefId) -> Option<&SemanticElement> {
        if !ref_id.belongs_to(self.epoch) {
            return None;
        }
        self.elements.get(ref_id.index as usize)
    }

    pub fn element_by_node(&self, node_key: &str) -> Option<&SemanticElement> {
        self.elements.iter().find(|el| el.node_key == node_key)
    }

    pub fn primary_elements(&self) -> impl Iterator<Item = &SemanticElement> {
        self.elements.iter().filter(|el| !el.is_assist())
    }

    /// Members of the radio/checkbox group the element belongs to, itself included.
    pub fn group_members<'a>(&'a self, element: &'a SemanticElement) -> Vec<&'a SemanticElement> {
        match &element.group_signature {
            Some(signature) => self
                .elements
                .iter()
                .filter(|el| el.group_signature.as_deref() == Some(signature.as_str()))
                .collect(),
            None => vec![element],
        }
    }

    pub fn has_submit_candidate(&self) -> bool {
        !self.submit_candidates.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Count of elements a plan can meaningfully target.
    pub fn actionable_count(&self) -> usize {
        self.primary_elements()
            .filter(|el| el.visible && !el.disabled)
            .count()
    }

    /// Content fingerprint that ignores epoch and ref ids.
    pub fn content_fingerprint(&self) -> String {
        let mut parts = vec![
            self.domain.clone(),
            self.normalized_path.clone(),
            self.title.clone(),
        ];
        parts.extend(self.elements.iter().map(SemanticElement::content_key));
        parts.extend(self.errors.iter().cloned());
        parts.extend(self.required_unfilled.iter().cloned());
        let submit_positions: Vec<String> = self
            .submit_candidates
            .iter()
            .map(|id| id.index.to_string())
            .collect();
        parts.push(submit_positions.join(","));
        parts.join("\n")
    }
}

pub fn signature_for(role: &str, name: &str) -> String {
    let name: String = normalize_text(name).to_lowercase().chars().take(40).collect();
    format!("{}:{}", role.to_lowercase(), name)
}

/// Trims and collapses whitespace. Used for names, labels and page text.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Like [`normalize_text`], and placeholder selections map to empty.
/// Only field values go through this.
pub fn normalize_value(value: &str) -> String {
    let collapsed = normalize_text(value);
    let lowered = collapsed.to_lowercase();
    let placeholder = matches!(
        lowered.as_str(),
        "select" | "select..." | "select one" | "please select" | "choose" | "choose..." | "--" | "-"
    );
    if placeholder {
        String::new()
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_values_normalize_to_empty() {
        assert_eq!(normalize_value("  Select...  "), "");
        assert_eq!(normalize_value("--"), "");
        assert_eq!(normalize_value("  New   York "), "New York");
    }

    #[test]
    fn text_keeps_placeholder_words() {
        assert_eq!(normalize_text("  Select  "), "Select");
        assert_eq!(signature_for("button", "Choose"), "button:choose");
    }

    #[test]
    fn signature_is_lowercase_and_truncated() {
        let long = "A".repeat(60);
        let signature = signature_for("Textbox", &long);
        assert_eq!(signature.len(), "textbox:".len() + 40);
        assert!(signature.starts_with("textbox:aaa"));
    }
}
