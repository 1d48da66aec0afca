//! Semantic Snapshot Builder.
//!
//! Turns a [`RawPage`] into a [`SemanticSnapshot`]: hidden clones are folded,
//! assist-panel nodes are down-weighted, and the required-but-unfilled set,
//! error strings and submit candidates are derived. Output content depends only
//! on the input page; the epoch counter is the only per-call state.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use formpilot_core_types::{RefId, SnapshotEpoch};
use serde::{Deserialize, Serialize};

use crate::events;
use crate::model::{
    normalize_text, signature_for, ElementWeight, RawNode, RawPage, SemanticElement,
    SemanticSnapshot,
};
use crate::scope::stable_page_scope;

const ERROR_KEYWORDS: &[&str] = &[
    "required",
    "missing",
    "invalid",
    "error",
    "please complete",
    "please fill",
    "failed",
];

const SUBMIT_KEYWORDS: &[&str] = &["submit", "apply", "continue", "review", "next"];

const FILLABLE_ROLES: &[&str] = &[
    "textbox",
    "searchbox",
    "combobox",
    "listbox",
    "spinbutton",
    "file_input",
    "radio",
    "checkbox",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Default: 160
    pub max_elements: usize,
    /// Default: 6
    pub max_errors: usize,
    /// Default: 1200
    pub visible_text_limit: usize,
    /// Section names (case-insensitive substrings) treated as assist panels.
    pub assist_markers: Vec<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_elements: 160,
            max_errors: 6,
            visible_text_limit: 1200,
            assist_markers: vec![
                "autofill".to_string(),
                "assist".to_string(),
                "extension".to_string(),
            ],
        }
    }
}

pub struct SnapshotBuilder {
    config: SnapshotConfig,
    next_epoch: AtomicU64,
}

impl SnapshotBuilder {
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            config,
            next_epoch: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn build(&self, page: &RawPage) -> SemanticSnapshot {
        let started = Instant::now();
        let epoch = SnapshotEpoch(self.next_epoch.fetch_add(1, Ordering::Relaxed));
        let scope = stable_page_scope(&page.url);

        let mut primary = Vec::new();
        let mut assist = Vec::new();
        for node in self.dedup(&page.nodes) {
            let weight = if self.is_assist(node) {
                ElementWeight::Assist
            } else {
                ElementWeight::Primary
            };
            match weight {
                ElementWeight::Primary => primary.push((node, weight)),
                ElementWeight::Assist => assist.push((node, weight)),
            }
        }

        // Assist nodes go last so they never crowd out the form when capped.
        let mut elements = Vec::new();
        let mut unnamed_files = 0usize;
        for (node, weight) in primary.into_iter().chain(assist) {
            if elements.len() >= self.config.max_elements {
                break;
            }
            let role = normalize_role(node);
            let mut name = normalize_text(&node.name);
            if name.is_empty() {
                if role == "file_input" {
                    unnamed_files += 1;
                    name = format!("file upload {unnamed_files}");
                } else {
                    continue;
                }
            }
            let index = elements.len() as u32;
            elements.push(SemanticElement {
                ref_id: RefId::new(epoch, index),
                node_key: node.node_key.clone(),
                group_signature: group_signature(node, &role),
                group_label: node
                    .group_label
                    .as_deref()
                    .map(normalize_text)
                    .filter(|label| !label.is_empty()),
                role,
                name,
                value: node.value.trim().to_string(),
                required: node.required,
                disabled: node.disabled,
                checked: node.checked,
                visible: node.visible,
                section: node.section.clone(),
                weight,
                invalid: node.invalid,
                options: node.options.clone(),
                attached_files: node.attached_files.clone(),
            });
        }

        let errors = self.extract_errors(page, &elements);
        let required_unfilled = required_unfilled(&elements);
        let submit_candidates = submit_candidates(&elements);
        let page_id = page_id(&page.url, &elements);

        let snapshot = SemanticSnapshot {
            epoch,
            page_version: page.version,
            url: page.url.clone(),
            domain: scope.domain,
            normalized_path: scope.normalized_path,
            title: normalize_text(&page.title),
            elements,
            errors,
            required_unfilled,
            submit_candidates,
            page_id,
            visible_text: truncate_chars(page.visible_text.trim(), self.config.visible_text_limit),
        };
        events::emit_snapshot(&snapshot, started.elapsed());
        snapshot
    }

    fn is_assist(&self, node: &RawNode) -> bool {
        if node.in_assist_region {
            return true;
        }
        let Some(section) = node.section.as_deref() else {
            return false;
        };
        let section = section.to_lowercase();
        self.config
            .assist_markers
            .iter()
            .any(|marker| section.contains(&marker.to_lowercase()))
    }

    /// Folds hidden clones into their visible twin. Two visible nodes with the
    /// same identity are distinct fields and both survive.
    fn dedup<'a>(&self, nodes: &'a [RawNode]) -> Vec<&'a RawNode> {
        let mut kept: Vec<&RawNode> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for node in nodes {
            let key = dedup_key(node);
            match positions.get(&key) {
                Some(&pos) if !(kept[pos].visible && node.visible) => {
                    if !kept[pos].visible && node.visible {
                        kept[pos] = node;
                    }
                }
                Some(_) => kept.push(node),
                None => {
                    positions.insert(key, kept.len());
                    kept.push(node);
                }
            }
        }
        kept
    }

    fn extract_errors(&self, page: &RawPage, elements: &[SemanticElement]) -> BTreeSet<String> {
        fn push(text: String, ordered: &mut Vec<String>) {
            if !text.is_empty() && !ordered.contains(&text) {
                ordered.push(text);
            }
        }

        let mut ordered: Vec<String> = Vec::new();
        for element in elements.iter().filter(|el| !el.is_assist()) {
            if element.role == "alert" && element.visible {
                push(element.name.clone(), &mut ordered);
            }
        }
        for line in page.visible_text.lines() {
            let line = normalize_text(line);
            let len = line.chars().count();
            if !(8..=200).contains(&len) {
                continue;
            }
            let lowered = line.to_lowercase();
            if ERROR_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
                push(line, &mut ordered);
            }
        }
        ordered.truncate(self.config.max_errors);
        ordered.into_iter().collect()
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(SnapshotConfig::default())
    }
}

const PAGE_ID_LEADING_ELEMENTS: usize = 12;

fn page_id(url: &str, elements: &[SemanticElement]) -> String {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    for element in elements.iter().take(PAGE_ID_LEADING_ELEMENTS) {
        element.role.hash(&mut hasher);
        element.name.to_lowercase().hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

fn normalize_role(node: &RawNode) -> String {
    let input_type = node.input_type.as_deref().map(str::to_lowercase);
    match input_type.as_deref() {
        Some("file") => "file_input".to_string(),
        Some("radio") => "radio".to_string(),
        Some("checkbox") => "checkbox".to_string(),
        _ => {
            let role = node.role.trim().to_lowercase();
            match role.as_str() {
                "textarea" | "text" | "input" => "textbox".to_string(),
                "select" => "combobox".to_string(),
                _ => role,
            }
        }
    }
}

fn group_signature(node: &RawNode, role: &str) -> Option<String> {
    if !matches!(role, "radio" | "checkbox") {
        return None;
    }
    let label = node
        .group_label
        .as_deref()
        .filter(|label| !label.trim().is_empty())
        .or(node.group.as_deref())?;
    Some(signature_for(role, label))
}

fn dedup_key(node: &RawNode) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        normalize_role(node),
        normalize_text(&node.name).to_lowercase(),
        node.group.as_deref().unwrap_or_default(),
        node.section.as_deref().unwrap_or_default(),
        node.in_assist_region
    )
}

/// Required fields minus fields holding a normalized value. A choice group is
/// filled once any member is checked.
///
/// Each field outside a group gets its own entry; a label repeated on the page
/// is suffixed with its occurrence (`textbox:email#2`) so keys stay free of
/// epoch-bound ref ids.
fn required_unfilled(elements: &[SemanticElement]) -> BTreeSet<String> {
    let mut required = BTreeSet::new();
    let mut filled = BTreeSet::new();
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    for element in elements.iter().filter(|el| !el.is_assist()) {
        if !FILLABLE_ROLES.contains(&element.role.as_str()) {
            continue;
        }
        let mut signature = element.field_signature();
        if element.group_signature.is_none() {
            let seen = occurrences.entry(signature.clone()).or_insert(0);
            *seen += 1;
            if *seen > 1 {
                signature = format!("{signature}#{seen}");
            }
        }
        if element.required {
            required.insert(signature.clone());
        }
        if element.is_filled() {
            filled.insert(signature);
        }
    }
    required.difference(&filled).cloned().collect()
}

fn submit_candidates(elements: &[SemanticElement]) -> BTreeSet<RefId> {
    elements
        .iter()
        .filter(|el| !el.is_assist() && el.visible && !el.disabled)
        .filter(|el| matches!(el.role.as_str(), "button" | "link"))
        .filter(|el| {
            let name = el.name.to_lowercase();
            SUBMIT_KEYWORDS.iter().any(|kw| name.contains(kw))
        })
        .map(|el| el.ref_id)
        .collect()
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: &str, role: &str, name: &str) -> RawNode {
        RawNode {
            node_key: key.to_string(),
            role: role.to_string(),
            name: name.to_string(),
            visible: true,
            ..RawNode::default()
        }
    }

    fn page(nodes: Vec<RawNode>) -> RawPage {
        RawPage {
            url: "https://jobs.example.com/apply/42".to_string(),
            title: "Apply".to_string(),
            visible_text: String::new(),
            version: 3,
            nodes,
        }
    }

    #[test]
    fn hidden_clone_is_folded_into_visible_copy() {
        let mut hidden = node("n1", "textbox", "Email");
        hidden.visible = false;
        let visible = node("n2", "textbox", "Email");
        let snapshot = SnapshotBuilder::default().build(&page(vec![hidden, visible]));
        assert_eq!(snapshot.elements.len(), 1);
        assert_eq!(snapshot.elements[0].node_key, "n2");
        assert!(snapshot.elements[0].visible);
    }

    #[test]
    fn assist_fields_never_count_as_primary() {
        let mut assist_field = node("a1", "textbox", "Autofill profile");
        assist_field.required = true;
        assist_field.in_assist_region = true;
        let mut assist_button = node("a2", "button", "Autofill and continue");
        assist_button.section = Some("Autofill panel".to_string());
        let submit = node("b1", "button", "Submit application");

        let snapshot =
            SnapshotBuilder::default().build(&page(vec![assist_field, assist_button, submit]));
        assert!(snapshot.required_unfilled.is_empty());
        assert_eq!(snapshot.submit_candidates.len(), 1);
        let submit_ref = snapshot.submit_candidates.iter().next().unwrap();
        assert_eq!(snapshot.element(submit_ref).unwrap().node_key, "b1");
        // Assist elements are ordered after the primary form.
        assert_eq!(snapshot.elements.last().unwrap().weight, ElementWeight::Assist);
    }

    #[test]
    fn required_unfilled_is_set_difference() {
        let mut name = node("n1", "textbox", "Full name");
        name.required = true;
        name.value = "Ada".to_string();
        let mut phone = node("n2", "textbox", "Phone");
        phone.required = true;
        phone.value = "   ".to_string();
        let mut country = node("n3", "combobox", "Country");
        country.required = true;
        country.value = "Select...".to_string();

        let snapshot = SnapshotBuilder::default().build(&page(vec![name, phone, country]));
        let unfilled: Vec<_> = snapshot.required_unfilled.iter().cloned().collect();
        assert_eq!(unfilled, vec!["combobox:country", "textbox:phone"]);
    }

    #[test]
    fn same_label_required_fields_are_counted_apart() {
        let mut first = node("e1", "textbox", "Email");
        first.required = true;
        first.section = Some("Applicant".to_string());
        let mut second = node("e2", "textbox", "Email");
        second.required = true;
        second.section = Some("Reference".to_string());

        let snapshot = SnapshotBuilder::default().build(&page(vec![first.clone(), second.clone()]));
        let unfilled: Vec<_> = snapshot.required_unfilled.iter().cloned().collect();
        assert_eq!(unfilled, vec!["textbox:email", "textbox:email#2"]);

        first.value = "ada@example.com".to_string();
        let snapshot = SnapshotBuilder::default().build(&page(vec![first, second]));
        let unfilled: Vec<_> = snapshot.required_unfilled.iter().cloned().collect();
        assert_eq!(unfilled, vec!["textbox:email#2"]);
    }

    #[test]
    fn placeholder_named_buttons_are_kept() {
        let snapshot = SnapshotBuilder::default().build(&page(vec![
            node("c1", "button", "Choose"),
            node("s1", "button", "Select"),
        ]));
        let names: Vec<&str> = snapshot.elements.iter().map(|el| el.name.as_str()).collect();
        assert_eq!(names, vec!["Choose", "Select"]);
    }

    #[test]
    fn radio_group_is_filled_when_any_option_checked() {
        let mut yes = node("r1", "radio", "Yes");
        yes.required = true;
        yes.group = Some("auth".to_string());
        yes.group_label = Some("Are you authorized to work?".to_string());
        yes.checked = Some(false);
        let mut no = yes.clone();
        no.node_key = "r2".to_string();
        no.name = "No".to_string();

        let snapshot = SnapshotBuilder::default().build(&page(vec![yes.clone(), no.clone()]));
        assert_eq!(snapshot.required_unfilled.len(), 1);

        no.checked = Some(true);
        let snapshot = SnapshotBuilder::default().build(&page(vec![yes, no]));
        assert!(snapshot.required_unfilled.is_empty());
    }

    #[test]
    fn errors_come_from_visible_lines_and_alerts() {
        let mut raw = page(vec![node("al", "alert", "Please fix the errors below")]);
        raw.visible_text = "Welcome\nThis field is required\nok\nPhone number is invalid".to_string();
        let snapshot = SnapshotBuilder::default().build(&raw);
        assert!(snapshot.errors.contains("This field is required"));
        assert!(snapshot.errors.contains("Phone number is invalid"));
        assert!(snapshot.errors.contains("Please fix the errors below"));
        assert!(!snapshot.errors.contains("Welcome"));
    }

    #[test]
    fn same_input_yields_same_content_with_fresh_refs() {
        let builder = SnapshotBuilder::default();
        let raw = page(vec![node("n1", "textbox", "Email"), node("b", "button", "Next")]);
        let first = builder.build(&raw);
        let second = builder.build(&raw);
        assert_ne!(first.epoch, second.epoch);
        assert_eq!(first.content_fingerprint(), second.content_fingerprint());
        assert_eq!(first.page_id, second.page_id);
        assert!(second.element(&first.elements[0].ref_id).is_none());
    }

    #[test]
    fn unnamed_file_inputs_get_positional_names() {
        let mut file = node("f", "button", "");
        file.input_type = Some("file".to_string());
        let snapshot = SnapshotBuilder::default().build(&page(vec![file, node("x", "textbox", "")]));
        assert_eq!(snapshot.elements.len(), 1);
        assert_eq!(snapshot.elements[0].name, "file upload 1");
        assert!(snapshot.elements[0].is_file_input());
    }
}
