use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::events;
use crate::model::{SemanticElement, SemanticSnapshot};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementChange {
    Added { node_key: String, name: String },
    Removed { node_key: String, name: String },
    Changed {
        node_key: String,
        name: String,
        field: String,
        before: String,
        after: String,
    },
}

/// Observable difference between two snapshots of the same session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub url_changed: bool,
    pub title_changed: bool,
    pub page_version_changed: bool,
    pub text_changed: bool,
    pub errors_added: Vec<String>,
    pub errors_removed: Vec<String>,
    pub changes: Vec<ElementChange>,
}

impl SnapshotDiff {
    /// No semantic change; a bumped page version alone does not count.
    pub fn is_empty(&self) -> bool {
        !self.url_changed
            && !self.title_changed
            && !self.text_changed
            && self.errors_added.is_empty()
            && self.errors_removed.is_empty()
            && self.changes.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.changes.len() + self.errors_added.len() + self.errors_removed.len()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "url_changed": self.url_changed,
            "title_changed": self.title_changed,
            "text_changed": self.text_changed,
            "errors_added": self.errors_added,
            "errors_removed": self.errors_removed,
            "changes": self.changes.len(),
        })
    }
}

pub fn diff(base: &SemanticSnapshot, current: &SemanticSnapshot) -> SnapshotDiff {
    let started = Instant::now();
    let before: BTreeMap<&str, &SemanticElement> = base
        .elements
        .iter()
        .map(|el| (el.node_key.as_str(), el))
        .collect();
    let after: BTreeMap<&str, &SemanticElement> = current
        .elements
        .iter()
        .map(|el| (el.node_key.as_str(), el))
        .collect();

    let mut changes = Vec::new();
    for (key, old) in &before {
        match after.get(key) {
            None => changes.push(ElementChange::Removed {
                node_key: key.to_string(),
                name: old.name.clone(),
            }),
            Some(new) => collect_field_changes(old, new, &mut changes),
        }
    }
    for (key, new) in &after {
        if !before.contains_key(key) {
            changes.push(ElementChange::Added {
                node_key: key.to_string(),
                name: new.name.clone(),
            });
        }
    }

    let errors_added: Vec<String> = current.errors.difference(&base.errors).cloned().collect();
    let errors_removed: Vec<String> = base.errors.difference(&current.errors).cloned().collect();

    let result = SnapshotDiff {
        url_changed: base.url != current.url,
        title_changed: base.title != current.title,
        page_version_changed: base.page_version != current.page_version,
        text_changed: text_fingerprint(&base.visible_text) != text_fingerprint(&current.visible_text),
        errors_added,
        errors_removed,
        changes,
    };
    events::emit_diff(result.change_count(), started.elapsed());
    result
}

fn collect_field_changes(
    old: &SemanticElement,
    new: &SemanticElement,
    changes: &mut Vec<ElementChange>,
) {
    let mut push = |field: &str, before: String, after: String| {
        if before != after {
            changes.push(ElementChange::Changed {
                node_key: new.node_key.clone(),
                name: new.name.clone(),
                field: field.to_string(),
                before,
                after,
            });
        }
    };
    push("value", old.value.clone(), new.value.clone());
    push("checked", fmt_opt(old.checked), fmt_opt(new.checked));
    push("disabled", old.disabled.to_string(), new.disabled.to_string());
    push("visible", old.visible.to_string(), new.visible.to_string());
    push("invalid", old.invalid.to_string(), new.invalid.to_string());
    push("name", old.name.clone(), new.name.clone());
    push(
        "attached_files",
        old.attached_files.len().to_string(),
        new.attached_files.len().to_string(),
    );
}

fn fmt_opt(value: Option<bool>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn text_fingerprint(text: &str) -> BTreeSet<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SnapshotBuilder;
    use crate::model::{RawNode, RawPage};

    fn page(value: &str, checked: bool) -> RawPage {
        RawPage {
            url: "https://example.com/apply".to_string(),
            title: "Apply".to_string(),
            visible_text: "Apply now".to_string(),
            version: 1,
            nodes: vec![
                RawNode {
                    node_key: "email".to_string(),
                    role: "textbox".to_string(),
                    name: "Email".to_string(),
                    value: value.to_string(),
                    visible: true,
                    ..RawNode::default()
                },
                RawNode {
                    node_key: "terms".to_string(),
                    role: "checkbox".to_string(),
                    name: "I agree".to_string(),
                    checked: Some(checked),
                    visible: true,
                    ..RawNode::default()
                },
            ],
        }
    }

    #[test]
    fn identical_pages_have_empty_diff() {
        let builder = SnapshotBuilder::default();
        let a = builder.build(&page("", false));
        let mut raw = page("", false);
        raw.version = 2;
        let b = builder.build(&raw);
        let d = diff(&a, &b);
        assert!(d.page_version_changed);
        assert!(d.is_empty());
    }

    #[test]
    fn value_and_checked_changes_are_reported() {
        let builder = SnapshotBuilder::default();
        let a = builder.build(&page("", false));
        let b = builder.build(&page("ada@example.com", true));
        let d = diff(&a, &b);
        assert!(!d.is_empty());
        let fields: Vec<&str> = d
            .changes
            .iter()
            .filter_map(|c| match c {
                ElementChange::Changed { field, .. } => Some(field.as_str()),
                _ => None,
            })
            .collect();
        assert!(fields.contains(&"value"));
        assert!(fields.contains(&"checked"));
    }
}
