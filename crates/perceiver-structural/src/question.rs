use std::collections::BTreeMap;

use formpilot_core_types::RefId;
use serde::{Deserialize, Serialize};

use crate::model::{SemanticElement, SemanticSnapshot};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionNode {
    pub text: String,
    pub role: String,
    pub selected: bool,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<RefId>,
}

/// A question with its option set, derived from one snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionBlock {
    /// Group signature for choice groups, field signature for selects.
    pub question_id: String,
    pub question_text: String,
    pub control_type: String,
    pub required: bool,
    pub has_error: bool,
    pub options: Vec<OptionNode>,
}

impl QuestionBlock {
    pub fn selected_options(&self) -> Vec<&str> {
        self.options
            .iter()
            .filter(|opt| opt.selected)
            .map(|opt| opt.text.as_str())
            .collect()
    }

    pub fn is_answered(&self) -> bool {
        self.options.iter().any(|opt| opt.selected)
    }

    /// Yes/No style prompt; these are the ones that tend to loop.
    pub fn is_binary(&self) -> bool {
        if self.options.len() != 2 {
            return false;
        }
        let mut texts: Vec<String> = self.options.iter().map(|o| o.text.to_lowercase()).collect();
        texts.sort();
        texts == ["no", "yes"]
    }

    pub fn option_by_text(&self, text: &str) -> Option<&OptionNode> {
        let wanted = text.trim().to_lowercase();
        self.options
            .iter()
            .find(|opt| opt.text.to_lowercase() == wanted)
    }
}

/// Groups choice controls and option-bearing selects into question blocks.
pub fn extract_questions(snapshot: &SemanticSnapshot) -> Vec<QuestionBlock> {
    let mut groups: BTreeMap<usize, (String, Vec<&SemanticElement>)> = BTreeMap::new();
    let mut first_seen: BTreeMap<String, usize> = BTreeMap::new();

    for (position, element) in snapshot.primary_elements().enumerate() {
        let Some(signature) = element.group_signature.clone() else {
            continue;
        };
        let slot = *first_seen.entry(signature.clone()).or_insert(position);
        groups
            .entry(slot)
            .or_insert_with(|| (signature, Vec::new()))
            .1
            .push(element);
    }

    let mut blocks: Vec<(usize, QuestionBlock)> = groups
        .into_iter()
        .map(|(slot, (signature, members))| (slot, choice_block(snapshot, signature, &members)))
        .collect();

    for (position, element) in snapshot.primary_elements().enumerate() {
        if element.group_signature.is_none()
            && matches!(element.role.as_str(), "combobox" | "listbox")
            && !element.options.is_empty()
        {
            blocks.push((position, select_block(snapshot, element)));
        }
    }

    blocks.sort_by_key(|(slot, _)| *slot);
    blocks.into_iter().map(|(_, block)| block).collect()
}

fn choice_block(
    snapshot: &SemanticSnapshot,
    signature: String,
    members: &[&SemanticElement],
) -> QuestionBlock {
    let first = members[0];
    let question_text = first
        .group_label
        .clone()
        .unwrap_or_else(|| signature.split_once(':').map(|(_, t)| t.to_string()).unwrap_or_default());
    let has_error = members.iter().any(|m| m.invalid) || mentioned_in_errors(snapshot, &question_text);
    QuestionBlock {
        question_id: signature,
        control_type: first.role.clone(),
        required: members.iter().any(|m| m.required),
        has_error,
        options: members
            .iter()
            .map(|m| OptionNode {
                text: m.name.clone(),
                role: m.role.clone(),
                selected: m.is_checked(),
                disabled: m.disabled,
                ref_id: Some(m.ref_id),
            })
            .collect(),
        question_text,
    }
}

fn select_block(snapshot: &SemanticSnapshot, element: &SemanticElement) -> QuestionBlock {
    let current = element.value.to_lowercase();
    QuestionBlock {
        question_id: element.field_signature(),
        question_text: element.name.clone(),
        control_type: element.role.clone(),
        required: element.required,
        has_error: element.invalid || mentioned_in_errors(snapshot, &element.name),
        options: element
            .options
            .iter()
            .map(|text| OptionNode {
                text: text.clone(),
                role: "option".to_string(),
                selected: !current.is_empty() && text.to_lowercase() == current,
                disabled: false,
                ref_id: None,
            })
            .collect(),
    }
}

fn mentioned_in_errors(snapshot: &SemanticSnapshot, question_text: &str) -> bool {
    let needle = question_text.trim().to_lowercase();
    if needle.len() < 4 {
        return false;
    }
    snapshot
        .errors
        .iter()
        .any(|err| err.to_lowercase().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SnapshotBuilder;
    use crate::model::{RawNode, RawPage};

    fn radio(key: &str, name: &str, checked: bool) -> RawNode {
        RawNode {
            node_key: key.to_string(),
            role: "radio".to_string(),
            name: name.to_string(),
            checked: Some(checked),
            visible: true,
            required: true,
            group: Some("sponsor".to_string()),
            group_label: Some("Will you require sponsorship?".to_string()),
            ..RawNode::default()
        }
    }

    #[test]
    fn radio_group_becomes_binary_question() {
        let page = RawPage {
            url: "https://example.com/apply".to_string(),
            nodes: vec![
                RawNode {
                    node_key: "t".to_string(),
                    role: "textbox".to_string(),
                    name: "Name".to_string(),
                    visible: true,
                    ..RawNode::default()
                },
                radio("y", "Yes", false),
                radio("n", "No", true),
            ],
            ..RawPage::default()
        };
        let snapshot = SnapshotBuilder::default().build(&page);
        let questions = extract_questions(&snapshot);
        assert_eq!(questions.len(), 1);
        let q = &questions[0];
        assert_eq!(q.question_text, "Will you require sponsorship?");
        assert!(q.is_binary());
        assert!(q.required);
        assert_eq!(q.selected_options(), vec!["No"]);
        assert!(q.option_by_text("yes").unwrap().ref_id.is_some());
    }

    #[test]
    fn select_with_options_is_a_question() {
        let page = RawPage {
            url: "https://example.com/apply".to_string(),
            nodes: vec![RawNode {
                node_key: "s".to_string(),
                role: "combobox".to_string(),
                name: "Preferred office".to_string(),
                value: "Berlin".to_string(),
                options: vec!["London".to_string(), "Berlin".to_string()],
                visible: true,
                ..RawNode::default()
            }],
            ..RawPage::default()
        };
        let snapshot = SnapshotBuilder::default().build(&page);
        let questions = extract_questions(&snapshot);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].selected_options(), vec!["Berlin"]);
        assert!(!questions[0].is_binary());
    }
}
