use std::collections::BTreeMap;
use std::fmt::Write as _;

use formpilot_core_types::RefId;
use serde::{Deserialize, Serialize};

use crate::model::SemanticSnapshot;
use crate::question::{extract_questions, QuestionBlock};
use crate::scope::PageScope;

const FIELD_ROLES: &[&str] = &[
    "textbox",
    "searchbox",
    "combobox",
    "listbox",
    "spinbutton",
    "file_input",
    "radio",
    "checkbox",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    pub ref_id: RefId,
    pub label: String,
    pub role: String,
    pub required: bool,
    pub filled: bool,
    pub has_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Page-wide field graph. Two fields are adjacent when they share a choice
/// group or a page section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormGraph {
    pub page_scope: PageScope,
    pub fields: Vec<FieldNode>,
    pub questions: Vec<QuestionBlock>,
    pub submit_refs: Vec<RefId>,
    pub required_unfilled: Vec<String>,
    pub error_snippets: Vec<String>,
    #[serde(skip)]
    adjacency: BTreeMap<RefId, Vec<RefId>>,
}

impl FormGraph {
    pub fn from_snapshot(snapshot: &SemanticSnapshot) -> Self {
        let fields: Vec<FieldNode> = snapshot
            .primary_elements()
            .filter(|el| FIELD_ROLES.contains(&el.role.as_str()))
            .map(|el| FieldNode {
                ref_id: el.ref_id,
                label: el.name.clone(),
                role: el.role.clone(),
                required: el.required,
                filled: el.is_filled(),
                has_error: el.invalid,
                group: el.group_signature.clone(),
                section: el.section.clone(),
            })
            .collect();

        let mut adjacency: BTreeMap<RefId, Vec<RefId>> = BTreeMap::new();
        for field in &fields {
            let neighbours = fields
                .iter()
                .filter(|other| other.ref_id != field.ref_id)
                .filter(|other| {
                    let same_group = field.group.is_some() && field.group == other.group;
                    let same_section = field.section.is_some() && field.section == other.section;
                    same_group || same_section
                })
                .map(|other| other.ref_id)
                .collect();
            adjacency.insert(field.ref_id, neighbours);
        }

        Self {
            page_scope: PageScope {
                domain: snapshot.domain.clone(),
                normalized_path: snapshot.normalized_path.clone(),
            },
            fields,
            questions: extract_questions(snapshot),
            submit_refs: snapshot.submit_candidates.iter().copied().collect(),
            required_unfilled: snapshot.required_unfilled.iter().cloned().collect(),
            error_snippets: snapshot.errors.iter().cloned().collect(),
            adjacency,
        }
    }

    pub fn neighbours(&self, ref_id: &RefId) -> &[RefId] {
        self.adjacency
            .get(ref_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn field(&self, ref_id: &RefId) -> Option<&FieldNode> {
        self.fields.iter().find(|f| &f.ref_id == ref_id)
    }

    pub fn question_for(&self, ref_id: &RefId) -> Option<&QuestionBlock> {
        self.questions.iter().find(|q| {
            q.options
                .iter()
                .any(|opt| opt.ref_id.as_ref() == Some(ref_id))
        })
    }

    pub fn question_by_text(&self, text: &str) -> Option<&QuestionBlock> {
        let wanted = text.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        self.questions.iter().find(|q| {
            let candidate = q.question_text.to_lowercase();
            candidate == wanted || candidate.contains(&wanted) || wanted.contains(&candidate)
        })
    }

    /// Compact text rendering for the decision prompt.
    pub fn render(&self, max_fields: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "PAGE {}{}",
            self.page_scope.domain, self.page_scope.normalized_path
        );
        if !self.error_snippets.is_empty() {
            let _ = writeln!(out, "ERRORS:");
            for err in &self.error_snippets {
                let _ = writeln!(out, "  ! {err}");
            }
        }
        if !self.required_unfilled.is_empty() {
            let _ = writeln!(out, "REQUIRED UNFILLED: {}", self.required_unfilled.join(", "));
        }
        if !self.questions.is_empty() {
            let _ = writeln!(out, "QUESTIONS:");
            for q in &self.questions {
                let options: Vec<String> = q
                    .options
                    .iter()
                    .map(|opt| {
                        let mark = if opt.selected { "x" } else { " " };
                        match opt.ref_id {
                            Some(id) => format!("[{mark}] {} ({id})", opt.text),
                            None => format!("[{mark}] {}", opt.text),
                        }
                    })
                    .collect();
                let flags = format!(
                    "{}{}",
                    if q.required { " *required" } else { "" },
                    if q.has_error { " !error" } else { "" }
                );
                let _ = writeln!(out, "  ? {}{flags}: {}", q.question_text, options.join(" "));
            }
        }
        let _ = writeln!(out, "FIELDS:");
        for field in self.fields.iter().filter(|f| f.group.is_none()).take(max_fields) {
            let state = if field.filled { "filled" } else { "empty" };
            let required = if field.required { " *required" } else { "" };
            let error = if field.has_error { " !error" } else { "" };
            let _ = writeln!(
                out,
                "  [{}] {} \"{}\" {state}{required}{error}",
                field.ref_id, field.role, field.label
            );
        }
        if !self.submit_refs.is_empty() {
            let refs: Vec<String> = self.submit_refs.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "SUBMIT: {}", refs.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SnapshotBuilder;
    use crate::model::{RawNode, RawPage};

    fn field(key: &str, role: &str, name: &str, section: &str) -> RawNode {
        RawNode {
            node_key: key.to_string(),
            role: role.to_string(),
            name: name.to_string(),
            section: Some(section.to_string()),
            visible: true,
            ..RawNode::default()
        }
    }

    #[test]
    fn fields_in_same_section_are_adjacent() {
        let page = RawPage {
            url: "https://example.com/apply".to_string(),
            nodes: vec![
                field("a", "textbox", "First name", "personal"),
                field("b", "textbox", "Last name", "personal"),
                field("c", "textbox", "Portfolio", "links"),
                field("s", "button", "Submit", "footer"),
            ],
            ..RawPage::default()
        };
        let snapshot = SnapshotBuilder::default().build(&page);
        let graph = FormGraph::from_snapshot(&snapshot);
        assert_eq!(graph.fields.len(), 3);
        let first = graph.fields[0].ref_id;
        assert_eq!(graph.neighbours(&first), &[graph.fields[1].ref_id]);
        assert!(graph.neighbours(&graph.fields[2].ref_id).is_empty());
        assert_eq!(graph.submit_refs.len(), 1);

        let text = graph.render(20);
        assert!(text.contains("PAGE example.com/apply"));
        assert!(text.contains("\"First name\" empty"));
        assert!(text.contains("SUBMIT:"));
    }
}
