//! Verifier behaviour per action kind, driven through real snapshots.

use action_gate::{
    DefaultGateValidator, GateValidator, OutcomeClassifier, PostSubmitEvidence, ValidationContext,
};
use action_primitives::{ActionPlan, PlannedAction};
use perceiver_structural::{diff, RawNode, RawPage, SemanticSnapshot, SnapshotBuilder};

fn radio(key: &str, name: &str, checked: bool, invalid: bool) -> RawNode {
    RawNode {
        node_key: key.to_string(),
        role: "radio".to_string(),
        name: name.to_string(),
        group: Some("visa".to_string()),
        group_label: Some("Do you require visa sponsorship?".to_string()),
        required: true,
        checked: Some(checked),
        invalid,
        visible: true,
        ..RawNode::default()
    }
}

fn textbox(key: &str, name: &str, value: &str) -> RawNode {
    RawNode {
        node_key: key.to_string(),
        role: "textbox".to_string(),
        name: name.to_string(),
        value: value.to_string(),
        visible: true,
        ..RawNode::default()
    }
}

fn page(version: u64, nodes: Vec<RawNode>) -> RawPage {
    RawPage {
        url: "https://ats.example.com/apply".to_string(),
        title: "Apply".to_string(),
        visible_text: String::new(),
        version,
        nodes,
    }
}

async fn verify(
    plan: &ActionPlan,
    target: Option<&str>,
    value: Option<&str>,
    checked: Option<bool>,
    before: &SemanticSnapshot,
    after: &SemanticSnapshot,
) -> action_gate::GateResult {
    let delta = diff(before, after);
    let context = ValidationContext {
        plan,
        target_node: target,
        intended_value: value,
        intended_checked: checked,
        before,
        after,
        diff: &delta,
        outcome: None,
    };
    DefaultGateValidator::new()
        .validate(&plan.effective_criteria(), &context)
        .await
        .expect("validation runs")
}

#[tokio::test]
async fn radio_switch_passes_on_target_checked() {
    let builder = SnapshotBuilder::default();
    let before = builder.build(&page(1, vec![radio("y", "Yes", true, false), radio("n", "No", false, false)]));
    let after = builder.build(&page(2, vec![radio("y", "Yes", false, false), radio("n", "No", true, false)]));
    let plan = ActionPlan::new(PlannedAction::SetRadio {
        ref_id: Some(before.elements[1].ref_id),
        target_question: None,
        value: "No".to_string(),
    });
    let result = verify(&plan, Some("n"), Some("No"), Some(true), &before, &after).await;
    assert!(result.passed);
    assert_eq!(result.matched.as_deref(), Some("target_checked"));
}

#[tokio::test]
async fn radio_without_state_change_fails() {
    let builder = SnapshotBuilder::default();
    let nodes = vec![radio("y", "Yes", false, true), radio("n", "No", false, true)];
    let before = builder.build(&page(1, nodes.clone()));
    let after = builder.build(&page(1, nodes));
    let plan = ActionPlan::new(PlannedAction::SetRadio {
        ref_id: Some(before.elements[0].ref_id),
        target_question: None,
        value: "Yes".to_string(),
    });
    let result = verify(&plan, Some("y"), Some("Yes"), Some(true), &before, &after).await;
    assert!(!result.passed);
    assert_eq!(result.reasons.len(), 3);
}

#[tokio::test]
async fn error_cleared_counts_even_if_checked_state_is_hidden() {
    let builder = SnapshotBuilder::default();
    let before = builder.build(&page(1, vec![radio("y", "Yes", false, true), radio("n", "No", false, true)]));
    // Custom widget: checked state not exposed, but the error went away.
    let mut yes = radio("y", "Yes", false, false);
    yes.checked = None;
    let after = builder.build(&page(2, vec![yes, radio("n", "No", false, false)]));
    let plan = ActionPlan::new(PlannedAction::SetRadio {
        ref_id: Some(before.elements[0].ref_id),
        target_question: None,
        value: "Yes".to_string(),
    });
    let result = verify(&plan, Some("y"), Some("Yes"), Some(true), &before, &after).await;
    assert!(result.passed);
    assert_eq!(result.matched.as_deref(), Some("question_error_cleared"));
}

#[tokio::test]
async fn typed_value_must_be_present() {
    let builder = SnapshotBuilder::default();
    let before = builder.build(&page(1, vec![textbox("e", "Email", "")]));
    let plan = ActionPlan::new(PlannedAction::TypeRef {
        ref_id: before.elements[0].ref_id,
        value: "ada@example.com".to_string(),
    });

    let filled = builder.build(&page(2, vec![textbox("e", "Email", "  ADA@example.com ")]));
    assert!(verify(&plan, Some("e"), Some("ada@example.com"), None, &before, &filled).await.passed);

    let ignored = builder.build(&page(2, vec![textbox("e", "Email", "")]));
    assert!(!verify(&plan, Some("e"), Some("ada@example.com"), None, &before, &ignored).await.passed);
}

#[tokio::test]
async fn upload_passes_on_attached_file() {
    let builder = SnapshotBuilder::default();
    let mut file = textbox("f", "Resume", "");
    file.input_type = Some("file".to_string());
    let before = builder.build(&page(1, vec![file.clone()]));
    file.attached_files = vec!["cv.pdf".to_string()];
    let after = builder.build(&page(2, vec![file]));
    let plan = ActionPlan::new(PlannedAction::UploadFile {
        ref_id: before.elements[0].ref_id,
        path: "/tmp/cv.pdf".to_string(),
    });
    let result = verify(&plan, Some("f"), Some("/tmp/cv.pdf"), None, &before, &after).await;
    assert!(result.passed);
    assert_eq!(result.matched.as_deref(), Some("file_attached"));
}

#[tokio::test]
async fn submit_passes_once_an_outcome_exists() {
    let builder = SnapshotBuilder::default();
    let before = builder.build(&page(1, vec![textbox("e", "Email", "a@b.c")]));
    let mut done = page(2, vec![]);
    done.visible_text = "Thank you for applying".to_string();
    let after = builder.build(&done);
    let outcome = OutcomeClassifier::new().classify(&PostSubmitEvidence::from_snapshots(
        &before, &after, None,
    ));
    let plan = ActionPlan::new(PlannedAction::Submit { ref_id: None });
    let delta = diff(&before, &after);
    let context = ValidationContext {
        plan: &plan,
        target_node: None,
        intended_value: None,
        intended_checked: None,
        before: &before,
        after: &after,
        diff: &delta,
        outcome: Some(&outcome),
    };
    let result = DefaultGateValidator::new()
        .validate(&plan.effective_criteria(), &context)
        .await
        .unwrap();
    assert!(result.passed);
    assert!(outcome.is_success());
}
