//! Prompt text for the decision service.

use std::fmt::Write as _;

use crate::decision::{ChatRequest, DecisionRequest};

pub const SYSTEM_PROMPT: &str = r#"You are a browser agent filling in an English job application form on behalf of the applicant.
Use only the applicant facts provided. Never invent information. Write all answers in English.

Every interactive element is listed with a ref such as e3_7. Refs are only valid for the page
state you are shown; always use refs from the latest listing.

Allowed actions (closed set):
  click_ref     {"action":"click_ref","ref":"e3_7"}
  type_ref      {"action":"type_ref","ref":"e3_2","value":"Ada Lovelace"}
  select_ref    {"action":"select_ref","ref":"e3_4","value":"Canada"}
  set_checkbox  {"action":"set_checkbox","ref":"e3_9","checked":true}
  set_radio     {"action":"set_radio","target_question":"Are you authorized to work?","value":"Yes"}
  upload_file   {"action":"upload_file","ref":"e3_5","path":"/path/to/resume.pdf"}
  submit        {"action":"submit","ref":"e3_11"}
  wait_for      {"action":"wait_for","text":"Thank you","ms":2000}
  refresh_soft  {"action":"refresh_soft"}

Reply with one JSON object and nothing else:
{
  "status": "continue" | "done" | "stuck",
  "summary": "what you see and why you act",
  "actions": [ up to three actions from the list above, executed in order ]
}

Rules:
1. When several questions share Yes/No options, bind the answer with target_question.
2. Fill every required field before submitting.
3. If the form shows errors, repair the named fields first. Never resubmit an unchanged form.
4. Do not upload a file that is already attached.
5. Return "done" only when the page confirms the application was submitted.
6. Return "stuck" only for hard blockers: a login with no account, a captcha, a paywall, a page that never loads.
7. If a hint says an action already failed, choose a different action."#;

/// Renders the per-step user message.
pub fn format_user_message(request: &DecisionRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Applicant\n{}\n", request.profile.trim());
    let _ = writeln!(out, "## Page (step {})", request.step);
    let _ = writeln!(out, "URL: {}", request.url);
    let _ = writeln!(out, "Title: {}\n", request.title);
    let _ = writeln!(out, "## Form\n{}\n", request.form.trim_end());
    if !request.visible_text.trim().is_empty() {
        let _ = writeln!(out, "## Visible text\n{}\n", request.visible_text.trim());
    }
    if !request.history.is_empty() {
        let _ = writeln!(out, "## Recent steps");
        for line in &request.history {
            let _ = writeln!(out, "- {line}");
        }
        out.push('\n');
    }
    if !request.hints.is_empty() {
        let _ = writeln!(out, "## Constraints");
        for hint in &request.hints {
            let _ = writeln!(out, "- {hint}");
        }
        out.push('\n');
    }
    out.push_str("Decide the next action.");
    out
}

pub fn build_chat_request(request: &DecisionRequest) -> ChatRequest {
    ChatRequest {
        system: SYSTEM_PROMPT.to_string(),
        user: format_user_message(request),
        image_png: request.screenshot.clone(),
    }
}
