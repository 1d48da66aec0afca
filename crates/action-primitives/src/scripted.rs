//! In-memory page driven by a declarative script.
//!
//! `ScriptedPage` implements both browser ports so the whole workflow can run
//! offline: the CLI `run` command, crate tests and scenario fixtures all use it.
//! Choice controls, fills, selects and uploads behave like a real form; clicks
//! on scripted nodes apply queued [`PageTransition`]s.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use perceiver_structural::{PerceiverError, PerceptionPort, RawNode, RawPage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ActionError;
use crate::primitives::ActionPrimitives;
use crate::types::{ActionReport, ExecCtx, Key, ScrollTarget};

const VALIDATION_BANNER: &str = "Please complete all required fields.";
const SCREENSHOT_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nscripted";

/// Page change applied when a scripted node is clicked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageTransition {
    pub url: Option<String>,
    pub title: Option<String>,
    pub visible_text: Option<String>,
    /// Replaces the node list wholesale (next form step).
    pub nodes: Option<Vec<RawNode>>,
    pub remove_nodes: Vec<String>,
    /// The click itself fails with a browser I/O error.
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClickRule {
    pub node: String,
    /// Applied in order; the last one repeats once the queue drains.
    pub then: Vec<PageTransition>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageScript {
    pub page: RawPage,
    pub on_click: Vec<ClickRule>,
    /// Clicking these nodes with required fields empty shows a validation banner instead.
    pub validate_required_on: Vec<String>,
    /// Interactions on these nodes report success but change nothing.
    pub frozen: Vec<String>,
}

struct PageState {
    page: RawPage,
    transitions: HashMap<String, VecDeque<PageTransition>>,
    actions: Vec<String>,
    screenshots: usize,
    refreshes: usize,
}

pub struct ScriptedPage {
    state: Mutex<PageState>,
    validate_on: HashSet<String>,
    frozen: HashSet<String>,
}

impl ScriptedPage {
    pub fn new(page: RawPage) -> Self {
        Self::from_script(PageScript {
            page,
            ..PageScript::default()
        })
    }

    pub fn from_script(script: PageScript) -> Self {
        let mut transitions: HashMap<String, VecDeque<PageTransition>> = HashMap::new();
        for rule in script.on_click {
            transitions.entry(rule.node).or_default().extend(rule.then);
        }
        Self {
            state: Mutex::new(PageState {
                page: script.page,
                transitions,
                actions: Vec::new(),
                screenshots: 0,
                refreshes: 0,
            }),
            validate_on: script.validate_required_on.into_iter().collect(),
            frozen: script.frozen.into_iter().collect(),
        }
    }

    pub fn on_click(self, node: impl Into<String>, transition: PageTransition) -> Self {
        self.state
            .lock()
            .transitions
            .entry(node.into())
            .or_default()
            .push_back(transition);
        self
    }

    pub fn validate_required_on(mut self, node: impl Into<String>) -> Self {
        self.validate_on.insert(node.into());
        self
    }

    pub fn freeze(mut self, node: impl Into<String>) -> Self {
        self.frozen.insert(node.into());
        self
    }

    /// Mutates the page from outside the workflow, as a script on the page would.
    pub fn mutate(&self, f: impl FnOnce(&mut RawPage)) {
        let mut state = self.state.lock();
        f(&mut state.page);
        state.page.version += 1;
    }

    pub fn current_page(&self) -> RawPage {
        self.state.lock().page.clone()
    }

    /// Log of primitive calls, e.g. `click:submit`.
    pub fn actions(&self) -> Vec<String> {
        self.state.lock().actions.clone()
    }

    pub fn screenshots_taken(&self) -> usize {
        self.state.lock().screenshots
    }

    pub fn refreshes(&self) -> usize {
        self.state.lock().refreshes
    }

    fn report(&self, started: chrono::DateTime<Utc>, clock: Instant) -> ActionReport {
        let version = self.state.lock().page.version;
        ActionReport::success(started, clock.elapsed().as_millis() as u64).with_page_version(version)
    }

    fn record(state: &mut PageState, entry: String) {
        debug!(target: "scripted_page", action = %entry, "primitive");
        state.actions.push(entry);
    }

    fn node_index(page: &RawPage, node_key: &str) -> Result<usize, ActionError> {
        page.nodes
            .iter()
            .position(|n| n.node_key == node_key)
            .ok_or_else(|| ActionError::ElementNotFound(node_key.to_string()))
    }

    fn ensure_enabled(page: &RawPage, idx: usize) -> Result<(), ActionError> {
        let node = &page.nodes[idx];
        if node.disabled {
            return Err(ActionError::NotEnabled(node.node_key.clone()));
        }
        Ok(())
    }

    fn is_choice(node: &RawNode) -> bool {
        let role = node.role.to_lowercase();
        let input = node.input_type.as_deref().unwrap_or_default().to_lowercase();
        role == "radio" || role == "checkbox" || input == "radio" || input == "checkbox"
    }

    fn is_radio(node: &RawNode) -> bool {
        node.role.eq_ignore_ascii_case("radio")
            || node.input_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("radio"))
    }

    fn apply_checked(page: &mut RawPage, idx: usize, checked: bool) {
        let radio = Self::is_radio(&page.nodes[idx]);
        let group = page.nodes[idx].group.clone();
        if radio && checked {
            if let Some(group) = group {
                for node in page.nodes.iter_mut() {
                    if node.group.as_deref() == Some(group.as_str()) {
                        node.checked = Some(false);
                        node.invalid = false;
                    }
                }
            }
        }
        page.nodes[idx].checked = Some(checked);
        page.nodes[idx].invalid = false;
    }

    fn unfilled_required(page: &RawPage) -> Vec<usize> {
        let checked_groups: HashSet<String> = page
            .nodes
            .iter()
            .filter(|n| n.checked.unwrap_or(false))
            .filter_map(|n| n.group.clone())
            .collect();
        page.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.required && !n.in_assist_region)
            .filter(|(_, n)| {
                if Self::is_choice(n) {
                    match &n.group {
                        Some(group) => !checked_groups.contains(group),
                        None => !n.checked.unwrap_or(false),
                    }
                } else if matches!(n.role.as_str(), "button" | "link")
                    && n.input_type.as_deref() != Some("file")
                {
                    false
                } else {
                    n.value.trim().is_empty() && n.attached_files.is_empty()
                }
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Drops the validation banner once every required field holds a value.
    fn settle_validation(page: &mut RawPage) {
        if Self::unfilled_required(page).is_empty() && page.visible_text.contains(VALIDATION_BANNER)
        {
            page.visible_text = page
                .visible_text
                .lines()
                .filter(|line| line.trim() != VALIDATION_BANNER)
                .collect::<Vec<_>>()
                .join("\n");
        }
    }

    fn apply_transition(page: &mut RawPage, transition: &PageTransition) {
        if let Some(url) = &transition.url {
            page.url = url.clone();
        }
        if let Some(title) = &transition.title {
            page.title = title.clone();
        }
        if let Some(text) = &transition.visible_text {
            page.visible_text = text.clone();
        }
        if let Some(nodes) = &transition.nodes {
            page.nodes = nodes.clone();
        }
        if !transition.remove_nodes.is_empty() {
            page.nodes
                .retain(|n| !transition.remove_nodes.contains(&n.node_key));
        }
    }

    fn next_transition(state: &mut PageState, node_key: &str) -> Option<PageTransition> {
        let queue = state.transitions.get_mut(node_key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl PerceptionPort for ScriptedPage {
    async fn observe(&self) -> Result<RawPage, PerceiverError> {
        Ok(self.state.lock().page.clone())
    }

    async fn page_version(&self) -> Result<u64, PerceiverError> {
        Ok(self.state.lock().page.version)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PerceiverError> {
        self.state.lock().screenshots += 1;
        Ok(SCREENSHOT_BYTES.to_vec())
    }
}

#[async_trait]
impl ActionPrimitives for ScriptedPage {
    async fn click(&self, ctx: &ExecCtx, node_key: &str) -> Result<ActionReport, ActionError> {
        ctx.precheck()?;
        let (started, clock) = (Utc::now(), Instant::now());
        {
            let mut state = self.state.lock();
            Self::record(&mut state, format!("click:{node_key}"));
            let idx = Self::node_index(&state.page, node_key)?;
            Self::ensure_enabled(&state.page, idx)?;
            if self.frozen.contains(node_key) {
                return Ok(ActionReport::success(started, 0).with_page_version(state.page.version));
            }

            if Self::is_choice(&state.page.nodes[idx]) {
                let next = if Self::is_radio(&state.page.nodes[idx]) {
                    true
                } else {
                    !state.page.nodes[idx].checked.unwrap_or(false)
                };
                Self::apply_checked(&mut state.page, idx, next);
                Self::settle_validation(&mut state.page);
                state.page.version += 1;
            } else if self.validate_on.contains(node_key)
                && !Self::unfilled_required(&state.page).is_empty()
            {
                for missing in Self::unfilled_required(&state.page) {
                    state.page.nodes[missing].invalid = true;
                }
                if !state.page.visible_text.contains(VALIDATION_BANNER) {
                    let text = format!("{}\n{VALIDATION_BANNER}", state.page.visible_text);
                    state.page.visible_text = text.trim_start().to_string();
                }
                state.page.version += 1;
            } else if let Some(transition) = Self::next_transition(&mut state, node_key) {
                if let Some(err) = &transition.error {
                    return Err(ActionError::BrowserIo(err.clone()));
                }
                Self::apply_transition(&mut state.page, &transition);
                state.page.version += 1;
            }
        }
        Ok(self.report(started, clock))
    }

    async fn fill(
        &self,
        ctx: &ExecCtx,
        node_key: &str,
        text: &str,
    ) -> Result<ActionReport, ActionError> {
        ctx.precheck()?;
        let (started, clock) = (Utc::now(), Instant::now());
        {
            let mut state = self.state.lock();
            Self::record(&mut state, format!("fill:{node_key}={text}"));
            let idx = Self::node_index(&state.page, node_key)?;
            Self::ensure_enabled(&state.page, idx)?;
            if !self.frozen.contains(node_key) {
                state.page.nodes[idx].value = text.to_string();
                state.page.nodes[idx].invalid = false;
                Self::settle_validation(&mut state.page);
                state.page.version += 1;
            }
        }
        Ok(self.report(started, clock))
    }

    async fn select_option(
        &self,
        ctx: &ExecCtx,
        node_key: &str,
        option: &str,
    ) -> Result<ActionReport, ActionError> {
        ctx.precheck()?;
        let (started, clock) = (Utc::now(), Instant::now());
        {
            let mut state = self.state.lock();
            Self::record(&mut state, format!("select:{node_key}={option}"));
            let idx = Self::node_index(&state.page, node_key)?;
            Self::ensure_enabled(&state.page, idx)?;
            let node = &state.page.nodes[idx];
            let chosen = if node.options.is_empty() {
                option.to_string()
            } else {
                node.options
                    .iter()
                    .find(|o| o.trim().eq_ignore_ascii_case(option.trim()))
                    .cloned()
                    .ok_or_else(|| ActionError::OptionNotFound(option.to_string()))?
            };
            if !self.frozen.contains(node_key) {
                state.page.nodes[idx].value = chosen;
                state.page.nodes[idx].invalid = false;
                Self::settle_validation(&mut state.page);
                state.page.version += 1;
            }
        }
        Ok(self.report(started, clock))
    }

    async fn set_checked(
        &self,
        ctx: &ExecCtx,
        node_key: &str,
        checked: bool,
    ) -> Result<ActionReport, ActionError> {
        ctx.precheck()?;
        let (started, clock) = (Utc::now(), Instant::now());
        {
            let mut state = self.state.lock();
            Self::record(&mut state, format!("check:{node_key}={checked}"));
            let idx = Self::node_index(&state.page, node_key)?;
            Self::ensure_enabled(&state.page, idx)?;
            if !self.frozen.contains(node_key) {
                Self::apply_checked(&mut state.page, idx, checked);
                Self::settle_validation(&mut state.page);
                state.page.version += 1;
            }
        }
        Ok(self.report(started, clock))
    }

    async fn upload(
        &self,
        ctx: &ExecCtx,
        node_key: &str,
        path: &str,
    ) -> Result<ActionReport, ActionError> {
        ctx.precheck()?;
        let (started, clock) = (Utc::now(), Instant::now());
        {
            let mut state = self.state.lock();
            Self::record(&mut state, format!("upload:{node_key}={path}"));
            let idx = Self::node_index(&state.page, node_key)?;
            Self::ensure_enabled(&state.page, idx)?;
            let file_name = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string());
            if !self.frozen.contains(node_key) {
                let node = &mut state.page.nodes[idx];
                node.attached_files = vec![file_name.clone()];
                node.value = file_name;
                node.invalid = false;
                Self::settle_validation(&mut state.page);
                state.page.version += 1;
            }
        }
        Ok(self.report(started, clock))
    }

    async fn scroll(
        &self,
        ctx: &ExecCtx,
        target: ScrollTarget,
    ) -> Result<ActionReport, ActionError> {
        ctx.precheck()?;
        let (started, clock) = (Utc::now(), Instant::now());
        Self::record(&mut self.state.lock(), format!("scroll:{target:?}"));
        Ok(self.report(started, clock))
    }

    async fn press_key(&self, ctx: &ExecCtx, key: Key) -> Result<ActionReport, ActionError> {
        ctx.precheck()?;
        let (started, clock) = (Utc::now(), Instant::now());
        Self::record(&mut self.state.lock(), format!("key:{key:?}"));
        Ok(self.report(started, clock))
    }

    async fn refresh(&self, ctx: &ExecCtx) -> Result<ActionReport, ActionError> {
        ctx.precheck()?;
        let (started, clock) = (Utc::now(), Instant::now());
        {
            let mut state = self.state.lock();
            Self::record(&mut state, "refresh".to_string());
            state.refreshes += 1;
            state.page.version += 1;
        }
        Ok(self.report(started, clock))
    }

    async fn wait(
        &self,
        ctx: &ExecCtx,
        ms: u64,
        text: Option<&str>,
    ) -> Result<ActionReport, ActionError> {
        ctx.precheck()?;
        let (started, clock) = (Utc::now(), Instant::now());
        let entry = match text {
            Some(text) => format!("wait:{ms}:{text}"),
            None => format!("wait:{ms}"),
        };
        Self::record(&mut self.state.lock(), entry);
        Ok(self.report(started, clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formpilot_core_types::JobId;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ExecCtx {
        ExecCtx::new(JobId::from("t"), Duration::from_secs(5), CancellationToken::new())
    }

    fn radio(key: &str, name: &str) -> RawNode {
        RawNode {
            node_key: key.to_string(),
            role: "radio".to_string(),
            name: name.to_string(),
            group: Some("g".to_string()),
            required: true,
            checked: Some(false),
            visible: true,
            ..RawNode::default()
        }
    }

    fn form() -> RawPage {
        RawPage {
            url: "https://example.com/apply".to_string(),
            title: "Apply".to_string(),
            visible_text: "Apply".to_string(),
            version: 1,
            nodes: vec![
                radio("yes", "Yes"),
                radio("no", "No"),
                RawNode {
                    node_key: "submit".to_string(),
                    role: "button".to_string(),
                    name: "Submit".to_string(),
                    visible: true,
                    ..RawNode::default()
                },
            ],
        }
    }

    #[tokio::test]
    async fn radio_check_is_exclusive_and_bumps_version() {
        let page = ScriptedPage::new(form());
        page.set_checked(&ctx(), "yes", true).await.unwrap();
        page.click(&ctx(), "no").await.unwrap();
        let current = page.current_page();
        assert_eq!(current.nodes[0].checked, Some(false));
        assert_eq!(current.nodes[1].checked, Some(true));
        assert_eq!(current.version, 3);
    }

    #[tokio::test]
    async fn validation_banner_until_required_filled() {
        let page = ScriptedPage::new(form()).validate_required_on("submit").on_click(
            "submit",
            PageTransition {
                visible_text: Some("Application submitted".to_string()),
                ..PageTransition::default()
            },
        );
        page.click(&ctx(), "submit").await.unwrap();
        let current = page.current_page();
        assert!(current.visible_text.contains(VALIDATION_BANNER));
        assert!(current.nodes[0].invalid);

        page.click(&ctx(), "yes").await.unwrap();
        assert!(!page.current_page().visible_text.contains(VALIDATION_BANNER));

        page.click(&ctx(), "submit").await.unwrap();
        assert_eq!(page.current_page().visible_text, "Application submitted");
    }

    #[tokio::test]
    async fn frozen_nodes_do_not_change() {
        let page = ScriptedPage::new(form()).freeze("yes");
        page.click(&ctx(), "yes").await.unwrap();
        assert_eq!(page.current_page().nodes[0].checked, Some(false));
        assert_eq!(page.current_page().version, 1);
        assert_eq!(page.actions(), vec!["click:yes".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_context_is_interrupted() {
        let page = ScriptedPage::new(form());
        let ctx = ctx();
        ctx.cancel_token.cancel();
        let err = page.click(&ctx, "submit").await.unwrap_err();
        assert!(matches!(err, ActionError::Interrupted(_)));
    }
}
