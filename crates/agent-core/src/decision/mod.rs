//! Decision-service adapter.
//!
//! The language model is an external oracle: it receives the page as text
//! (plus an optional screenshot) and answers with a JSON decision. Everything
//! here is about calling it safely: model fallback on rate limits and
//! capability mismatches, fail-fast on other errors, and tolerant parsing.

mod adapter;
mod model;
mod parse;

use action_primitives::ActionPlan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DecisionError;

pub use adapter::{DecisionAdapter, DecisionConfig};
pub use model::{classify_failure, ChatModel, ChatRequest, HttpChatModel, ModelEndpoint, ScriptedChatModel};
pub use parse::{extract_json_object, parse_decision};

/// Everything the oracle sees for one step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionRequest {
    pub job_id: String,
    pub step: u32,
    /// Applicant facts the answers must come from
    pub profile: String,
    pub url: String,
    pub title: String,
    /// Rendered form graph
    pub form: String,
    pub visible_text: String,
    pub history: Vec<String>,
    /// Orchestrator constraints for this step (pending repair, required alternate, ...)
    pub hints: Vec<String>,
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    Continue,
    Done,
    Stuck,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Continue => "continue",
            DecisionStatus::Done => "done",
            DecisionStatus::Stuck => "stuck",
        }
    }
}

/// A well-formed oracle answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub status: DecisionStatus,
    pub summary: String,
    pub plans: Vec<ActionPlan>,
    /// Index of the configured model that answered
    pub model_index: usize,
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, DecisionError>;
}
