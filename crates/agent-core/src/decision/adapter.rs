use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::model::{ChatModel, ChatRequest, HttpChatModel, ModelEndpoint};
use super::parse::parse_decision;
use super::{Decision, DecisionOracle, DecisionRequest};
use crate::errors::{AgentError, DecisionError};
use crate::prompt::build_chat_request;

/// Decision-service settings as they appear in the application config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Ordered fallback chain of model names.
    pub models: Vec<String>,
    pub api_base: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            models: vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()],
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.1,
            max_tokens: 900,
            timeout_ms: 60_000,
        }
    }
}

/// Calls an ordered list of models, falling back on rate limits and
/// capability mismatches.
///
/// The index of the model that last answered is remembered, so later calls
/// start there instead of hammering a model that already refused.
pub struct DecisionAdapter {
    models: Vec<Arc<dyn ChatModel>>,
    start_index: AtomicUsize,
}

impl DecisionAdapter {
    pub fn new(models: Vec<Arc<dyn ChatModel>>) -> Result<Self, AgentError> {
        if models.is_empty() {
            return Err(AgentError::invalid_config(
                "decision service needs at least one model",
            ));
        }
        Ok(Self {
            models,
            start_index: AtomicUsize::new(0),
        })
    }

    pub fn from_config(config: &DecisionConfig) -> Result<Self, AgentError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            warn!(
                target: "agent.decision",
                env = %config.api_key_env,
                "no API key found; requests are sent unauthenticated"
            );
        }
        let models = config
            .models
            .iter()
            .map(|name| {
                HttpChatModel::new(ModelEndpoint {
                    model: name.clone(),
                    api_base: config.api_base.clone(),
                    api_key: api_key.clone(),
                    temperature: config.temperature,
                    max_tokens: config.max_tokens,
                    timeout: Duration::from_millis(config.timeout_ms),
                })
                .map(|model| Arc::new(model) as Arc<dyn ChatModel>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(models)
    }

    pub fn current_index(&self) -> usize {
        self.start_index.load(Ordering::Relaxed)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name().to_string()).collect()
    }

    /// Raw completion through the fallback chain. Returns the reply and the
    /// index of the model that produced it.
    pub async fn complete(&self, request: &ChatRequest) -> Result<(String, usize), DecisionError> {
        let start = self.current_index().min(self.models.len() - 1);
        let mut last_error = None;
        for index in start..self.models.len() {
            let model = &self.models[index];
            match model.complete(request).await {
                Ok(reply) => {
                    if index != start {
                        info!(
                            target: "agent.decision",
                            model = model.name(),
                            index,
                            "switched decision model"
                        );
                    }
                    self.start_index.store(index, Ordering::Relaxed);
                    return Ok((reply, index));
                }
                Err(err) if err.allows_fallback() => {
                    warn!(
                        target: "agent.decision",
                        model = model.name(),
                        class = err.class(),
                        error = %err,
                        "model unavailable, trying next"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(match last_error {
            Some(DecisionError::RateLimited(msg)) => {
                DecisionError::RateLimited(format!("rate_limit_exhausted: {msg}"))
            }
            Some(DecisionError::CapabilityMismatch(msg)) => {
                DecisionError::CapabilityMismatch(format!("model_unsupported_exhausted: {msg}"))
            }
            Some(other) => other,
            None => DecisionError::other("no decision model attempted"),
        })
    }
}

#[async_trait]
impl DecisionOracle for DecisionAdapter {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, DecisionError> {
        let chat = build_chat_request(request);
        let (raw, model_index) = self.complete(&chat).await?;
        let mut decision = parse_decision(&raw)?;
        decision.model_index = model_index;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{DecisionStatus, ScriptedChatModel};

    const DONE: &str = r#"{"status":"done","summary":"confirmation shown"}"#;

    fn adapter(models: Vec<Arc<ScriptedChatModel>>) -> DecisionAdapter {
        DecisionAdapter::new(
            models
                .into_iter()
                .map(|m| m as Arc<dyn ChatModel>)
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn rate_limit_falls_back_and_remembers_model() {
        let primary = Arc::new(ScriptedChatModel::new(
            "primary",
            vec![Err(DecisionError::rate_limited("429 Too Many Requests"))],
        ));
        let secondary = Arc::new(ScriptedChatModel::replying("secondary", vec![DONE, DONE]));
        let adapter = adapter(vec![primary.clone(), secondary.clone()]);

        let first = adapter.decide(&DecisionRequest::default()).await.unwrap();
        assert_eq!(first.status, DecisionStatus::Done);
        assert_eq!(first.model_index, 1);
        assert_eq!(adapter.current_index(), 1);

        adapter.decide(&DecisionRequest::default()).await.unwrap();
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 2);
    }

    #[tokio::test]
    async fn other_errors_fail_fast() {
        let primary = Arc::new(ScriptedChatModel::new(
            "primary",
            vec![Err(DecisionError::other("HTTP 500: boom"))],
        ));
        let secondary = Arc::new(ScriptedChatModel::replying("secondary", vec![DONE]));
        let adapter = adapter(vec![primary, secondary.clone()]);

        let err = adapter.decide(&DecisionRequest::default()).await.unwrap_err();
        assert_eq!(err.class(), "other_error");
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn capability_mismatch_everywhere_is_fatal() {
        let a = Arc::new(ScriptedChatModel::new(
            "a",
            vec![Err(DecisionError::capability("does not support image_url"))],
        ));
        let b = Arc::new(ScriptedChatModel::new(
            "b",
            vec![Err(DecisionError::capability("model_not_found"))],
        ));
        let adapter = adapter(vec![a, b]);

        let err = adapter.decide(&DecisionRequest::default()).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("model_unsupported_exhausted"));
        assert_eq!(adapter.current_index(), 0);
    }

    #[tokio::test]
    async fn malformed_reply_keeps_raw_text() {
        let model = Arc::new(ScriptedChatModel::replying(
            "only",
            vec!["Thank you for applying! All done."],
        ));
        let adapter = adapter(vec![model]);
        let err = adapter.decide(&DecisionRequest::default()).await.unwrap_err();
        assert_eq!(err.raw_text(), Some("Thank you for applying! All done."));
    }

    #[test]
    fn empty_model_list_is_rejected() {
        assert!(DecisionAdapter::new(Vec::new()).is_err());
    }
}
