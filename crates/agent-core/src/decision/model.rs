use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{AgentError, DecisionError};

const CAPABILITY_MARKERS: &[&str] = &[
    "does not support",
    "unsupported",
    "multimodal",
    "vision",
    "image_url",
    "invalid model",
    "model_not_found",
];

/// One chat turn sent to a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    /// PNG bytes attached as an image part
    pub image_png: Option<Vec<u8>>,
}

/// A single configured model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// Raw reply text, or a classified failure.
    async fn complete(&self, request: &ChatRequest) -> Result<String, DecisionError>;
}

/// Maps a failed call onto the decision error taxonomy.
pub fn classify_failure(status: Option<u16>, message: &str) -> DecisionError {
    let lower = message.to_lowercase();
    let excerpt: String = message.chars().take(240).collect();
    if status == Some(429)
        || lower.contains("429")
        || lower.contains("rate_limit")
        || lower.contains("rate limit")
    {
        return DecisionError::rate_limited(excerpt);
    }
    if CAPABILITY_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return DecisionError::capability(excerpt);
    }
    match status {
        Some(code) => DecisionError::other(format!("HTTP {code}: {excerpt}")),
        None => DecisionError::other(excerpt),
    }
}

#[derive(Debug, Clone)]
pub struct ModelEndpoint {
    pub model: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpChatModel {
    client: Client,
    endpoint: ModelEndpoint,
}

impl HttpChatModel {
    pub fn new(endpoint: ModelEndpoint) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|err| AgentError::invalid_config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    fn name(&self) -> &str {
        &self.endpoint.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, DecisionError> {
        let url = format!(
            "{}/chat/completions",
            self.endpoint.api_base.trim_end_matches('/')
        );
        let user_content = match &request.image_png {
            Some(bytes) => json!([
                { "type": "text", "text": request.user },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/png;base64,{}", STANDARD.encode(bytes)) }
                }
            ]),
            None => Value::String(request.user.clone()),
        };
        let body = ChatCompletionRequest {
            model: self.endpoint.model.clone(),
            temperature: self.endpoint.temperature,
            max_tokens: self.endpoint.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: Value::String(request.system.clone()),
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
        };

        let mut call = self.client.post(&url).json(&body);
        if let Some(key) = &self.endpoint.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .await
            .map_err(|err| DecisionError::other(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(classify_failure(Some(status.as_u16()), &text));
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| DecisionError::other(format!("response invalid: {err}")))?;
        debug!(
            target: "agent.decision",
            model = %self.endpoint.model,
            prompt_tokens = response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens = response.usage.as_ref().map(|u| u.completion_tokens),
            "model replied"
        );
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_text())
            .ok_or_else(|| DecisionError::other("response missing content"))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: ChatCompletionContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatCompletionContent {
    Text(String),
    Parts(Vec<ChatCompletionPart>),
}

impl ChatCompletionContent {
    fn as_text(&self) -> Option<String> {
        match self {
            ChatCompletionContent::Text(value) => Some(value.clone()),
            ChatCompletionContent::Parts(parts) => {
                let text = parts
                    .iter()
                    .filter_map(|part| part.text.as_ref())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Deterministic model replaying queued replies, for offline runs and tests.
pub struct ScriptedChatModel {
    name: String,
    replies: Mutex<VecDeque<Result<String, DecisionError>>>,
    seen: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatModel {
    pub fn new(
        name: impl Into<String>,
        replies: impl IntoIterator<Item = Result<String, DecisionError>>,
    ) -> Self {
        Self {
            name: name.into(),
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Only successful replies.
    pub fn replying<S: Into<String>>(name: impl Into<String>, replies: impl IntoIterator<Item = S>) -> Self {
        Self::new(name, replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().clone()
    }

    /// Calls that carried a screenshot.
    pub fn images_seen(&self) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|r| r.image_png.is_some())
            .count()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, DecisionError> {
        self.seen.lock().push(request.clone());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(DecisionError::other("scripted replies exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_failures_are_classified() {
        assert!(matches!(
            classify_failure(Some(429), "slow down"),
            DecisionError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(Some(400), r#"{"error":{"code":"rate_limit_exceeded"}}"#),
            DecisionError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(Some(400), "This model does not support image_url content"),
            DecisionError::CapabilityMismatch(_)
        ));
        assert!(matches!(
            classify_failure(Some(404), "model_not_found"),
            DecisionError::CapabilityMismatch(_)
        ));
        assert_eq!(
            classify_failure(Some(404), "Not Found"),
            DecisionError::other("HTTP 404: Not Found")
        );
        assert!(matches!(
            classify_failure(Some(404), "The model `gpt-x` does not exist: invalid model"),
            DecisionError::CapabilityMismatch(_)
        ));
        assert_eq!(
            classify_failure(Some(500), "upstream exploded"),
            DecisionError::other("HTTP 500: upstream exploded")
        );
    }

    #[tokio::test]
    async fn scripted_model_replays_in_order() {
        let model = ScriptedChatModel::new(
            "stub",
            vec![Ok("first".to_string()), Err(DecisionError::rate_limited("429"))],
        );
        let request = ChatRequest {
            user: "page".to_string(),
            image_png: Some(vec![1, 2, 3]),
            ..ChatRequest::default()
        };
        assert_eq!(model.complete(&request).await.unwrap(), "first");
        assert!(model.complete(&ChatRequest::default()).await.is_err());
        assert!(matches!(
            model.complete(&ChatRequest::default()).await,
            Err(DecisionError::Other(_))
        ));
        assert_eq!(model.calls(), 3);
        assert_eq!(model.images_seen(), 1);
    }
}
