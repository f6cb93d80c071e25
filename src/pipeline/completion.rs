//! Chat-completion envelopes and the HTTP client for an OpenAI-compatible API.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::CompletionError;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

// ═══════════════════════════════════════════════════════════
// Request types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message body: plain text, or text and image parts for vision calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Image reference, usually a `data:<mime>;base64,...` URL.
    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

// ═══════════════════════════════════════════════════════════
// Response types
// ═══════════════════════════════════════════════════════════

/// Parsed completion response. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Option<ResponseMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

impl ChatResponse {
    /// Text of the first choice, if the model returned any.
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
    }

    /// Single-choice response carrying `text`.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            choices: vec![ChatChoice {
                index: 0,
                message: Some(ResponseMessage {
                    role: Some("assistant".into()),
                    content: Some(text.into()),
                }),
            }],
            usage: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Client abstraction
// ═══════════════════════════════════════════════════════════

/// A chat-completion backend.
///
/// Implementations must report HTTP 429 and 5xx responses as
/// [`CompletionError::Transient`] so callers can retry them.
pub trait CompletionClient: Send + Sync {
    fn complete<'a>(
        &'a self,
        payload: &'a ChatPayload,
    ) -> BoxFuture<'a, Result<ChatResponse, CompletionError>>;
}

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    async fn post_completion(&self, payload: &ChatPayload) -> Result<ChatResponse, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Transport(format!("Request timed out after {}s", self.timeout_secs))
                } else {
                    CompletionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = truncate_body(response.text().await.unwrap_or_default());
            return Err(CompletionError::from_status(status.as_u16(), body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

        tracing::debug!(
            model = %payload.model,
            elapsed_ms = %start.elapsed().as_millis(),
            completion_tokens = ?parsed.usage.as_ref().and_then(|u| u.completion_tokens),
            "Completion received"
        );

        Ok(parsed)
    }
}

impl CompletionClient for OpenAiClient {
    fn complete<'a>(
        &'a self,
        payload: &'a ChatPayload,
    ) -> BoxFuture<'a, Result<ChatResponse, CompletionError>> {
        Box::pin(self.post_completion(payload))
    }
}

fn truncate_body(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body
    } else {
        let mut cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        cut.push('…');
        cut
    }
}

/// Scripted completion client for tests.
///
/// Pops one result per call and records every payload it receives.
pub struct MockCompletionClient {
    script: Mutex<VecDeque<Result<ChatResponse, CompletionError>>>,
    payloads: Mutex<Vec<ChatPayload>>,
}

impl MockCompletionClient {
    pub fn new(script: Vec<Result<ChatResponse, CompletionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// Client answering every call in order with the given texts.
    pub fn with_texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(ChatResponse::from_text(*t))).collect())
    }

    pub fn call_count(&self) -> usize {
        self.payloads.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn payloads(&self) -> Vec<ChatPayload> {
        self.payloads.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl CompletionClient for MockCompletionClient {
    fn complete<'a>(
        &'a self,
        payload: &'a ChatPayload,
    ) -> BoxFuture<'a, Result<ChatResponse, CompletionError>> {
        if let Ok(mut seen) = self.payloads.lock() {
            seen.push(payload.clone());
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(CompletionError::MalformedResponse("mock script exhausted".into())));
        Box::pin(async move { next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vision_payload_serializes_to_openai_shape() {
        let payload = ChatPayload {
            model: "gpt-4o-mini".into(),
            messages: vec![
                ChatMessage::system("extract"),
                ChatMessage::user_parts(vec![
                    ContentPart::text("This is a medical report."),
                    ContentPart::image("data:image/png;base64,AAAA"),
                ]),
            ],
            max_tokens: 2000,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "extract"},
                    {"role": "user", "content": [
                        {"type": "text", "text": "This is a medical report."},
                        {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
                    ]}
                ],
                "max_tokens": 2000
            })
        );
    }

    #[test]
    fn response_parses_and_ignores_unknown_fields() {
        let body = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"a\":1}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.first_text(), Some("{\"a\":1}"));
        assert_eq!(parsed.usage.unwrap().completion_tokens, Some(5));
    }

    #[test]
    fn empty_choices_have_no_text() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert_eq!(parsed.first_text(), None);
        let null_content: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert_eq!(null_content.first_text(), None);
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = OpenAiClient::new("https://api.example.test/v1/", "sk", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url, "https://api.example.test/v1");
        assert_eq!(client.timeout_secs, 5);
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_CHARS + 50);
        let cut = truncate_body(body);
        assert_eq!(cut.chars().count(), MAX_ERROR_BODY_CHARS + 1);
        assert_eq!(truncate_body("short".into()), "short");
    }

    #[tokio::test]
    async fn mock_replays_script_and_records_payloads() {
        let mock = MockCompletionClient::with_texts(&["first", "second"]);
        let payload = ChatPayload {
            model: "m".into(),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 10,
        };
        assert_eq!(mock.complete(&payload).await.unwrap().first_text(), Some("first"));
        assert_eq!(mock.complete(&payload).await.unwrap().first_text(), Some("second"));
        assert!(mock.complete(&payload).await.is_err());
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.payloads()[0], payload);
    }
}
