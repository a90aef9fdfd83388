//! Chat model client trait and the Anthropic messages implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ModelError;

/// Protocol version header required by the messages endpoint.
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Whole-request timeout. Generating a complete app runs long.
const REQUEST_TIMEOUT_SECS: u64 = 180;
const MAX_TOKENS: u32 = 4096;
const TEMPERATURE: f32 = 0.3;

/// Generation instructions sent as the system turn. The FILENAME markers
/// and fenced blocks it mandates are what the extractor scans for, and
/// the ERROR sentinel is what [`ModelError::Refusal`] detects.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an expert Flutter engineer. Turn the user's request into a complete, runnable Flutter app.

Rules:
1. Always produce BOTH main.dart and pubspec.yaml.
2. Put `FILENAME: main.dart` or `FILENAME: pubspec.yaml` on its own line directly before each file.
3. Wrap each file in a standard fenced code block (dart or yaml).
4. Do not reference bundled asset files unless you also emit them under a FILENAME: assets/... marker.
5. Initialize every non-nullable field or declare it nullable.
6. If the request cannot be turned into an app, reply with a single line starting with ERROR: explaining why.";

/// Role of a message in a generation conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// A chat completion backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Sends the conversation and returns the assistant's raw reply text.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;

    fn name(&self) -> &str;
}

/// Client for the Anthropic messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl AnthropicClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        system_prompt: Option<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build model HTTP client")?;
        Ok(Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Pulls the reply text out of a parsed response, surfacing empty
/// replies and the ERROR refusal sentinel as typed errors.
fn reply_text(response: MessagesResponse) -> Result<String, ModelError> {
    let text = response
        .content
        .into_iter()
        .next()
        .map(|block| block.text)
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ModelError::EmptyResponse);
    }
    if let Some(reason) = text.trim_start().strip_prefix("ERROR:") {
        return Err(ModelError::Refusal(reason.trim().to_string()));
    }
    Ok(text)
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: &self.system_prompt,
            messages,
            temperature: TEMPERATURE,
        };
        debug!(model = %self.model, turns = messages.len(), "sending generation request");

        let response = self
            .http
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout { seconds: REQUEST_TIMEOUT_SECS }
                } else {
                    ModelError::Request(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status: status.as_u16(), body });
        }

        let parsed: MessagesResponse = response.json().await.map_err(ModelError::Request)?;
        reply_text(parsed)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_roles_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&ChatRole::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&ChatRole::Assistant).unwrap(), "\"assistant\"");
    }

    #[test]
    fn test_chat_message_constructors() {
        let user = ChatMessage::user("build me a todo app");
        assert_eq!(user.role, ChatRole::User);
        assert_eq!(user.content, "build me a todo app");

        let assistant = ChatMessage::assistant("FILENAME: main.dart");
        assert_eq!(assistant.role, ChatRole::Assistant);
    }

    #[test]
    fn test_request_wire_shape() {
        let messages = vec![ChatMessage::user("hi")];
        let request = MessagesRequest {
            model: "claude-3-7-sonnet-20250219",
            max_tokens: MAX_TOKENS,
            system: "sys",
            messages: &messages,
            temperature: TEMPERATURE,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "claude-3-7-sonnet-20250219");
        assert_eq!(value["max_tokens"], 4096);
        assert_eq!(value["system"], "sys");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hi");
        assert!((value["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_reply_text_returns_first_block() {
        let response = MessagesResponse {
            content: vec![
                ContentBlock { text: "first".into() },
                ContentBlock { text: "second".into() },
            ],
        };
        assert_eq!(reply_text(response).unwrap(), "first");
    }

    #[test]
    fn test_reply_text_empty_is_error() {
        let response = MessagesResponse { content: vec![] };
        assert!(matches!(reply_text(response), Err(ModelError::EmptyResponse)));

        let blank = MessagesResponse {
            content: vec![ContentBlock { text: "   ".into() }],
        };
        assert!(matches!(reply_text(blank), Err(ModelError::EmptyResponse)));
    }

    #[test]
    fn test_reply_text_detects_refusal_sentinel() {
        let response = MessagesResponse {
            content: vec![ContentBlock {
                text: "ERROR: Unable to generate main.dart for that request.".into(),
            }],
        };
        match reply_text(response) {
            Err(ModelError::Refusal(reason)) => {
                assert!(reason.contains("Unable to generate"));
            }
            other => panic!("Expected Refusal, got {other:?}"),
        }
    }

    #[test]
    fn test_code_mentioning_error_is_not_a_refusal() {
        let response = MessagesResponse {
            content: vec![ContentBlock {
                text: "FILENAME: main.dart\nvoid main() { print('ERROR: nope'); }".into(),
            }],
        };
        assert!(reply_text(response).is_ok());
    }

    struct TestClient;

    #[async_trait]
    impl ModelClient for TestClient {
        async fn generate(&self, _messages: &[ChatMessage]) -> Result<String, ModelError> {
            Ok("FILENAME: main.dart".to_string())
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    #[tokio::test]
    async fn test_client_trait_object() {
        let client: Box<dyn ModelClient> = Box::new(TestClient);
        assert_eq!(client.name(), "test");
        let reply = client.generate(&[ChatMessage::user("hi")]).await.unwrap();
        assert!(reply.contains("main.dart"));
    }
}
