//! Anthropic Messages API streaming backend
//!
//! Speaks the SSE streaming wire format: the request carries the system
//! prompt and turn history, the response is consumed event by event and
//! forwarded as deltas. If the delta receiver is dropped (barge-in or early
//! cutoff) consumption stops and the response is marked cancelled.

use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use outdial_config::LlmConfig;
use outdial_core::{
    Error as CoreError, FinishReason, GenerateRequest, GenerateResponse, LanguageModel, Message,
    Role, StreamChunk, TokenUsage,
};

use crate::LlmError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Streaming Messages API client
pub struct AnthropicClient {
    config: LlmConfig,
    client: Client,
}

impl AnthropicClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Configuration(
                "ANTHROPIC_API_KEY not set. Set it via environment or config.".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn build_request(&self, request: &GenerateRequest) -> ApiRequest {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => unreachable!(), // filtered above
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect();

        ApiRequest {
            model: self.config.model.clone(),
            max_tokens: request.max_tokens,
            messages,
            system,
            temperature: Some(request.temperature),
            stream: true,
        }
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> outdial_core::Result<GenerateResponse> {
        let api_request = self.build_request(&request);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| CoreError::LanguageModel(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::LanguageModel(format!("HTTP {}: {}", status, body)));
        }

        // Process the SSE stream line by line
        use futures::StreamExt;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut finish_reason = FinishReason::Stop;
        let mut usage = TokenUsage::default();
        let mut receiver_gone = false;

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CoreError::LanguageModel(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() {
                    continue;
                }
                let Some(json_str) = line.strip_prefix("data: ") else {
                    continue;
                };

                let Ok(event) = serde_json::from_str::<StreamEvent>(json_str) else {
                    continue;
                };
                match event {
                    StreamEvent::MessageStart { message } => {
                        if let Some(u) = message.usage {
                            usage.input_tokens = u.input_tokens;
                        }
                    },
                    StreamEvent::ContentBlockDelta { delta, .. } => {
                        if let Delta::TextDelta { text } = delta {
                            full_text.push_str(&text);
                            if tx.send(StreamChunk { delta: text }).await.is_err() {
                                // Consumer stopped listening; stop paying for tokens
                                receiver_gone = true;
                                finish_reason = FinishReason::Cancelled;
                                break 'outer;
                            }
                        }
                    },
                    StreamEvent::MessageDelta { delta, usage: u } => {
                        if let Some(reason) = delta.stop_reason {
                            finish_reason = match reason.as_str() {
                                "max_tokens" => FinishReason::Length,
                                _ => FinishReason::Stop,
                            };
                        }
                        if let Some(u) = u {
                            usage.output_tokens = u.output_tokens;
                        }
                    },
                    StreamEvent::Error { error } => {
                        return Err(CoreError::LanguageModel(error.message));
                    },
                    _ => {},
                }
            }
        }

        if receiver_gone {
            tracing::debug!(generated = full_text.len(), "Generation cancelled by consumer");
        }

        Ok(GenerateResponse {
            text: full_text,
            finish_reason,
            usage,
        })
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)] // fields required for serde deserialization
enum StreamEvent {
    MessageStart { message: MessageStart },
    ContentBlockStart { index: usize },
    ContentBlockDelta { index: usize, delta: Delta },
    ContentBlockStop { index: usize },
    MessageDelta { delta: MessageDeltaBody, usage: Option<UsageDelta> },
    MessageStop,
    Ping,
    Error { error: ApiError },
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    usage: Option<UsageStart>,
}

#[derive(Debug, Deserialize)]
struct UsageStart {
    input_tokens: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageDelta {
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Build a generation request from config plus history turns
pub fn request_from_history(
    config: &LlmConfig,
    turns: impl IntoIterator<Item = Message>,
) -> GenerateRequest {
    GenerateRequest::new(&config.system_prompt)
        .with_messages(turns)
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_configuration_error() {
        let config = LlmConfig {
            api_key: String::new(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            AnthropicClient::new(config),
            Err(LlmError::Configuration(_))
        ));
    }

    #[test]
    fn test_request_shape() {
        let config = LlmConfig {
            api_key: "k".into(),
            ..LlmConfig::default()
        };
        let client = AnthropicClient::new(config).unwrap();

        let request = GenerateRequest::new("be brief")
            .with_user_message("hello")
            .with_max_tokens(64);
        let api = client.build_request(&request);

        assert_eq!(api.system.as_deref(), Some("be brief"));
        assert_eq!(api.messages.len(), 1);
        assert_eq!(api.messages[0].role, "user");
        assert!(api.stream);

        let json = serde_json::to_string(&api).unwrap();
        assert!(json.contains("\"max_tokens\":64"));
    }

    #[test]
    fn test_stream_event_parsing() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { .. },
                ..
            }
        ));

        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":12}}"#,
        )
        .unwrap();
        assert!(matches!(event, StreamEvent::MessageDelta { .. }));
    }
}
