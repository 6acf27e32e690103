//! Language model request/response types
//!
//! Mirrors the streaming Messages-style API shape: a system prompt plus
//! alternating user/assistant turns in, an incremental token stream out.

use serde::{Deserialize, Serialize};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A generation request
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Full message history including the system message
    pub messages: Vec<Message>,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 1.0)
    pub temperature: f32,
}

impl GenerateRequest {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            max_tokens: 256,
            temperature: 0.7,
        }
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn with_user_message(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::user(content));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }
}

/// One incremental token-stream chunk
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// New text since the previous chunk
    pub delta: String,
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    /// Model finished its turn
    #[default]
    Stop,
    /// Hit the max-token limit
    Length,
    /// The consumer stopped reading (barge-in or early cutoff)
    Cancelled,
}

/// Token accounting reported at stream end
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Final result of a streamed generation
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Complete generated text
    pub text: String,
    /// Why the stream ended
    pub finish_reason: FinishReason,
    /// Token usage, when the provider reports it
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = GenerateRequest::new("be brief")
            .with_user_message("hello")
            .with_max_tokens(128)
            .with_temperature(1.5);

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.max_tokens, 128);
        assert_eq!(request.temperature, 1.0); // clamped
    }
}
