//! Language model integration
//!
//! Streaming Messages-API client, per-call conversation history, and the
//! pluggable response classifiers (early cutoff, repetition detection).

pub mod classifier;
pub mod client;
pub mod history;

pub use classifier::{CutoffDecision, PatternCutoff, RepetitionDetector, ResponseClassifier};
pub use client::{request_from_history, AnthropicClient};
pub use history::ConversationHistory;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
