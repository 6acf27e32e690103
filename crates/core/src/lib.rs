//! Core traits and types for the outbound call agent
//!
//! This crate provides foundational types used across all other crates:
//! - Narrowband audio frames and G.711 µ-law codec helpers
//! - Transcript and recognizer event types
//! - Language model request/stream types
//! - Provider traits for pluggable backends (recognition, synthesis, LLM, transcoding)
//! - Per-call pipeline events
//! - Error types

pub mod audio;
pub mod error;
pub mod events;
pub mod llm_types;
pub mod traits;
pub mod transcript;

pub use audio::{
    mulaw_decode, mulaw_encode, mulaw_to_pcm16, pcm16_to_mulaw, AudioEncoding, AudioFrame,
    NARROWBAND_SAMPLE_RATE,
};
pub use error::{Error, Result};
pub use events::CallEvent;
pub use llm_types::{
    FinishReason, GenerateRequest, GenerateResponse, Message, Role, StreamChunk, TokenUsage,
};
pub use traits::{
    LanguageModel, RecognizerSession, SpeechRecognizer, SpeechSynthesizer, Transcoder,
};
pub use transcript::{RecognizerEvent, TranscriptResult};
