//! Per-call turn-taking orchestrator
//!
//! Drives one outbound call's conversation: recognizer events in, gated
//! transcripts through the language model, segmented fragments through the
//! synthesis queue, transcoded narrowband frames out — with barge-in,
//! early cutoff, repetition breaking, and graceful hangup.

pub mod gate;
pub mod orchestrator;
pub mod segmenter;
pub mod session;
pub mod state;

pub use gate::{GateContext, GateDecision, TranscriptGate};
pub use orchestrator::{CallOrchestrator, OrchestratorDeps};
pub use segmenter::{SegmenterConfig, SentenceSegmenter};
pub use session::CallSession;
pub use state::CallState;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("call is in a terminal state")]
    Terminated,

    #[error("turn failed: {0}")]
    Turn(String),
}
