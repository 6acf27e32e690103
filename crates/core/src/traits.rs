//! Provider traits
//!
//! The orchestrator is written against these seams so every external
//! collaborator (recognition, synthesis, language model, transcoder) can be
//! substituted with a fake in tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::llm_types::{GenerateRequest, GenerateResponse, StreamChunk};
use crate::transcript::RecognizerEvent;

/// A live recognition stream for one call.
///
/// Audio goes up through `audio_tx`; events come back on `events`. Dropping
/// the sender closes the stream.
pub struct RecognizerSession {
    pub audio_tx: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<RecognizerEvent>,
}

/// Streaming speech recognition service
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open a recognition stream for one call
    async fn start(&self) -> Result<RecognizerSession>;
}

/// Streaming speech synthesis service
///
/// One call synthesizes one text fragment to completion; the provider
/// streams chunks internally and returns the assembled compressed audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Provider name, used in fallback logging and job records
    fn name(&self) -> &str;

    /// Synthesize a text fragment with the given voice
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>>;
}

/// Streaming language model service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stream a generation; deltas are sent on `tx` as they arrive.
    ///
    /// Returns the assembled response once the stream ends. If the receiver
    /// is dropped (early cutoff, barge-in) the implementation must stop
    /// consuming the provider stream and return with `FinishReason::Cancelled`.
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<GenerateResponse>;
}

/// Audio transcoder: compressed synthesis output to narrowband µ-law
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert one fragment of compressed audio to 8kHz mono µ-law
    async fn to_narrowband(&self, encoded: &[u8]) -> Result<Vec<u8>>;
}
