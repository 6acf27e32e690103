//! Speech recognition result and event types

use serde::{Deserialize, Serialize};

/// A transcript produced by the recognition stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptResult {
    /// Recognized text
    pub text: String,
    /// Recognizer confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Is this a final (stable) transcript?
    pub is_final: bool,
}

impl TranscriptResult {
    pub fn interim(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: false,
        }
    }

    pub fn final_result(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: true,
        }
    }
}

/// Events emitted by a speech-recognition stream
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// The recognizer detected the start of user speech
    SpeechStarted,
    /// An interim (unstable) transcript
    Interim(TranscriptResult),
    /// A final transcript for a span of speech
    Final(TranscriptResult),
    /// The authoritative end-of-turn boundary
    UtteranceEnd,
    /// The recognition connection dropped or errored
    Disconnected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_constructors() {
        let interim = TranscriptResult::interim("hel", 0.4);
        assert!(!interim.is_final);

        let fin = TranscriptResult::final_result("hello", 0.93);
        assert!(fin.is_final);
        assert_eq!(fin.text, "hello");
    }
}
