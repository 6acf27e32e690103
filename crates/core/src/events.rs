//! Per-call pipeline events
//!
//! Broadcast by the orchestrator so the transport layer and any observers
//! (metrics, tests) can react without being wired into the state machine.

use crate::audio::AudioFrame;
use crate::transcript::TranscriptResult;

/// Events emitted over a call's broadcast channel
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The turn-taking state machine transitioned
    StateChanged { from: &'static str, to: &'static str },
    /// Interim transcript from the recognizer
    PartialTranscript(TranscriptResult),
    /// Final transcript accepted for processing
    FinalTranscript(TranscriptResult),
    /// Accumulated agent response text (sent ahead of audio)
    Response { text: String, is_final: bool },
    /// Outbound narrowband audio ready for the transport
    OutboundAudio(AudioFrame),
    /// The caller interrupted the agent mid-utterance
    BargeIn { elapsed_ms: u64 },
    /// Outbound playback buffer must be flushed (follows a barge-in)
    FlushPlayback,
    /// The call should be terminated after the closing utterance
    HangupRequested,
    /// Non-fatal error surfaced for observability
    Error(String),
}

impl CallEvent {
    /// Short tag for logging
    pub fn kind(&self) -> &'static str {
        match self {
            CallEvent::StateChanged { .. } => "state_changed",
            CallEvent::PartialTranscript(_) => "partial_transcript",
            CallEvent::FinalTranscript(_) => "final_transcript",
            CallEvent::Response { .. } => "response",
            CallEvent::OutboundAudio(_) => "outbound_audio",
            CallEvent::BargeIn { .. } => "barge_in",
            CallEvent::FlushPlayback => "flush_playback",
            CallEvent::HangupRequested => "hangup_requested",
            CallEvent::Error(_) => "error",
        }
    }
}
