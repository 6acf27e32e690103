//! Conversation cycle: one user-turn → agent-turn round trip
//!
//! Cycles exist purely for instrumentation. They never feed back into
//! business logic.

use std::time::Instant;

/// Milestones of one conversation cycle
#[derive(Debug, Clone)]
pub struct ConversationCycle {
    /// Cycle id, unique within the call
    pub id: u64,
    /// When user speech for this cycle started
    pub started_at: Instant,
    /// When the user stopped speaking
    pub speech_end: Option<Instant>,
    /// Final transcript text
    pub transcript: Option<String>,
    /// When recognition finished
    pub recognition_complete: Option<Instant>,
    /// First language-model token
    pub llm_first_token: Option<Instant>,
    /// Language model stream complete
    pub llm_complete: Option<Instant>,
    /// First synthesized audio available
    pub synthesis_first_audio: Option<Instant>,
    /// First outbound audio frame sent
    pub first_audio_sent: Option<Instant>,
    /// Outbound audio chunks sent
    pub audio_chunks: u64,
    /// Cycle closed (playback finished or aborted)
    pub completed_at: Option<Instant>,
    /// The agent utterance was aborted by barge-in
    pub aborted: bool,
}

impl ConversationCycle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            speech_end: None,
            transcript: None,
            recognition_complete: None,
            llm_first_token: None,
            llm_complete: None,
            synthesis_first_audio: None,
            first_audio_sent: None,
            audio_chunks: 0,
            completed_at: None,
            aborted: false,
        }
    }

    pub fn mark_speech_end(&mut self) {
        self.speech_end.get_or_insert_with(Instant::now);
    }

    pub fn mark_recognition_complete(&mut self, transcript: &str) {
        self.transcript = Some(transcript.to_string());
        self.recognition_complete.get_or_insert_with(Instant::now);
    }

    pub fn mark_llm_first_token(&mut self) {
        self.llm_first_token.get_or_insert_with(Instant::now);
    }

    pub fn mark_llm_complete(&mut self) {
        self.llm_complete.get_or_insert_with(Instant::now);
    }

    pub fn mark_synthesis_first_audio(&mut self) {
        self.synthesis_first_audio.get_or_insert_with(Instant::now);
    }

    pub fn mark_audio_sent(&mut self) {
        self.first_audio_sent.get_or_insert_with(Instant::now);
        self.audio_chunks += 1;
    }

    /// Close the cycle. Idempotent.
    pub fn complete(&mut self, aborted: bool) {
        if self.completed_at.is_none() {
            self.completed_at = Some(Instant::now());
            self.aborted = aborted;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// End-to-end latency: user speech end to first audio sent
    pub fn response_latency_ms(&self) -> Option<u64> {
        let end = self.speech_end?;
        let sent = self.first_audio_sent?;
        Some(sent.duration_since(end).as_millis() as u64)
    }

    /// Total cycle duration
    pub fn total_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|done| done.duration_since(self.started_at).as_millis() as u64)
    }
}
