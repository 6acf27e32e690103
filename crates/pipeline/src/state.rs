//! Turn-taking state machine states

/// Per-call conversation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Created, media stream not yet started
    Idle,
    /// Playing the scripted opening and establishing recognition
    Initializing,
    /// Waiting for user speech
    Listening,
    /// User is speaking
    UserSpeaking,
    /// Language model call in flight
    LlmProcessing,
    /// Agent audio is playing
    AgentSpeaking,
    /// Barge-in registered; flushing the interrupted utterance
    BargeInDetected,
    /// Playing the closing utterance before ending the call
    HangingUp,
    /// Call ended normally
    Terminated,
    /// Media stream dropped out from under us
    Disconnected,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Initializing => "initializing",
            CallState::Listening => "listening",
            CallState::UserSpeaking => "user_speaking",
            CallState::LlmProcessing => "llm_processing",
            CallState::AgentSpeaking => "agent_speaking",
            CallState::BargeInDetected => "barge_in_detected",
            CallState::HangingUp => "hanging_up",
            CallState::Terminated => "terminated",
            CallState::Disconnected => "disconnected",
        }
    }

    /// No further transitions once here
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Terminated | CallState::Disconnected)
    }

    /// The system considers itself busy with a turn (inputs queue instead
    /// of being processed)
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            CallState::LlmProcessing | CallState::AgentSpeaking | CallState::HangingUp
        )
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
