//! Per-call session state
//!
//! Owned exclusively by the call's orchestrator. Deadlines (barge-in
//! cooldown, utterance grace) are stored as instants on the session and
//! superseded by later events rather than driven by free-running timers.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use outdial_core::TranscriptResult;

use crate::state::CallState;

/// State for one active call
pub struct CallSession {
    pub call_id: String,
    pub user_id: String,
    pub state: CallState,
    /// Outbound audio for an agent utterance is in flight
    pub agent_speaking: bool,
    /// The recognizer reports the user speaking
    pub user_speaking: bool,
    /// A language-model call is in flight
    pub llm_inflight: bool,
    /// Last accepted user input
    pub last_user_input_at: Option<Instant>,
    /// When the current/most recent agent utterance started
    pub utterance_started_at: Option<Instant>,
    /// Most recently accepted transcript, for de-duplication
    pub last_accepted: Option<(String, Instant)>,
    /// Inputs received while busy, retried when idle
    pub pending_inputs: VecDeque<TranscriptResult>,
    /// Speech-start signals are ignored until this deadline after a barge-in
    pub cooldown_until: Option<Instant>,
    /// Monotonic turn counter; synthesis jobs are tagged with it so stale
    /// completions are discarded after a barge-in
    pub turn_serial: u64,
    /// Cycle ids handed to the metrics layer
    pub cycle_counter: u64,
    /// One backchannel at most per user turn
    pub backchannel_sent: bool,
    /// When continuous user speech started (backchannel timing)
    pub user_speech_started_at: Option<Instant>,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            user_id: user_id.into(),
            state: CallState::Idle,
            agent_speaking: false,
            user_speaking: false,
            llm_inflight: false,
            last_user_input_at: None,
            utterance_started_at: None,
            last_accepted: None,
            pending_inputs: VecDeque::new(),
            cooldown_until: None,
            turn_serial: 0,
            cycle_counter: 0,
            backchannel_sent: false,
            user_speech_started_at: None,
        }
    }

    /// Begin a new turn; returns its serial
    pub fn begin_turn(&mut self) -> u64 {
        self.turn_serial += 1;
        debug_assert!(
            !(self.agent_speaking && self.llm_inflight),
            "at most one of agent_speaking / llm_inflight may own the turn"
        );
        self.turn_serial
    }

    /// Is the system busy with a turn (LLM in flight or audio playing)?
    pub fn is_busy(&self) -> bool {
        self.agent_speaking || self.llm_inflight || self.state.is_busy()
    }

    /// Are we inside the post-barge-in cooldown?
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.map(|until| now < until).unwrap_or(false)
    }

    /// Arm the cooldown deadline
    pub fn start_cooldown(&mut self, duration: Duration) {
        self.cooldown_until = Some(Instant::now() + duration);
    }

    /// Is the current agent utterance still inside its grace window?
    pub fn in_grace_window(&self, now: Instant, grace: Duration) -> bool {
        self.utterance_started_at
            .map(|started| now.duration_since(started) < grace)
            .unwrap_or(false)
    }

    pub fn next_cycle_id(&mut self) -> u64 {
        self.cycle_counter += 1;
        self.cycle_counter
    }
}
