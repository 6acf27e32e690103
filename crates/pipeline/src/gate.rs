//! Transcript acceptance gate
//!
//! A final transcript is processed only if it clears four filters, in
//! order: not a near-duplicate of the previous accepted input, long enough
//! to be signal, outside the minimum inter-response interval, and the
//! system is not already mid-turn. Duplicates and noise are dropped
//! silently; interval/busy rejections queue the input for retry when the
//! system goes idle.

use std::time::Instant;

use outdial_cache::{jaccard_similarity, normalize};
use outdial_config::OrchestratorConfig;

/// Near-duplicate similarity bound (word-set Jaccard)
const DUPLICATE_SIMILARITY: f64 = 0.9;

/// Outcome of gating one final transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Process now
    Accept,
    /// Drop silently: near-duplicate of the previous accepted input
    Duplicate,
    /// Drop silently: below the minimum length (noise)
    TooShort,
    /// Queue for retry: inside the minimum inter-response interval
    TooSoon,
    /// Queue for retry: a turn is already in flight
    Busy,
}

impl GateDecision {
    /// Should the rejected input be queued rather than dropped?
    pub fn should_queue(&self) -> bool {
        matches!(self, GateDecision::TooSoon | GateDecision::Busy)
    }
}

/// View of the session fields the gate reads
#[derive(Debug, Clone)]
pub struct GateContext {
    pub last_accepted: Option<(String, Instant)>,
    pub last_user_input_at: Option<Instant>,
    pub busy: bool,
}

/// Stateless transcript filter
pub struct TranscriptGate {
    config: OrchestratorConfig,
}

impl TranscriptGate {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, text: &str, now: Instant, context: &GateContext) -> GateDecision {
        // 1. De-dup against the immediately preceding accepted transcript
        if let Some((previous, accepted_at)) = &context.last_accepted {
            let within_window = now.duration_since(*accepted_at).as_millis() as u64
                <= self.config.duplicate_window_ms;
            if within_window
                && jaccard_similarity(&normalize(text), &normalize(previous))
                    >= DUPLICATE_SIMILARITY
            {
                return GateDecision::Duplicate;
            }
        }

        // 2. Noise filter
        if normalize(text).len() < self.config.min_transcript_chars {
            return GateDecision::TooShort;
        }

        // 3. Debounce: minimum interval since the last accepted input
        if let Some(last) = context.last_user_input_at {
            let elapsed_ms = now.duration_since(last).as_millis() as u64;
            if elapsed_ms < self.config.min_response_interval_ms {
                return GateDecision::TooSoon;
            }
        }

        // 4. One turn in flight at a time
        if context.busy {
            return GateDecision::Busy;
        }

        GateDecision::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gate() -> TranscriptGate {
        TranscriptGate::new(OrchestratorConfig::default())
    }

    fn idle_context() -> GateContext {
        GateContext {
            last_accepted: None,
            last_user_input_at: None,
            busy: false,
        }
    }

    #[test]
    fn test_fresh_transcript_accepted() {
        let decision = gate().evaluate("I would like to know more", Instant::now(), &idle_context());
        assert_eq!(decision, GateDecision::Accept);
    }

    #[test]
    fn test_short_input_soon_after_previous_is_queued() {
        // "yes" arrives 200ms after the previous accepted input: the
        // interval rule rejects it and it queues for retry once idle.
        let now = Instant::now();
        let context = GateContext {
            last_accepted: Some(("tell me about pricing".to_string(), now)),
            last_user_input_at: Some(now),
            busy: false,
        };

        let decision = gate().evaluate("yes", now + Duration::from_millis(200), &context);
        assert_eq!(decision, GateDecision::TooSoon);
        assert!(decision.should_queue());

        // Once the interval elapses and the system is idle, it is accepted
        let later = now + Duration::from_millis(1300);
        let decision = gate().evaluate("yes", later, &context);
        assert_eq!(decision, GateDecision::Accept);
    }

    #[test]
    fn test_identical_transcript_within_window_is_dropped() {
        // Two identical finals 500ms apart while idle: second is a duplicate
        let now = Instant::now();
        let context = GateContext {
            last_accepted: Some(("okay I understand".to_string(), now)),
            last_user_input_at: Some(now),
            busy: false,
        };

        let decision = gate().evaluate("okay I understand", now + Duration::from_millis(500), &context);
        assert_eq!(decision, GateDecision::Duplicate);
        assert!(!decision.should_queue());
    }

    #[test]
    fn test_duplicate_outside_window_is_not_deduped() {
        let now = Instant::now();
        let context = GateContext {
            last_accepted: Some(("okay I understand".to_string(), now)),
            last_user_input_at: Some(now),
            busy: false,
        };

        let later = now + Duration::from_millis(5000);
        let decision = gate().evaluate("okay I understand", later, &context);
        assert_eq!(decision, GateDecision::Accept);
    }

    #[test]
    fn test_single_character_is_noise() {
        let decision = gate().evaluate("a", Instant::now(), &idle_context());
        assert_eq!(decision, GateDecision::TooShort);
        assert!(!decision.should_queue());
    }

    #[test]
    fn test_busy_system_queues_input() {
        let context = GateContext {
            busy: true,
            ..idle_context()
        };
        let decision = gate().evaluate("what about the price", Instant::now(), &context);
        assert_eq!(decision, GateDecision::Busy);
        assert!(decision.should_queue());
    }
}
