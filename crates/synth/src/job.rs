//! Synthesis job types

use std::time::Instant;
use uuid::Uuid;

/// Priority tiers, highest first.
///
/// Ordering is by urgency to start, not delivery order — delivery to
/// playback is always by ascending sequence index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Short acknowledgment injected without taking a turn
    Backchannel,
    /// First fragment of a turn (time-to-first-audio critical)
    FirstFragment,
    /// Early fragments (sequence index below the early threshold)
    Early,
    Normal,
    Late,
}

impl JobPriority {
    /// Classify a main-response fragment by position
    pub fn for_fragment(sequence_index: u32, is_first: bool, early_threshold: u32) -> Self {
        if is_first {
            JobPriority::FirstFragment
        } else if sequence_index < early_threshold {
            JobPriority::Early
        } else {
            JobPriority::Normal
        }
    }

    /// One tier lower; applied on retry so a flaky fragment stops competing
    /// with fresh work.
    pub fn demoted(self) -> Self {
        match self {
            JobPriority::Backchannel => JobPriority::FirstFragment,
            JobPriority::FirstFragment => JobPriority::Early,
            JobPriority::Early => JobPriority::Normal,
            JobPriority::Normal | JobPriority::Late => JobPriority::Late,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A queued unit of text to synthesize
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub id: Uuid,
    pub text: String,
    pub priority: JobPriority,
    /// Reassembly position within the turn
    pub sequence_index: u32,
    pub is_first: bool,
    /// Turn this job belongs to; stale turns are discarded after barge-in
    pub turn_serial: u64,
    pub status: JobStatus,
    /// Provider that produced the audio, when completed
    pub provider: Option<String>,
    pub retries: u32,
    /// Synthesized audio. Compressed provider output unless `from_cache`,
    /// in which case it is already narrowband playback audio.
    pub audio: Option<Vec<u8>>,
    pub from_cache: bool,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
}

impl SynthesisJob {
    pub fn new(
        text: impl Into<String>,
        priority: JobPriority,
        sequence_index: u32,
        is_first: bool,
        turn_serial: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            priority,
            sequence_index,
            is_first,
            turn_serial,
            status: JobStatus::Pending,
            provider: None,
            retries: 0,
            audio: None,
            from_cache: false,
            created_at: Instant::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Synthesis latency, when completed
    pub fn synthesis_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let done = self.completed_at?;
        Some(done.duration_since(started).as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering_highest_first() {
        assert!(JobPriority::Backchannel < JobPriority::FirstFragment);
        assert!(JobPriority::FirstFragment < JobPriority::Early);
        assert!(JobPriority::Early < JobPriority::Normal);
        assert!(JobPriority::Normal < JobPriority::Late);
    }

    #[test]
    fn test_fragment_classification() {
        assert_eq!(
            JobPriority::for_fragment(0, true, 3),
            JobPriority::FirstFragment
        );
        assert_eq!(JobPriority::for_fragment(1, false, 3), JobPriority::Early);
        assert_eq!(JobPriority::for_fragment(5, false, 3), JobPriority::Normal);
    }

    #[test]
    fn test_demotion_saturates_at_late() {
        assert_eq!(JobPriority::Normal.demoted(), JobPriority::Late);
        assert_eq!(JobPriority::Late.demoted(), JobPriority::Late);
    }
}
