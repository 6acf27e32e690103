//! Centralized constants for the call agent
//!
//! Single source of truth for tuned defaults used across the codebase.
//! These are tuning knobs, not correctness invariants: every value here can
//! be overridden through `Settings`, and none of them were derived from
//! first principles — they were tuned against live call traffic.

/// Turn-taking and debounce timing (milliseconds)
pub mod timing {
    /// Grace period after an utterance starts during which a speech-start
    /// signal is treated as echo/noise rather than a barge-in
    pub const BARGE_IN_GRACE_MS: u64 = 400;

    /// Cooldown after a barge-in during which further speech-start signals
    /// are ignored
    pub const BARGE_IN_COOLDOWN_MS: u64 = 600;

    /// Minimum interval between accepted user inputs
    pub const MIN_RESPONSE_INTERVAL_MS: u64 = 1200;

    /// Window within which an identical transcript is treated as a duplicate
    pub const DUPLICATE_WINDOW_MS: u64 = 3000;

    /// Continuous user speech before a backchannel acknowledgment is considered
    pub const BACKCHANNEL_AFTER_MS: u64 = 4000;

    /// Keep-alive interval for the recognition connection during silence
    pub const RECOGNITION_KEEPALIVE_MS: u64 = 5000;
}

/// Transcript acceptance filters
pub mod transcripts {
    /// Minimum characters for a final transcript to be processed
    pub const MIN_TRANSCRIPT_CHARS: usize = 2;

    /// Exchanges retained for repetition detection
    pub const REPETITION_WINDOW: usize = 4;

    /// Repeats of a topically-equivalent utterance before disengaging
    pub const REPETITION_THRESHOLD: usize = 2;
}

/// Synthesis queue tuning
pub mod synthesis {
    /// Jobs synthesized concurrently per process
    pub const MAX_CONCURRENT_JOBS: usize = 3;

    /// Retries per job across the provider fallback chain
    pub const MAX_RETRIES: u32 = 2;

    /// Sequence indices considered "early" for priority purposes
    pub const EARLY_FRAGMENT_INDEX: u32 = 3;
}

/// Early-cutoff heuristic bounds
pub mod cutoff {
    /// Never cut off below this many accumulated characters
    pub const MIN_RESPONSE_CHARS: usize = 24;

    /// Always cut off above this many accumulated characters
    pub const MAX_RESPONSE_CHARS: usize = 600;
}

/// Audio cache tuning
pub mod cache {
    /// Word-set similarity acceptance threshold for the phonetic tier
    pub const JACCARD_THRESHOLD: f64 = 0.8;

    /// Minimum characters for a phrase to be phonetically cacheable
    pub const MIN_CACHEABLE_CHARS: usize = 12;

    /// Entry time-to-live (seconds)
    pub const ENTRY_TTL_SECS: u64 = 24 * 60 * 60;
}

/// Resource pool tuning
pub mod pools {
    /// Warm pool size at startup
    pub const TARGET_SIZE: usize = 2;

    /// Hard ceiling on pool membership
    pub const MAX_SIZE: usize = 6;

    /// Bounded wait on acquire (milliseconds)
    pub const ACQUIRE_TIMEOUT_MS: u64 = 2000;

    /// Force-discard a checkout held longer than this (milliseconds)
    pub const MAX_CHECKOUT_MS: u64 = 30_000;

    /// Retire members older than this (seconds)
    pub const MAX_AGE_SECS: u64 = 15 * 60;

    /// Health pass interval (seconds)
    pub const HEALTH_INTERVAL_SECS: u64 = 30;
}

/// Latency monitoring
pub mod latency {
    /// Rolling window length per stage
    pub const WINDOW_SIZE: usize = 100;

    /// End-to-end ceiling before a call counts as slow (milliseconds)
    pub const SLOW_CALL_CEILING_MS: u64 = 8000;

    /// Consecutive slow calls before a degradation event is flagged
    pub const BREAKER_THRESHOLD: u32 = 3;
}

/// Audio framing
pub mod audio {
    /// Outbound media frame size in µ-law bytes (20ms at 8kHz)
    pub const FRAME_BYTES: usize = 160;
}
