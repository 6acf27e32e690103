//! Priority synthesis queue
//!
//! Accepts text fragments as they are produced, synthesizes them (possibly
//! out of arrival order, in parallel, across provider fallbacks), and lets
//! the consumer reassemble in-order playable audio. Failure of all providers
//! for a fragment is terminal for that fragment, never for the call.

pub mod job;
pub mod providers;
pub mod queue;
pub mod reorder;

pub use job::{JobPriority, JobStatus, SynthesisJob};
pub use providers::{HttpSynthesizer, WsSynthesizer};
pub use queue::{JobEvent, SynthesisQueue};
pub use reorder::ReorderBuffer;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthError {
    /// Backchannels are dropped, not queued, while other work is in flight
    #[error("backchannel rejected: synthesis in flight")]
    BackchannelRejected,

    /// Every provider and retry failed for a fragment
    #[error("synthesis exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },
}
