//! Bounded resource pools
//!
//! One contract for the two expensive per-call resources: transcoder
//! subprocess pipelines and provider streaming connections. Pools are warmed
//! at startup, acquire with a bounded wait, watchdog long checkouts, and run
//! a periodic health pass that retires stale members and replenishes toward
//! the target size.

pub mod connection;
pub mod pool;
pub mod transcoder;

pub use connection::{ConnectionFactory, ProviderConnection};
pub use pool::{Checkout, ResourceFactory, ResourcePool};
pub use transcoder::{PooledTranscoder, TranscoderFactory, TranscoderProcess};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// No member became available within the bounded wait
    #[error("pool {pool} unavailable after {waited_ms}ms")]
    Unavailable { pool: String, waited_ms: u64 },

    /// Member creation failed
    #[error("failed to create pool member: {0}")]
    Create(String),

    /// A member failed during use
    #[error("pool resource error: {0}")]
    Resource(String),
}
