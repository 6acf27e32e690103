//! Shared error taxonomy
//!
//! Each crate defines its own error enum; this is the subset that crosses
//! crate boundaries through the provider traits. The propagation policy:
//! synthesis, cache, and pool failures are recovered locally and never end a
//! call; `LanguageModel` and unrecoverable `Recognition` failures do.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Provider connection unreachable or dropped mid-stream
    #[error("connection error: {0}")]
    Connection(String),

    /// Speech recognition stream failure
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech synthesis failure (one provider; callers may fall back)
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Language model failure (call-ending)
    #[error("language model error: {0}")]
    LanguageModel(String),

    /// Transcoder subprocess failure
    #[error("transcoder error: {0}")]
    Transcode(String),

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled (barge-in or hangup)
    #[error("cancelled")]
    Cancelled,

    /// Malformed payload at a transport boundary
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors that end the call rather than being recovered in place
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::LanguageModel(_) | Error::Recognition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::LanguageModel("down".into()).is_fatal());
        assert!(Error::Recognition("dropped".into()).is_fatal());
        assert!(!Error::Synthesis("503".into()).is_fatal());
        assert!(!Error::Timeout("acquire".into()).is_fatal());
    }
}
