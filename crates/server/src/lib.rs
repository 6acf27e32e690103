//! Telephony media-stream server
//!
//! The process edge: accepts one WebSocket per call speaking the carrier's
//! base64 µ-law media protocol, wires each call to a fresh orchestrator,
//! and holds the process-wide shared services (pools, cache, tracker).

pub mod http;
pub mod media;
pub mod recognition;
pub mod session;
pub mod state;
pub mod websocket;

pub use media::{MediaMessage, MediaPayload, StreamStart};
pub use recognition::WsRecognizer;
pub use session::{ActiveCall, CallRegistry};
pub use state::AppState;
pub use websocket::MediaStreamHandler;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("call capacity reached ({0})")]
    Capacity(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),
}
