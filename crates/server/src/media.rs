//! Telephony media-stream protocol
//!
//! The carrier holds one WebSocket per call carrying JSON control messages
//! and base64-encoded µ-law audio frames tagged with a stream id.

use serde::{Deserialize, Serialize};

/// Messages on the telephony media stream, both directions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MediaMessage {
    /// Stream opened; carries the call and user identity
    Start { start: StreamStart },
    /// One audio frame
    Media { media: MediaPayload },
    /// Stream closed by the carrier
    Stop,
    /// Outbound only: drop any audio the carrier has buffered (barge-in)
    Clear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStart {
    /// Carrier stream identifier
    pub stream_id: String,
    /// Our call identifier
    pub call_id: String,
    /// Caller-supplied user identifier
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded µ-law 8kHz mono audio
    pub payload: String,
}

impl MediaMessage {
    /// Outbound media frame from raw µ-law bytes
    pub fn outbound_audio(frame: &outdial_core::AudioFrame) -> Self {
        MediaMessage::Media {
            media: MediaPayload {
                payload: frame.to_base64(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_message_round_trip() {
        let json = r#"{"event":"start","start":{"stream_id":"s1","call_id":"c1","user_id":"u1"}}"#;
        let message: MediaMessage = serde_json::from_str(json).unwrap();
        match &message {
            MediaMessage::Start { start } => {
                assert_eq!(start.call_id, "c1");
                assert_eq!(start.user_id, "u1");
            },
            other => panic!("unexpected: {:?}", other),
        }

        let back = serde_json::to_string(&message).unwrap();
        assert!(back.contains("\"event\":\"start\""));
    }

    #[test]
    fn test_media_message_parses() {
        let json = r#"{"event":"media","media":{"payload":"AAEC"}}"#;
        let message: MediaMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(message, MediaMessage::Media { .. }));
    }

    #[test]
    fn test_clear_serializes() {
        let json = serde_json::to_string(&MediaMessage::Clear).unwrap();
        assert_eq!(json, r#"{"event":"clear"}"#);
    }
}
