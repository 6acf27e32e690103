//! Speech-synthesis provider clients
//!
//! Two transports: a WebSocket streaming client (low latency, incremental
//! chunks) and an HTTP client (simpler, one response per fragment). Both
//! speak the same incremental-text-plus-flush protocol at the fragment
//! level: one `synthesize` call sends the fragment with the flush flag set
//! and collects chunks until the provider signals final or error.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

use outdial_core::{Error as CoreError, SpeechSynthesizer};
use outdial_pool::{ConnectionFactory, ResourcePool};

/// Text message sent to a streaming synthesis endpoint
#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    /// Force generation of the pending fragment at this boundary
    flush: bool,
}

/// Control message received alongside binary audio chunks
#[derive(Debug, Deserialize)]
struct SynthesisSignal {
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    error: Option<String>,
}

/// WebSocket streaming synthesis provider.
///
/// Draws pre-established connections from the shared connection pool when
/// one is wired; a consumed stream is always discarded so the pool
/// re-establishes the handshake off the hot path.
pub struct WsSynthesizer {
    name: String,
    pool: Arc<ResourcePool<ConnectionFactory>>,
}

impl WsSynthesizer {
    pub fn new(name: impl Into<String>, pool: Arc<ResourcePool<ConnectionFactory>>) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for WsSynthesizer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> outdial_core::Result<Vec<u8>> {
        let checkout = self
            .pool
            .acquire()
            .await
            .map_err(|e| CoreError::Connection(e.to_string()))?;

        let stream = checkout.resource.take().await;
        let result = match stream {
            Some(mut stream) => {
                let request = SynthesisRequest {
                    text,
                    voice_id,
                    flush: true,
                };
                let payload = serde_json::to_string(&request)
                    .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;

                let run = async {
                    stream
                        .send(Message::Text(payload))
                        .await
                        .map_err(|e| CoreError::Connection(e.to_string()))?;

                    let mut audio = Vec::new();
                    while let Some(message) = stream.next().await {
                        let message =
                            message.map_err(|e| CoreError::Connection(e.to_string()))?;
                        match message {
                            Message::Binary(chunk) => audio.extend_from_slice(&chunk),
                            Message::Text(text) => {
                                let signal: SynthesisSignal = serde_json::from_str(&text)
                                    .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
                                if let Some(error) = signal.error {
                                    return Err(CoreError::Synthesis(error));
                                }
                                if signal.is_final {
                                    break;
                                }
                            },
                            Message::Close(_) => break,
                            _ => {},
                        }
                    }

                    if audio.is_empty() {
                        return Err(CoreError::Synthesis("provider returned no audio".into()));
                    }
                    Ok(audio)
                };
                run.await
            },
            None => Err(CoreError::Connection(
                "pooled connection already consumed".into(),
            )),
        };

        // The stream was taken out of the member either way; never reuse it
        self.pool.release(checkout, true).await;
        result
    }
}

/// HTTP synthesis provider: one POST per fragment, audio bytes back.
pub struct HttpSynthesizer {
    name: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> outdial_core::Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({ "text": text, "voice_id": voice_id }))
            .send()
            .await
            .map_err(|e| CoreError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Synthesis(format!("HTTP {}: {}", status, body)));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| CoreError::Connection(e.to_string()))?
            .to_vec();

        if audio.is_empty() {
            return Err(CoreError::Synthesis("provider returned no audio".into()));
        }
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = SynthesisRequest {
            text: "Hello there.",
            voice_id: "voice-a",
            flush: true,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"flush\":true"));
        assert!(json.contains("Hello there."));
    }

    #[test]
    fn test_signal_parsing() {
        let signal: SynthesisSignal = serde_json::from_str(r#"{"is_final": true}"#).unwrap();
        assert!(signal.is_final);
        assert!(signal.error.is_none());

        let signal: SynthesisSignal =
            serde_json::from_str(r#"{"error": "voice not found"}"#).unwrap();
        assert_eq!(signal.error.as_deref(), Some("voice not found"));
    }
}
