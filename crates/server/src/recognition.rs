//! Speech-recognition streaming client
//!
//! Holds one WebSocket per call against the recognition service: raw
//! narrowband audio up, JSON events down (speech start, interim/final
//! transcripts, utterance end). A keep-alive message is sent during silence
//! to hold the connection open.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use outdial_config::RecognitionConfig;
use outdial_core::{
    Error as CoreError, RecognizerEvent, RecognizerSession, SpeechRecognizer, TranscriptResult,
};
use outdial_pool::{ConnectionFactory, ResourcePool};

/// Recognition service wire events
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    SpeechStarted,
    Results {
        #[serde(default)]
        is_final: bool,
        channel: WireChannel,
    },
    UtteranceEnd,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    alternatives: Vec<WireAlternative>,
}

#[derive(Debug, Deserialize)]
struct WireAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// WebSocket recognition client backed by the shared connection pool
pub struct WsRecognizer {
    config: RecognitionConfig,
    pool: Arc<ResourcePool<ConnectionFactory>>,
}

impl WsRecognizer {
    pub fn new(config: RecognitionConfig, pool: Arc<ResourcePool<ConnectionFactory>>) -> Self {
        Self { config, pool }
    }

    /// Connection factory for this recognizer's pool
    pub fn connection_factory(config: &RecognitionConfig) -> ConnectionFactory {
        let url = format!(
            "{}?sample_rate={}&endpointing={}&utterance_end_ms={}",
            config.url, config.sample_rate, config.endpointing_ms, config.utterance_end_ms
        );
        ConnectionFactory::new(url).with_header("authorization", format!("Token {}", config.api_key))
    }
}

#[async_trait]
impl SpeechRecognizer for WsRecognizer {
    async fn start(&self) -> outdial_core::Result<RecognizerSession> {
        let checkout = self
            .pool
            .acquire()
            .await
            .map_err(|e| CoreError::Recognition(e.to_string()))?;

        let Some(stream) = checkout.resource.take().await else {
            self.pool.release(checkout, true).await;
            return Err(CoreError::Recognition(
                "pooled recognition connection already consumed".into(),
            ));
        };

        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(256);
        let (event_tx, events) = mpsc::channel::<RecognizerEvent>(256);
        let keepalive = Duration::from_millis(self.config.keepalive_ms);

        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let (mut sink, mut source) = stream.split();
            let mut keepalive_timer = tokio::time::interval(keepalive);
            keepalive_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            keepalive_timer.reset();

            loop {
                tokio::select! {
                    maybe_audio = audio_rx.recv() => {
                        match maybe_audio {
                            Some(audio) => {
                                if let Err(e) = sink.send(Message::Binary(audio)).await {
                                    let _ = event_tx
                                        .send(RecognizerEvent::Disconnected {
                                            reason: e.to_string(),
                                        })
                                        .await;
                                    break;
                                }
                                keepalive_timer.reset();
                            },
                            None => {
                                // Caller dropped the audio side; close out
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            },
                        }
                    },

                    maybe_message = source.next() => {
                        match maybe_message {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) = parse_wire_event(&text) {
                                    if event_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = event_tx
                                    .send(RecognizerEvent::Disconnected {
                                        reason: "stream closed".into(),
                                    })
                                    .await;
                                break;
                            },
                            Some(Ok(_)) => {},
                            Some(Err(e)) => {
                                let _ = event_tx
                                    .send(RecognizerEvent::Disconnected {
                                        reason: e.to_string(),
                                    })
                                    .await;
                                break;
                            },
                        }
                    },

                    _ = keepalive_timer.tick() => {
                        let message = serde_json::json!({"type": "KeepAlive"}).to_string();
                        if sink.send(Message::Text(message)).await.is_err() {
                            let _ = event_tx
                                .send(RecognizerEvent::Disconnected {
                                    reason: "keep-alive failed".into(),
                                })
                                .await;
                            break;
                        }
                    },
                }
            }

            // The stream was consumed out of the pool member
            pool.release(checkout, true).await;
            tracing::debug!("Recognition stream task exiting");
        });

        Ok(RecognizerSession { audio_tx, events })
    }
}

fn parse_wire_event(text: &str) -> Option<RecognizerEvent> {
    let event = serde_json::from_str::<WireEvent>(text).ok()?;
    match event {
        WireEvent::SpeechStarted => Some(RecognizerEvent::SpeechStarted),
        WireEvent::Results { is_final, channel } => {
            let alternative = channel.alternatives.into_iter().next()?;
            if alternative.transcript.is_empty() {
                return None;
            }
            let transcript = TranscriptResult {
                text: alternative.transcript,
                confidence: alternative.confidence,
                is_final,
            };
            Some(if is_final {
                RecognizerEvent::Final(transcript)
            } else {
                RecognizerEvent::Interim(transcript)
            })
        },
        WireEvent::UtteranceEnd => Some(RecognizerEvent::UtteranceEnd),
        WireEvent::Other => None,
    }
}
