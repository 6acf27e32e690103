//! Telephony media-stream handler
//!
//! One WebSocket per call. Inbound: control messages plus base64 µ-law
//! frames, forwarded to the recognition stream. Outbound: the orchestrator's
//! audio frames, plus a `clear` on barge-in so the carrier drops its
//! buffered audio.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use outdial_core::{AudioFrame, CallEvent, RecognizerEvent};
use outdial_pipeline::{CallOrchestrator, OrchestratorDeps};
use outdial_synth::SynthesisQueue;

use crate::media::{MediaMessage, StreamStart};
use crate::state::AppState;

/// Media stream endpoint handler
pub struct MediaStreamHandler;

impl MediaStreamHandler {
    pub async fn handle(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
        ws.on_upgrade(move |socket| Self::handle_socket(socket, state))
    }

    async fn handle_socket(socket: WebSocket, state: AppState) {
        let (sender, mut receiver) = socket.split();
        let sender = Arc::new(tokio::sync::Mutex::new(sender));

        // The stream must open with a start message
        let start = loop {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<MediaMessage>(&text) {
                        Ok(MediaMessage::Start { start }) => break start,
                        Ok(other) => {
                            tracing::debug!(message = ?other, "Ignoring pre-start message");
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "Unparseable media message before start");
                        },
                    }
                },
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Media socket error before start");
                    return;
                },
            }
        };

        tracing::info!(
            call_id = %start.call_id,
            user_id = %start.user_id,
            stream_id = %start.stream_id,
            "Media stream started"
        );

        let Some((orchestrator, audio_tx)) = Self::set_up_call(&state, &start).await else {
            return;
        };

        // Outbound: orchestrator events → carrier messages
        let outbound_task = {
            let mut events = orchestrator.subscribe();
            let sender = Arc::clone(&sender);
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    let message = match &event {
                        CallEvent::OutboundAudio(frame) => {
                            Some(MediaMessage::outbound_audio(frame))
                        },
                        CallEvent::FlushPlayback => Some(MediaMessage::Clear),
                        CallEvent::StateChanged { to, .. }
                            if *to == "terminated" || *to == "disconnected" =>
                        {
                            let mut s = sender.lock().await;
                            let _ = s.send(Message::Close(None)).await;
                            break;
                        },
                        _ => None,
                    };

                    if let Some(message) = message {
                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(_) => continue,
                        };
                        let mut s = sender.lock().await;
                        if s.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
            })
        };

        // Kick off the call (opening utterance, then listening)
        {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                if let Err(e) = orchestrator.start_call().await {
                    tracing::error!(error = %e, "Call start failed");
                }
            });
        }

        // Inbound: carrier messages → recognition audio
        let mut frame_seq: u64 = 0;
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<MediaMessage>(&text) {
                    Ok(MediaMessage::Media { media }) => {
                        if let Some(call) = state.calls.get(&start.call_id) {
                            call.touch();
                        }
                        match AudioFrame::from_base64(&media.payload, frame_seq) {
                            Ok(frame) => {
                                frame_seq += 1;
                                if audio_tx.send(frame.payload.to_vec()).await.is_err() {
                                    tracing::warn!("Recognition stream gone, stopping inbound");
                                    break;
                                }
                            },
                            Err(e) => {
                                tracing::warn!(error = %e, "Bad media payload");
                            },
                        }
                    },
                    Ok(MediaMessage::Stop) => {
                        tracing::info!(call_id = %start.call_id, "Media stream stopped by carrier");
                        orchestrator.handle_media_stop();
                        break;
                    },
                    Ok(_) => {},
                    Err(e) => {
                        tracing::debug!(error = %e, "Unparseable media message");
                    },
                },
                Ok(Message::Close(_)) | Err(_) => {
                    orchestrator.handle_media_stop();
                    break;
                },
                Ok(_) => {},
            }
        }

        state.calls.remove(&start.call_id);
        outbound_task.abort();
        tracing::info!(call_id = %start.call_id, "Media stream closed");
    }

    /// Build the per-call pipeline: synthesis queue, orchestrator,
    /// recognition stream, and the recognizer-event pump.
    async fn set_up_call(
        state: &AppState,
        start: &StreamStart,
    ) -> Option<(Arc<CallOrchestrator>, mpsc::Sender<Vec<u8>>)> {
        let (queue, queue_events) = SynthesisQueue::start(
            state.settings.synthesis.clone(),
            state.synthesizers.clone(),
            Some(state.cache.clone()),
            state.voice_id.clone(),
        );

        let orchestrator = CallOrchestrator::new(
            start.call_id.clone(),
            start.user_id.clone(),
            state.settings.orchestrator.clone(),
            state.settings.scripts.clone(),
            state.settings.llm.clone(),
            OrchestratorDeps {
                llm: state.llm.clone(),
                queue,
                queue_events,
                transcoder: state.transcoder.clone(),
                cache: state.cache.clone(),
                tracker: state.tracker.clone(),
                voice_id: state.voice_id.clone(),
            },
        );

        if let Err(e) = state.calls.insert(&start.call_id, orchestrator.clone()) {
            tracing::error!(call_id = %start.call_id, error = %e, "Rejecting call");
            return None;
        }

        // Recognition stream established before the call starts listening
        let recognizer_session = match state.recognizer.start().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(call_id = %start.call_id, error = %e, "Recognition stream failed");
                state.calls.remove(&start.call_id);
                return None;
            },
        };

        let audio_tx = recognizer_session.audio_tx.clone();
        let mut events = recognizer_session.events;

        // Pump recognizer events into the orchestrator in arrival order
        {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let fatal = matches!(event, RecognizerEvent::Disconnected { .. });
                    orchestrator.handle_recognizer_event(event).await;
                    if fatal {
                        break;
                    }
                }
                tracing::debug!("Recognizer event pump exiting");
            });
        }

        Some((orchestrator, audio_tx))
    }
}
