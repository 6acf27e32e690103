//! End-to-end turn flow against fake providers
//!
//! Exercises the orchestrator's externally observable behavior: opening
//! playback, transcript-to-audio turns, barge-in, early cutoff, duplicate
//! gating, and failure hangups.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use outdial_cache::AudioCache;
use outdial_config::{
    CacheConfig, LatencyConfig, LlmConfig, OrchestratorConfig, ScriptsConfig, SynthesisConfig,
};
use outdial_core::{
    CallEvent, Error as CoreError, FinishReason, GenerateRequest, GenerateResponse, LanguageModel,
    RecognizerEvent, SpeechSynthesizer, StreamChunk, TokenUsage, Transcoder, TranscriptResult,
};
use outdial_metrics::CycleTracker;
use outdial_pipeline::{CallOrchestrator, CallState, OrchestratorDeps};
use outdial_synth::SynthesisQueue;

struct FakeLlm {
    chunks: Vec<&'static str>,
    delay_ms: u64,
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn generate_stream(
        &self,
        _request: GenerateRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> outdial_core::Result<GenerateResponse> {
        let mut sent = String::new();
        for chunk in &self.chunks {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if tx
                .send(StreamChunk {
                    delta: chunk.to_string(),
                })
                .await
                .is_err()
            {
                return Ok(GenerateResponse {
                    text: sent,
                    finish_reason: FinishReason::Cancelled,
                    usage: TokenUsage::default(),
                });
            }
            sent.push_str(chunk);
        }
        Ok(GenerateResponse {
            text: sent,
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
        })
    }
}

struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    async fn generate_stream(
        &self,
        _request: GenerateRequest,
        _tx: mpsc::Sender<StreamChunk>,
    ) -> outdial_core::Result<GenerateResponse> {
        Err(CoreError::LanguageModel("model unreachable".into()))
    }
}

struct FakeSynth {
    delay_ms: u64,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    fn name(&self) -> &str {
        "fake"
    }

    async fn synthesize(&self, text: &str, _voice_id: &str) -> outdial_core::Result<Vec<u8>> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(text.as_bytes().to_vec())
    }
}

struct FakeTranscoder {
    delay_ms: u64,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn to_narrowband(&self, encoded: &[u8]) -> outdial_core::Result<Vec<u8>> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(encoded.to_vec())
    }
}

struct Harness {
    orchestrator: Arc<CallOrchestrator>,
    events: broadcast::Receiver<CallEvent>,
}

fn harness(
    llm: Arc<dyn LanguageModel>,
    synth_delay_ms: u64,
    transcode_delay_ms: u64,
    tune: impl FnOnce(&mut OrchestratorConfig),
) -> Harness {
    let mut config = OrchestratorConfig::default();
    config.backchannels_enabled = false;
    tune(&mut config);

    let cache = Arc::new(AudioCache::new(CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    }));
    let synth_config = SynthesisConfig {
        providers: Vec::new(),
        max_concurrent: 3,
        max_retries: 0,
    };
    let (queue, queue_events) = SynthesisQueue::start(
        synth_config,
        vec![Arc::new(FakeSynth {
            delay_ms: synth_delay_ms,
        })],
        None,
        "test-voice",
    );

    let orchestrator = CallOrchestrator::new(
        "call-1",
        "user-1",
        config,
        ScriptsConfig::default(),
        LlmConfig::default(),
        OrchestratorDeps {
            llm,
            queue,
            queue_events,
            transcoder: Arc::new(FakeTranscoder {
                delay_ms: transcode_delay_ms,
            }),
            cache,
            tracker: Arc::new(CycleTracker::new(LatencyConfig::default())),
            voice_id: "test-voice".into(),
        },
    );

    let events = orchestrator.subscribe();
    Harness {
        orchestrator,
        events,
    }
}

/// Collect events until the predicate matches one, or time out.
async fn collect_until(
    rx: &mut broadcast::Receiver<CallEvent>,
    timeout: Duration,
    mut done: impl FnMut(&CallEvent) -> bool,
) -> Vec<CallEvent> {
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let event = tokio::select! {
            result = rx.recv() => match result {
                Ok(event) => event,
                Err(_) => break,
            },
            _ = tokio::time::sleep_until(deadline) => break,
        };
        let hit = done(&event);
        collected.push(event);
        if hit {
            break;
        }
    }
    collected
}

fn final_transcript(text: &str) -> RecognizerEvent {
    RecognizerEvent::Final(TranscriptResult::final_result(text, 0.95))
}

#[tokio::test]
async fn test_start_call_plays_opening_then_listens() {
    let mut h = harness(
        Arc::new(FakeLlm {
            chunks: vec![],
            delay_ms: 0,
        }),
        0,
        0,
        |_| {},
    );

    h.orchestrator.start_call().await.unwrap();
    assert_eq!(h.orchestrator.state(), CallState::Listening);

    let events = collect_until(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, CallEvent::StateChanged { to, .. } if *to == "listening")
    })
    .await;

    let audio_frames = events
        .iter()
        .filter(|e| matches!(e, CallEvent::OutboundAudio(_)))
        .count();
    assert!(audio_frames > 0, "opening utterance must produce audio");
}

#[tokio::test]
async fn test_turn_produces_response_and_ordered_audio() {
    let mut h = harness(
        Arc::new(FakeLlm {
            chunks: vec!["I can help with that. ", "What works best for you today."],
            delay_ms: 0,
        }),
        0,
        0,
        |_| {},
    );

    h.orchestrator.start_call().await.unwrap();
    h.orchestrator
        .handle_recognizer_event(final_transcript("tell me about the service"))
        .await;

    let events = collect_until(&mut h.events, Duration::from_secs(3), |e| {
        matches!(e, CallEvent::Response { is_final: true, .. })
    })
    .await;

    assert!(events
        .iter()
        .any(|e| matches!(e, CallEvent::FinalTranscript(t) if t.text.contains("service"))));

    let sequences: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            CallEvent::OutboundAudio(frame) => Some(frame.sequence),
            _ => None,
        })
        .collect();
    assert!(!sequences.is_empty());
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sequences, sorted, "outbound frames must be in order");

    // Turn finishes back in listening
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.orchestrator.state(), CallState::Listening);
}

#[tokio::test]
async fn test_barge_in_stops_outbound_audio() {
    let mut h = harness(
        Arc::new(FakeLlm {
            chunks: vec![
                "One moment please. ",
                "Let me check that for you. ",
                "Here is what I found for you today. ",
            ],
            delay_ms: 10,
        }),
        20,
        30,
        |config| {
            config.barge_in_grace_ms = 0;
        },
    );

    h.orchestrator.start_call().await.unwrap();
    h.orchestrator
        .handle_recognizer_event(final_transcript("please look this up"))
        .await;

    // Wait until agent audio starts flowing
    collect_until(&mut h.events, Duration::from_secs(3), |e| {
        matches!(e, CallEvent::OutboundAudio(_))
    })
    .await;

    // Caller starts talking over the agent
    h.orchestrator
        .handle_recognizer_event(RecognizerEvent::SpeechStarted)
        .await;

    let events = collect_until(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, CallEvent::BargeIn { .. })
    })
    .await;
    assert!(events.iter().any(|e| matches!(e, CallEvent::FlushPlayback)));

    // Let any frame already mid-emit land, then the line must stay silent
    tokio::time::sleep(Duration::from_millis(150)).await;
    collect_until(&mut h.events, Duration::from_millis(50), |_| false).await;
    let after = collect_until(&mut h.events, Duration::from_millis(300), |_| false).await;
    assert!(
        !after.iter().any(|e| matches!(e, CallEvent::OutboundAudio(_))),
        "no audio may be sent after barge-in"
    );
    assert_eq!(h.orchestrator.state(), CallState::Listening);
}

#[tokio::test]
async fn test_speech_start_within_grace_window_is_ignored() {
    let mut h = harness(
        Arc::new(FakeLlm {
            chunks: vec!["Thanks for waiting. ", "Here is the full detail on that. "],
            delay_ms: 10,
        }),
        20,
        30,
        |config| {
            config.barge_in_grace_ms = 10_000;
        },
    );

    h.orchestrator.start_call().await.unwrap();
    h.orchestrator
        .handle_recognizer_event(final_transcript("go ahead please"))
        .await;

    collect_until(&mut h.events, Duration::from_secs(3), |e| {
        matches!(e, CallEvent::OutboundAudio(_))
    })
    .await;

    // Echo of our own audio: inside the grace window
    h.orchestrator
        .handle_recognizer_event(RecognizerEvent::SpeechStarted)
        .await;

    let events = collect_until(&mut h.events, Duration::from_millis(300), |e| {
        matches!(e, CallEvent::BargeIn { .. })
    })
    .await;
    assert!(
        !events.iter().any(|e| matches!(e, CallEvent::BargeIn { .. })),
        "speech start inside the grace window must be ignored"
    );
}

#[tokio::test]
async fn test_duplicate_transcript_is_dropped() {
    let mut h = harness(
        Arc::new(FakeLlm {
            chunks: vec!["Understood, thanks for confirming that."],
            delay_ms: 0,
        }),
        0,
        0,
        |_| {},
    );

    h.orchestrator.start_call().await.unwrap();
    h.orchestrator
        .handle_recognizer_event(final_transcript("okay I understand"))
        .await;

    collect_until(&mut h.events, Duration::from_secs(3), |e| {
        matches!(e, CallEvent::Response { is_final: true, .. })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Identical transcript shortly after: dropped, no second turn
    h.orchestrator
        .handle_recognizer_event(final_transcript("okay I understand"))
        .await;

    let events = collect_until(&mut h.events, Duration::from_millis(300), |e| {
        matches!(e, CallEvent::FinalTranscript(_))
    })
    .await;
    assert!(
        !events.iter().any(|e| matches!(e, CallEvent::FinalTranscript(_))),
        "duplicate transcript must not start a turn"
    );
}

#[tokio::test]
async fn test_early_cutoff_on_complete_question() {
    let mut h = harness(
        Arc::new(FakeLlm {
            chunks: vec![
                "Are you the computer owner?",
                " Great, because I have a longer follow-up that should never play.",
            ],
            delay_ms: 40,
        }),
        0,
        0,
        |_| {},
    );

    h.orchestrator.start_call().await.unwrap();
    h.orchestrator
        .handle_recognizer_event(final_transcript("hello who is this"))
        .await;

    let events = collect_until(&mut h.events, Duration::from_secs(3), |e| {
        matches!(e, CallEvent::Response { is_final: true, .. })
    })
    .await;

    let final_text = events
        .iter()
        .rev()
        .find_map(|e| match e {
            CallEvent::Response {
                text,
                is_final: true,
            } => Some(text.clone()),
            _ => None,
        })
        .expect("expected a final response");

    assert_eq!(final_text, "Are you the computer owner?");
}

#[tokio::test]
async fn test_llm_failure_apologizes_and_hangs_up() {
    let mut h = harness(Arc::new(FailingLlm), 0, 0, |_| {});

    h.orchestrator.start_call().await.unwrap();
    h.orchestrator
        .handle_recognizer_event(final_transcript("can you hear me"))
        .await;

    let events = collect_until(&mut h.events, Duration::from_secs(3), |e| {
        matches!(e, CallEvent::StateChanged { to, .. } if *to == "terminated")
    })
    .await;

    assert!(events
        .iter()
        .any(|e| matches!(e, CallEvent::HangupRequested)));
    // The apology is spoken, never a silent drop
    assert!(events
        .iter()
        .any(|e| matches!(e, CallEvent::OutboundAudio(_))));
    assert_eq!(h.orchestrator.state(), CallState::Terminated);
}

#[tokio::test]
async fn test_goodbye_response_ends_call() {
    let mut h = harness(
        Arc::new(FakeLlm {
            chunks: vec!["It was lovely chatting with you. Goodbye!"],
            delay_ms: 0,
        }),
        0,
        0,
        |_| {},
    );

    h.orchestrator.start_call().await.unwrap();
    h.orchestrator
        .handle_recognizer_event(final_transcript("I have to go now"))
        .await;

    let events = collect_until(&mut h.events, Duration::from_secs(3), |e| {
        matches!(e, CallEvent::StateChanged { to, .. } if *to == "terminated")
    })
    .await;

    assert!(events
        .iter()
        .any(|e| matches!(e, CallEvent::HangupRequested)));
    assert_eq!(h.orchestrator.state(), CallState::Terminated);
}

#[tokio::test]
async fn test_media_stop_disconnects_immediately() {
    let mut h = harness(
        Arc::new(FakeLlm {
            chunks: vec!["A response that will be cut short by the hangup. "],
            delay_ms: 50,
        }),
        50,
        0,
        |_| {},
    );

    h.orchestrator.start_call().await.unwrap();
    h.orchestrator
        .handle_recognizer_event(final_transcript("hello there"))
        .await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    h.orchestrator.handle_media_stop();
    assert_eq!(h.orchestrator.state(), CallState::Disconnected);

    // Drain everything up to the disconnect marker, then ensure silence
    collect_until(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, CallEvent::StateChanged { to, .. } if *to == "disconnected")
    })
    .await;
    let events = collect_until(&mut h.events, Duration::from_millis(300), |_| false).await;
    let trailing_audio = events
        .iter()
        .filter(|e| matches!(e, CallEvent::OutboundAudio(_)))
        .count();
    assert_eq!(trailing_audio, 0);
}
