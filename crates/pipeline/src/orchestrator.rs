//! Call orchestrator
//!
//! The per-call state machine driving the conversation: consumes recognizer
//! events, gates transcripts, streams the language model, segments the token
//! stream into synthesis fragments, and delivers transcoded narrowband audio
//! to the transport — while handling barge-in, repetition loops, early
//! cutoff, and hangup.
//!
//! One turn (language-model call plus its resulting playback) is in flight
//! per call at a time, enforced by the session's busy flags. Barge-in flips
//! the abort serial that every producer checks before each unit of work.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

use outdial_cache::AudioCache;
use outdial_config::{LlmConfig, OrchestratorConfig, ScriptsConfig};
use outdial_core::{
    AudioFrame, CallEvent, LanguageModel, StreamChunk, Transcoder, TranscriptResult,
};
use outdial_llm::{
    request_from_history, ConversationHistory, CutoffDecision, PatternCutoff, RepetitionDetector,
    ResponseClassifier,
};
use outdial_metrics::{ConversationCycle, CycleTracker};
use outdial_synth::{JobEvent, JobPriority, ReorderBuffer, SynthesisJob, SynthesisQueue};

use crate::gate::{GateContext, GateDecision, TranscriptGate};
use crate::session::CallSession;
use crate::state::CallState;
use crate::PipelineError;

/// Response markers that end the conversation
const HANGUP_MARKERS: &[&str] = &["goodbye", "have a great day", "take care now"];

/// Hard ceiling on one turn's synthesis drain, in case a provider wedges
const TURN_DEADLINE: Duration = Duration::from_secs(60);

/// Everything a call orchestrator needs injected.
///
/// Pools, cache, and tracker are process-wide shared services passed by
/// reference; the synthesis queue and its event stream are per-call.
pub struct OrchestratorDeps {
    pub llm: Arc<dyn LanguageModel>,
    pub queue: Arc<SynthesisQueue>,
    pub queue_events: mpsc::Receiver<JobEvent>,
    pub transcoder: Arc<dyn Transcoder>,
    pub cache: Arc<AudioCache>,
    pub tracker: Arc<CycleTracker>,
    pub voice_id: String,
}

/// Per-call conversation orchestrator
pub struct CallOrchestrator {
    config: OrchestratorConfig,
    scripts: ScriptsConfig,
    llm_config: LlmConfig,

    session: Mutex<CallSession>,
    history: Mutex<ConversationHistory>,
    cycle: Mutex<Option<ConversationCycle>>,

    llm: Arc<dyn LanguageModel>,
    queue: Arc<SynthesisQueue>,
    queue_events: tokio::sync::Mutex<mpsc::Receiver<JobEvent>>,
    transcoder: Arc<dyn Transcoder>,
    cache: Arc<AudioCache>,
    tracker: Arc<CycleTracker>,
    voice_id: String,

    cutoff: Arc<dyn ResponseClassifier>,
    repetition: RepetitionDetector,

    event_tx: broadcast::Sender<CallEvent>,
    /// Turns with serial <= this value are aborted
    abort_serial: AtomicU64,
    /// Outbound frame sequence counter
    out_seq: AtomicU64,
    /// Set once a hangup is committed; later turns never start
    hanging_up: AtomicBool,
}

impl CallOrchestrator {
    pub fn new(
        call_id: impl Into<String>,
        user_id: impl Into<String>,
        config: OrchestratorConfig,
        scripts: ScriptsConfig,
        llm_config: LlmConfig,
        deps: OrchestratorDeps,
    ) -> Arc<Self> {
        // Larger capacity so a slow transport reader doesn't lag the call
        let (event_tx, _) = broadcast::channel(1024);

        let cutoff: Arc<dyn ResponseClassifier> = Arc::new(PatternCutoff::new(
            config.cutoff_min_chars,
            config.cutoff_max_chars,
        ));
        let repetition = RepetitionDetector::new(config.repetition_threshold, 0.8);

        Arc::new(Self {
            session: Mutex::new(CallSession::new(call_id, user_id)),
            history: Mutex::new(ConversationHistory::new(config.repetition_window)),
            cycle: Mutex::new(None),
            config,
            scripts,
            llm_config,
            llm: deps.llm,
            queue: deps.queue,
            queue_events: tokio::sync::Mutex::new(deps.queue_events),
            transcoder: deps.transcoder,
            cache: deps.cache,
            tracker: deps.tracker,
            voice_id: deps.voice_id,
            cutoff,
            repetition,
            event_tx,
            abort_serial: AtomicU64::new(0),
            out_seq: AtomicU64::new(0),
            hanging_up: AtomicBool::new(false),
        })
    }

    /// Swap the early-cutoff policy (tests, experiments)
    pub fn with_cutoff(mut self: Arc<Self>, cutoff: Arc<dyn ResponseClassifier>) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_cutoff must be called before sharing the orchestrator")
            .cutoff = cutoff;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> CallState {
        self.session.lock().state
    }

    pub fn call_id(&self) -> String {
        self.session.lock().call_id.clone()
    }

    /// Start the call: play the scripted opening, then listen.
    pub async fn start_call(self: &Arc<Self>) -> Result<(), PipelineError> {
        self.set_state(CallState::Initializing);

        let opening = self.scripts.opening.clone();
        let serial = self.session.lock().begin_turn();
        self.speak_scripted(&opening, serial).await;

        self.set_state(CallState::Listening);
        Ok(())
    }

    /// Entry point for recognizer events, processed in arrival order.
    pub async fn handle_recognizer_event(self: &Arc<Self>, event: outdial_core::RecognizerEvent) {
        use outdial_core::RecognizerEvent::*;
        match event {
            SpeechStarted => self.on_speech_started(),
            Interim(t) => self.on_interim(t).await,
            Final(t) => self.on_final_transcript(t).await,
            UtteranceEnd => self.on_utterance_end().await,
            Disconnected { reason } => {
                tracing::error!(reason = %reason, "Recognition stream lost");
                self.tracker.record_error("recognition");
                self.fail_call().await;
            },
        }
    }

    /// The media stream stopped: cancel everything immediately.
    pub fn handle_media_stop(&self) {
        let serial = self.session.lock().turn_serial;
        self.abort_serial.store(serial, Ordering::SeqCst);
        self.queue.abort_turn(serial);
        if let Some(cycle) = self.cycle.lock().as_mut() {
            cycle.complete(true);
        }
        self.set_state(CallState::Disconnected);
        self.queue.shutdown();
    }

    fn on_speech_started(self: &Arc<Self>) {
        let now = Instant::now();
        let mut session = self.session.lock();

        if session.state.is_terminal() || session.in_cooldown(now) {
            return;
        }

        if session.agent_speaking {
            // Within the grace window this is our own echo, not the caller
            if session.in_grace_window(now, Duration::from_millis(self.config.barge_in_grace_ms)) {
                tracing::debug!(call_id = %session.call_id, "Speech start inside grace window, ignoring");
                return;
            }
            drop(session);
            self.barge_in();
            return;
        }

        if session.state == CallState::Listening {
            session.state = CallState::UserSpeaking;
            session.user_speaking = true;
            session.user_speech_started_at = Some(now);
            session.backchannel_sent = false;

            let cycle_id = session.next_cycle_id();
            let call_id = session.call_id.clone();
            drop(session);

            *self.cycle.lock() = Some(ConversationCycle::new(cycle_id));
            self.tracker.stage_start(&call_id, "user_turn");
            self.emit(CallEvent::StateChanged {
                from: CallState::Listening.as_str(),
                to: CallState::UserSpeaking.as_str(),
            });
        }
    }

    async fn on_interim(self: &Arc<Self>, transcript: TranscriptResult) {
        self.emit(CallEvent::PartialTranscript(transcript));
        self.maybe_backchannel().await;
    }

    /// Inject a short acknowledgment during a long user turn. The queue
    /// rejects it outright if any synthesis is in flight.
    async fn maybe_backchannel(self: &Arc<Self>) {
        if !self.config.backchannels_enabled {
            return;
        }

        let serial = {
            let mut session = self.session.lock();
            let long_enough = session
                .user_speech_started_at
                .map(|t| t.elapsed().as_millis() as u64 >= self.config.backchannel_after_ms)
                .unwrap_or(false);
            if !session.user_speaking || session.backchannel_sent || !long_enough {
                return;
            }
            session.backchannel_sent = true;
            session.turn_serial
        };

        let phrase = self
            .scripts
            .backchannels
            .first()
            .cloned()
            .unwrap_or_else(|| "Mm-hmm.".to_string());

        // Hold the event stream across the enqueue so the completion can't
        // race a turn that starts right after
        let mut events = self.queue_events.lock().await;
        if self
            .queue
            .enqueue(phrase, JobPriority::Backchannel, 0, false, serial)
            .is_err()
        {
            tracing::debug!("Backchannel suppressed by queue");
            return;
        }

        let orchestrator = Arc::clone(self);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(JobEvent::Completed(job))
                        if job.priority == JobPriority::Backchannel =>
                    {
                        if let Some(audio) = job.audio {
                            drop(events);
                            orchestrator
                                .play_audio(serial, audio, job.from_cache, &job.text)
                                .await;
                        }
                        return;
                    },
                    // Stale completions from aborted turns are dropped here
                    Some(_) => continue,
                    None => return,
                },
                _ = tokio::time::sleep_until(deadline) => return,
            }
        }
    }

    fn on_final_transcript<'a>(
        self: &'a Arc<Self>,
        transcript: TranscriptResult,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        let now = Instant::now();
        let decision = {
            let session = self.session.lock();
            if session.state.is_terminal() {
                return;
            }
            let gate = TranscriptGate::new(self.config.clone());
            gate.evaluate(
                &transcript.text,
                now,
                &GateContext {
                    last_accepted: session.last_accepted.clone(),
                    last_user_input_at: session.last_user_input_at,
                    busy: session.is_busy(),
                },
            )
        };

        match decision {
            GateDecision::Accept => {
                // Claim the turn before yielding so a racing transcript sees
                // the system busy
                self.session.lock().llm_inflight = true;
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move {
                    orchestrator.run_turn(transcript).await;
                });
            },
            GateDecision::Duplicate | GateDecision::TooShort => {
                tracing::debug!(
                    text = %transcript.text,
                    decision = ?decision,
                    "Transcript dropped"
                );
            },
            GateDecision::TooSoon | GateDecision::Busy => {
                tracing::debug!(
                    text = %transcript.text,
                    decision = ?decision,
                    "Transcript queued for retry"
                );
                self.session.lock().pending_inputs.push_back(transcript);
            },
        }
        })
    }

    async fn on_utterance_end(self: &Arc<Self>) {
        {
            let mut session = self.session.lock();
            session.user_speaking = false;
            session.user_speech_started_at = None;
            if session.state == CallState::UserSpeaking {
                session.state = CallState::Listening;
            }
        }
        if let Some(cycle) = self.cycle.lock().as_mut() {
            cycle.mark_speech_end();
        }
        self.drain_pending().await;
    }

    /// Retry queued inputs once the system goes idle
    async fn drain_pending(self: &Arc<Self>) {
        let next = {
            let mut session = self.session.lock();
            if session.is_busy() || session.state.is_terminal() {
                return;
            }
            session.pending_inputs.pop_front()
        };

        if let Some(transcript) = next {
            self.on_final_transcript(transcript).await;
        }
    }

    /// Barge-in: flush outbound audio, abort the in-flight turn, cool down.
    fn barge_in(self: &Arc<Self>) {
        let (serial, elapsed_ms, call_id) = {
            let mut session = self.session.lock();
            let serial = session.turn_serial;
            let elapsed = session
                .utterance_started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0);
            session.agent_speaking = false;
            session.llm_inflight = false;
            session.state = CallState::BargeInDetected;
            session.start_cooldown(Duration::from_millis(self.config.barge_in_cooldown_ms));
            (serial, elapsed, session.call_id.clone())
        };

        self.abort_serial.store(serial, Ordering::SeqCst);
        self.queue.abort_turn(serial);

        if let Some(cycle) = self.cycle.lock().as_mut() {
            cycle.complete(true);
        }

        tracing::info!(call_id = %call_id, elapsed_ms, "Barge-in: yielding the turn");
        self.emit(CallEvent::FlushPlayback);
        self.emit(CallEvent::BargeIn { elapsed_ms });

        self.session.lock().state = CallState::Listening;
        self.emit(CallEvent::StateChanged {
            from: CallState::BargeInDetected.as_str(),
            to: CallState::Listening.as_str(),
        });
    }

    fn is_aborted(&self, serial: u64) -> bool {
        self.abort_serial.load(Ordering::SeqCst) >= serial
    }

    /// One full turn: transcript → LLM stream → segmentation → synthesis →
    /// transcoding → outbound frames.
    async fn run_turn(self: Arc<Self>, transcript: TranscriptResult) {
        if self.hanging_up.load(Ordering::SeqCst) {
            return;
        }

        let now = Instant::now();
        let (serial, call_id) = {
            let mut session = self.session.lock();
            session.last_accepted = Some((transcript.text.clone(), now));
            session.last_user_input_at = Some(now);
            session.llm_inflight = true;
            session.state = CallState::LlmProcessing;
            (session.begin_turn(), session.call_id.clone())
        };

        if let Some(cycle) = self.cycle.lock().as_mut() {
            cycle.mark_recognition_complete(&transcript.text);
        }
        self.tracker.stage_complete(&call_id, "user_turn");
        self.emit(CallEvent::FinalTranscript(transcript.clone()));
        self.emit(CallEvent::StateChanged {
            from: CallState::Listening.as_str(),
            to: CallState::LlmProcessing.as_str(),
        });

        self.history.lock().push_user(&transcript.text);

        let request = request_from_history(&self.llm_config, self.history.lock().turns());

        let (chunk_tx, chunk_rx) = mpsc::channel::<StreamChunk>(64);
        let llm = self.llm.clone();
        self.tracker.stage_start(&call_id, "llm");
        let llm_task =
            tokio::spawn(async move { llm.generate_stream(request, chunk_tx).await });

        let outcome = self
            .consume_and_play(serial, &call_id, chunk_rx)
            .await;

        // The generation task ends on its own once the receiver is gone
        let llm_result = llm_task.await;
        self.tracker.stage_complete(&call_id, "llm");

        let llm_failed = matches!(&llm_result, Ok(Err(_)) | Err(_));
        if llm_failed {
            if let Ok(Err(e)) = &llm_result {
                tracing::error!(call_id = %call_id, error = %e, "Language model failed");
            }
            self.tracker.record_error("llm");
            self.session.lock().llm_inflight = false;
            self.fail_call().await;
            return;
        }

        let TurnOutcome {
            response_text,
            aborted,
        } = outcome;

        {
            let mut session = self.session.lock();
            session.llm_inflight = false;
            session.agent_speaking = false;
        }

        let mut cycle_latency = None;
        if let Some(cycle) = self.cycle.lock().as_mut() {
            cycle.mark_llm_complete();
            cycle.complete(aborted);
            cycle_latency = cycle.response_latency_ms();
        }
        if let Some(latency) = cycle_latency {
            self.tracker.observe_call_latency(&call_id, latency);
        }

        if aborted {
            // Barge-in already drove the state back to Listening
            return;
        }

        if !response_text.is_empty() {
            self.history.lock().push_agent(&response_text);
        }
        self.emit(CallEvent::Response {
            text: response_text.clone(),
            is_final: true,
        });

        let wants_hangup = {
            let lower = response_text.to_lowercase();
            HANGUP_MARKERS.iter().any(|marker| lower.contains(marker))
        };

        if wants_hangup {
            self.hangup().await;
            return;
        }

        self.set_state(CallState::Listening);
        self.drain_pending().await;
    }

    /// Stream tokens, segment, synthesize, and play — all cancellable on the
    /// turn's abort serial.
    async fn consume_and_play(
        self: &Arc<Self>,
        mut serial: u64,
        call_id: &str,
        mut chunk_rx: mpsc::Receiver<StreamChunk>,
    ) -> TurnOutcome {
        let mut segmenter = crate::segmenter::SentenceSegmenter::default();
        let mut reorder = ReorderBuffer::new();
        let mut events = self.queue_events.lock().await;

        let mut accumulated = String::new();
        let mut next_seq: u32 = 0;
        let mut total: Option<u32> = None;
        let mut first_token_seen = false;
        let mut cut = false;
        let mut apology_sent = false;
        let deadline = tokio::time::Instant::now() + TURN_DEADLINE;

        loop {
            if self.is_aborted(serial) {
                return TurnOutcome {
                    response_text: accumulated,
                    aborted: true,
                };
            }

            let all_delivered = total
                .map(|t| reorder.next_expected() >= t && reorder.pending() == 0)
                .unwrap_or(false);
            if all_delivered {
                break;
            }

            tokio::select! {
                maybe_chunk = chunk_rx.recv(), if total.is_none() => {
                    match maybe_chunk {
                        Some(chunk) => {
                            if !first_token_seen {
                                first_token_seen = true;
                                if let Some(cycle) = self.cycle.lock().as_mut() {
                                    cycle.mark_llm_first_token();
                                }
                            }
                            accumulated.push_str(&chunk.delta);
                            self.emit(CallEvent::Response {
                                text: accumulated.clone(),
                                is_final: false,
                            });

                            for fragment in segmenter.push(&chunk.delta) {
                                self.enqueue_fragment(&fragment, next_seq, serial);
                                next_seq += 1;

                                if !cut {
                                    if let CutoffDecision::Cutoff { reason } =
                                        self.cutoff.evaluate(&accumulated, &fragment)
                                    {
                                        tracing::debug!(call_id = %call_id, reason, "Early cutoff");
                                        cut = true;
                                        chunk_rx.close();
                                    }
                                }
                            }
                            if cut {
                                // Stop consuming; anything buffered stays unspoken
                                segmenter.reset();
                                total = Some(next_seq);
                            }
                        },
                        None => {
                            if let Some(rest) = segmenter.flush() {
                                self.enqueue_fragment(&rest, next_seq, serial);
                                next_seq += 1;
                            }
                            total = Some(next_seq);

                            // A full response that loops the conversation is
                            // replaced wholesale by the disengagement script
                            if self.check_repetition(&accumulated, serial, &mut reorder) {
                                serial = self.session.lock().begin_turn();
                                accumulated = self.scripts.disengagement.clone();
                                next_seq = 0;
                                self.enqueue_fragment(&accumulated, next_seq, serial);
                                next_seq += 1;
                                total = Some(next_seq);
                            }
                        },
                    }
                },

                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(JobEvent::Completed(job)) => {
                            if job.turn_serial != serial {
                                continue;
                            }
                            if let Some(cycle) = self.cycle.lock().as_mut() {
                                cycle.mark_synthesis_first_audio();
                            }
                            for ready in reorder.push(job) {
                                self.deliver_job(serial, ready).await;
                            }
                        },
                        Some(JobEvent::Failed(job)) => {
                            if job.turn_serial != serial {
                                continue;
                            }
                            tracing::warn!(
                                call_id = %call_id,
                                seq = job.sequence_index,
                                "Fragment synthesis exhausted, substituting apology"
                            );
                            self.tracker.record_error("synthesis");
                            for ready in reorder.skip(job.sequence_index) {
                                self.deliver_job(serial, ready).await;
                            }
                            if !apology_sent {
                                apology_sent = true;
                                let apology = self.scripts.apology.clone();
                                self.enqueue_fragment(&apology, next_seq, serial);
                                if let Some(t) = total {
                                    total = Some(t.max(next_seq) + 1);
                                }
                                next_seq += 1;
                            }
                        },
                        None => break,
                    }
                },

                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(call_id = %call_id, "Turn deadline exceeded, abandoning playback");
                    self.queue.abort_turn(serial);
                    break;
                },
            }
        }

        TurnOutcome {
            response_text: accumulated,
            aborted: self.is_aborted(serial),
        }
    }

    /// Returns true when the accumulated response would repeat the recent
    /// exchanges; aborts its fragments so the disengagement line replaces them.
    fn check_repetition(
        &self,
        response: &str,
        serial: u64,
        reorder: &mut ReorderBuffer,
    ) -> bool {
        let recent = self.history.lock().recent_agent_utterances().to_vec();
        if !self.repetition.is_repetitive(response, &recent) {
            return false;
        }
        tracing::info!("Repetitive response detected, disengaging");
        // Note: serial stays live; only this turn's queued fragments go
        self.queue.abort_turn(serial);
        reorder.reset();
        true
    }

    fn enqueue_fragment(&self, text: &str, seq: u32, serial: u64) {
        let is_first = seq == 0;
        let priority = JobPriority::for_fragment(
            seq,
            is_first,
            outdial_config::constants::synthesis::EARLY_FRAGMENT_INDEX,
        );

        if is_first {
            let mut session = self.session.lock();
            session.agent_speaking = true;
            session.llm_inflight = false;
            session.utterance_started_at = Some(Instant::now());
            session.state = CallState::AgentSpeaking;
            drop(session);
            self.emit(CallEvent::StateChanged {
                from: CallState::LlmProcessing.as_str(),
                to: CallState::AgentSpeaking.as_str(),
            });
        }

        if let Err(e) = self.queue.enqueue(text, priority, seq, is_first, serial) {
            tracing::warn!(error = %e, "Fragment enqueue rejected");
        }
    }

    /// Transcode (when needed), cache, and emit one job's audio.
    async fn deliver_job(self: &Arc<Self>, serial: u64, job: SynthesisJob) {
        if self.is_aborted(serial) {
            return;
        }

        if job.from_cache {
            self.tracker.record_cache_hit();
        } else {
            self.tracker.record_cache_miss();
        }

        let Some(audio) = job.audio else { return };
        self.play_audio(serial, audio, job.from_cache, &job.text).await;
    }

    async fn play_audio(self: &Arc<Self>, serial: u64, audio: Vec<u8>, from_cache: bool, text: &str) {
        let playback = if from_cache {
            audio
        } else {
            let call_id = self.call_id();
            self.tracker.stage_start(&call_id, "transcode");
            match self.transcoder.to_narrowband(&audio).await {
                Ok(playback) => {
                    self.tracker.stage_complete(&call_id, "transcode");
                    self.cache
                        .put(text, &self.voice_id, audio, playback.clone());
                    playback
                },
                Err(e) => {
                    tracing::error!(error = %e, "Transcoding failed, dropping fragment");
                    self.tracker.record_error("transcode");
                    return;
                },
            }
        };

        let frame_count =
            (playback.len() + self.config.frame_bytes - 1) / self.config.frame_bytes;
        let base_seq = self.out_seq.fetch_add(frame_count as u64, Ordering::SeqCst);

        let frame = AudioFrame::new(playback, base_seq);
        for chunk in frame.split(self.config.frame_bytes) {
            if self.is_aborted(serial) {
                return;
            }
            if let Some(cycle) = self.cycle.lock().as_mut() {
                cycle.mark_audio_sent();
            }
            self.emit(CallEvent::OutboundAudio(chunk));
        }
    }

    /// Speak a script outside the normal turn flow (opening, goodbye, apology)
    async fn speak_scripted(self: &Arc<Self>, text: &str, serial: u64) {
        {
            let mut session = self.session.lock();
            session.agent_speaking = true;
            session.utterance_started_at = Some(Instant::now());
        }

        // Lock the event stream before enqueueing so the completion can't be
        // consumed by anyone else
        let mut events = self.queue_events.lock().await;

        if self
            .queue
            .enqueue(text, JobPriority::FirstFragment, 0, true, serial)
            .is_err()
        {
            drop(events);
            self.session.lock().agent_speaking = false;
            return;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            if self.is_aborted(serial) {
                break;
            }
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(JobEvent::Completed(job)) if job.turn_serial == serial => {
                        drop(events);
                        if let Some(audio) = job.audio {
                            self.play_audio(serial, audio, job.from_cache, &job.text).await;
                        }
                        break;
                    },
                    Some(JobEvent::Failed(job)) if job.turn_serial == serial => {
                        tracing::warn!("Scripted utterance synthesis failed");
                        break;
                    },
                    Some(_) => continue,
                    None => break,
                },
                // Re-check the abort serial so a barge-in during the script
                // releases the event stream promptly
                _ = tokio::time::sleep(Duration::from_millis(100)) => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("Scripted utterance timed out");
                    break;
                },
            }
        }

        self.session.lock().agent_speaking = false;
    }

    /// Graceful end: goodbye script, then terminated.
    async fn hangup(self: &Arc<Self>) {
        if self.hanging_up.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(CallState::HangingUp);
        self.emit(CallEvent::HangupRequested);

        let goodbye = self.scripts.goodbye.clone();
        let serial = self.session.lock().begin_turn();
        self.speak_scripted(&goodbye, serial).await;

        self.set_state(CallState::Terminated);
        self.queue.shutdown();
    }

    /// Unrecoverable failure: short spoken apology, then a clean hangup.
    /// Never a silent drop.
    async fn fail_call(self: &Arc<Self>) {
        if self.hanging_up.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(CallState::HangingUp);
        self.emit(CallEvent::HangupRequested);

        let apology = self.scripts.apology.clone();
        let serial = self.session.lock().begin_turn();
        self.speak_scripted(&apology, serial).await;

        self.set_state(CallState::Terminated);
        self.queue.shutdown();
    }

    fn set_state(&self, to: CallState) {
        let from = {
            let mut session = self.session.lock();
            let from = session.state;
            session.state = to;
            from
        };
        if from != to {
            tracing::debug!(from = %from, to = %to, "Call state transition");
            self.emit(CallEvent::StateChanged {
                from: from.as_str(),
                to: to.as_str(),
            });
        }
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.event_tx.send(event);
    }
}

struct TurnOutcome {
    response_text: String,
    aborted: bool,
}
