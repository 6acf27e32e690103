//! Priority synthesis queue
//!
//! Accepts text fragments as the orchestrator segments them, synthesizes up
//! to `max_concurrent` jobs in parallel (possibly out of arrival order),
//! and emits completion events. Each job checks the audio cache first, then
//! tries providers in the configured fallback order, retrying with a
//! priority demotion. Consumers reassemble playback order with
//! [`crate::ReorderBuffer`].

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use uuid::Uuid;

use outdial_cache::AudioCache;
use outdial_config::SynthesisConfig;
use outdial_core::SpeechSynthesizer;

use crate::job::{JobPriority, JobStatus, SynthesisJob};
use crate::SynthError;

/// Completion events emitted to the queue consumer
#[derive(Debug)]
pub enum JobEvent {
    Completed(SynthesisJob),
    Failed(SynthesisJob),
}

struct PendingEntry {
    job: SynthesisJob,
    /// FIFO tiebreak within a priority tier
    arrival: u64,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.job.priority == other.job.priority && self.arrival == other.arrival
    }
}
impl Eq for PendingEntry {}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the highest tier (lowest enum
        // value) and earliest arrival pop first.
        other
            .job
            .priority
            .cmp(&self.job.priority)
            .then(other.arrival.cmp(&self.arrival))
    }
}
impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<PendingEntry>,
    arrivals: u64,
}

/// Per-call synthesis queue.
///
/// Providers and the audio cache are shared across calls; the queue itself
/// and its event stream belong to one call so barge-in aborts stay local.
pub struct SynthesisQueue {
    config: SynthesisConfig,
    providers: Vec<Arc<dyn SpeechSynthesizer>>,
    cache: Option<Arc<AudioCache>>,
    voice_id: String,
    state: Mutex<QueueState>,
    semaphore: Arc<Semaphore>,
    work_available: Arc<tokio::sync::Notify>,
    events_tx: mpsc::Sender<JobEvent>,
    aborted_turns: Mutex<HashSet<u64>>,
    active: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
}

impl SynthesisQueue {
    /// Build the queue and start its dispatcher. Returns the queue and the
    /// completion-event receiver.
    pub fn start(
        config: SynthesisConfig,
        providers: Vec<Arc<dyn SpeechSynthesizer>>,
        cache: Option<Arc<AudioCache>>,
        voice_id: impl Into<String>,
    ) -> (Arc<Self>, mpsc::Receiver<JobEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let queue = Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            providers,
            cache,
            voice_id: voice_id.into(),
            state: Mutex::new(QueueState::default()),
            work_available: Arc::new(tokio::sync::Notify::new()),
            events_tx,
            aborted_turns: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            shutdown_tx,
        });

        queue.spawn_dispatcher(shutdown_rx);
        (queue, events_rx)
    }

    /// Enqueue a fragment for synthesis.
    ///
    /// Backchannel jobs are rejected outright while any other job is active
    /// or queued — a late acknowledgment colliding with the main response is
    /// worse than no acknowledgment.
    pub fn enqueue(
        &self,
        text: impl Into<String>,
        priority: JobPriority,
        sequence_index: u32,
        is_first: bool,
        turn_serial: u64,
    ) -> Result<Uuid, SynthError> {
        let text = text.into();

        if priority == JobPriority::Backchannel && self.has_work() {
            tracing::debug!("Backchannel rejected: synthesis in flight");
            return Err(SynthError::BackchannelRejected);
        }

        let job = SynthesisJob::new(text, priority, sequence_index, is_first, turn_serial);
        let id = job.id;

        {
            let mut state = self.state.lock();
            let arrival = state.arrivals;
            state.arrivals += 1;
            state.pending.push(PendingEntry { job, arrival });
        }
        self.work_available.notify_one();
        Ok(id)
    }

    /// Discard queued jobs for an aborted turn and mark the serial so
    /// in-flight completions are dropped instead of delivered.
    pub fn abort_turn(&self, turn_serial: u64) {
        self.aborted_turns.lock().insert(turn_serial);

        let mut state = self.state.lock();
        let kept: Vec<PendingEntry> = state
            .pending
            .drain()
            .filter(|entry| entry.job.turn_serial != turn_serial)
            .collect();
        for entry in kept {
            state.pending.push(entry);
        }
        tracing::debug!(turn_serial, "Aborted turn: queued jobs discarded");
    }

    /// Jobs active or queued
    pub fn has_work(&self) -> bool {
        self.active.load(AtomicOrdering::SeqCst) > 0 || !self.state.lock().pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Stop the dispatcher. In-flight jobs finish; nothing new starts.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn spawn_dispatcher(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    permit = queue.semaphore.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                    _ = shutdown_rx.changed() => break,
                };

                let job = loop {
                    if let Some(job) = queue.pop_pending() {
                        break Some(job);
                    }
                    tokio::select! {
                        _ = queue.work_available.notified() => continue,
                        _ = shutdown_rx.changed() => break None,
                    }
                };
                let Some(job) = job else { break };

                let worker_queue = Arc::clone(&queue);
                queue.active.fetch_add(1, AtomicOrdering::SeqCst);
                tokio::spawn(async move {
                    worker_queue.run_job(job).await;
                    worker_queue.active.fetch_sub(1, AtomicOrdering::SeqCst);
                    drop(permit);
                });
            }
            tracing::debug!("Synthesis dispatcher exiting");
        });
    }

    fn pop_pending(&self) -> Option<SynthesisJob> {
        loop {
            let entry = self.state.lock().pending.pop()?;
            if self.is_aborted(entry.job.turn_serial) {
                continue;
            }
            return Some(entry.job);
        }
    }

    fn is_aborted(&self, turn_serial: u64) -> bool {
        self.aborted_turns.lock().contains(&turn_serial)
    }

    async fn run_job(&self, mut job: SynthesisJob) {
        if self.is_aborted(job.turn_serial) {
            return;
        }

        job.status = JobStatus::Processing;
        job.started_at = Some(std::time::Instant::now());

        // Cache first: a hit skips synthesis and transcoding entirely
        if let Some(cache) = &self.cache {
            if let Some((entry, hit)) = cache.get(&job.text, &self.voice_id) {
                tracing::debug!(job = %job.id, hit = ?hit, "Synthesis served from cache");
                job.audio = Some(entry.playback_audio);
                job.from_cache = true;
                job.status = JobStatus::Completed;
                job.completed_at = Some(std::time::Instant::now());
                self.emit(JobEvent::Completed(job)).await;
                return;
            }
        }

        let max_attempts = self.config.max_retries as usize + 1;
        for attempt in 0..max_attempts {
            if self.is_aborted(job.turn_serial) {
                tracing::debug!(job = %job.id, "Job abandoned mid-flight (turn aborted)");
                return;
            }

            let provider = &self.providers[attempt % self.providers.len()];
            match provider.synthesize(&job.text, &self.voice_id).await {
                Ok(audio) => {
                    job.provider = Some(provider.name().to_string());
                    job.audio = Some(audio);
                    job.status = JobStatus::Completed;
                    job.completed_at = Some(std::time::Instant::now());

                    if self.is_aborted(job.turn_serial) {
                        return;
                    }
                    self.emit(JobEvent::Completed(job)).await;
                    return;
                },
                Err(e) => {
                    tracing::warn!(
                        job = %job.id,
                        provider = provider.name(),
                        attempt,
                        error = %e,
                        "Synthesis attempt failed"
                    );
                    job.retries += 1;
                    job.priority = job.priority.demoted();

                    if attempt + 1 < max_attempts {
                        // Jittered pause before the fallback provider
                        let jitter = rand::random::<u64>() % 50;
                        tokio::time::sleep(Duration::from_millis(25 + jitter)).await;
                    }
                },
            }
        }

        job.status = JobStatus::Failed;
        job.completed_at = Some(std::time::Instant::now());
        if !self.is_aborted(job.turn_serial) {
            self.emit(JobEvent::Failed(job)).await;
        }
    }

    async fn emit(&self, event: JobEvent) {
        if self.events_tx.send(event).await.is_err() {
            tracing::debug!("Synthesis event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct FakeSynth {
        name: &'static str,
        fail: bool,
        calls: AtomicU32,
        delay_ms: u64,
    }

    impl FakeSynth {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: false,
                calls: AtomicU32::new(0),
                delay_ms: 0,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: true,
                calls: AtomicU32::new(0),
                delay_ms: 0,
            })
        }

        fn slow(name: &'static str, delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: false,
                calls: AtomicU32::new(0),
                delay_ms,
            })
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        fn name(&self) -> &str {
            self.name
        }

        async fn synthesize(&self, text: &str, _voice_id: &str) -> outdial_core::Result<Vec<u8>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                Err(outdial_core::Error::Synthesis("provider down".into()))
            } else {
                Ok(text.as_bytes().to_vec())
            }
        }
    }

    fn config() -> SynthesisConfig {
        SynthesisConfig {
            providers: Vec::new(),
            max_concurrent: 3,
            max_retries: 2,
        }
    }

    #[tokio::test]
    async fn test_job_completes_with_audio() {
        let (queue, mut events) =
            SynthesisQueue::start(config(), vec![FakeSynth::ok("a")], None, "voice");

        queue
            .enqueue("hello there", JobPriority::FirstFragment, 0, true, 1)
            .unwrap();

        let event = events.recv().await.unwrap();
        match event {
            JobEvent::Completed(job) => {
                assert_eq!(job.audio.as_deref(), Some("hello there".as_bytes()));
                assert_eq!(job.provider.as_deref(), Some("a"));
                assert!(!job.from_cache);
            },
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fallback_to_second_provider() {
        let primary = FakeSynth::failing("primary");
        let fallback = FakeSynth::ok("fallback");
        let (queue, mut events) = SynthesisQueue::start(
            config(),
            vec![primary.clone(), fallback.clone()],
            None,
            "voice",
        );

        queue
            .enqueue("try me", JobPriority::Normal, 0, false, 1)
            .unwrap();

        let event = events.recv().await.unwrap();
        match event {
            JobEvent::Completed(job) => {
                assert_eq!(job.provider.as_deref(), Some("fallback"));
                assert_eq!(job.retries, 1);
            },
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(primary.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_emits_failed() {
        let (queue, mut events) =
            SynthesisQueue::start(config(), vec![FakeSynth::failing("only")], None, "voice");

        queue
            .enqueue("doomed", JobPriority::Normal, 0, false, 1)
            .unwrap();

        let event = events.recv().await.unwrap();
        match event {
            JobEvent::Failed(job) => {
                assert_eq!(job.status, JobStatus::Failed);
                assert_eq!(job.retries, 3); // max_retries + 1 attempts
                assert_eq!(job.priority, JobPriority::Late); // demoted to the floor
            },
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backchannel_rejected_while_busy() {
        let (queue, mut events) =
            SynthesisQueue::start(config(), vec![FakeSynth::slow("slow", 100)], None, "voice");

        queue
            .enqueue("main response fragment", JobPriority::Normal, 0, false, 1)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = queue.enqueue("mm-hmm", JobPriority::Backchannel, 0, false, 1);
        assert!(matches!(result, Err(SynthError::BackchannelRejected)));

        // Main job still completes
        assert!(matches!(events.recv().await, Some(JobEvent::Completed(_))));
    }

    #[tokio::test]
    async fn test_backchannel_accepted_when_idle() {
        let (queue, mut events) =
            SynthesisQueue::start(config(), vec![FakeSynth::ok("a")], None, "voice");

        queue
            .enqueue("mm-hmm", JobPriority::Backchannel, 0, false, 1)
            .unwrap();
        assert!(matches!(events.recv().await, Some(JobEvent::Completed(_))));
    }

    #[tokio::test]
    async fn test_abort_turn_discards_queued_jobs() {
        // One slow worker occupies the only slot so later jobs stay queued
        let cfg = SynthesisConfig {
            max_concurrent: 1,
            ..config()
        };
        let (queue, mut events) =
            SynthesisQueue::start(cfg, vec![FakeSynth::slow("slow", 80)], None, "voice");

        queue.enqueue("first", JobPriority::Normal, 0, true, 7).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue("second", JobPriority::Normal, 1, false, 7).unwrap();
        queue.enqueue("third", JobPriority::Normal, 2, false, 7).unwrap();

        queue.abort_turn(7);
        assert_eq!(queue.pending_count(), 0);

        // The in-flight job's completion is swallowed too
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let cache = Arc::new(AudioCache::new(outdial_config::CacheConfig::default()));
        cache.put(
            "welcome to the service today",
            "voice",
            vec![1, 2, 3],
            vec![9, 9, 9],
        );

        let provider = FakeSynth::ok("a");
        let (queue, mut events) = SynthesisQueue::start(
            config(),
            vec![provider.clone()],
            Some(cache),
            "voice",
        );

        queue
            .enqueue(
                "welcome to the service today",
                JobPriority::FirstFragment,
                0,
                true,
                1,
            )
            .unwrap();

        match events.recv().await.unwrap() {
            JobEvent::Completed(job) => {
                assert!(job.from_cache);
                assert_eq!(job.audio.as_deref(), Some(&[9u8, 9, 9][..]));
            },
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_priority_orders_pending_work() {
        // Single slot busy; both queued jobs race for the next slot
        let cfg = SynthesisConfig {
            max_concurrent: 1,
            ..config()
        };
        let (queue, mut events) =
            SynthesisQueue::start(cfg, vec![FakeSynth::slow("slow", 40)], None, "voice");

        queue.enqueue("occupier", JobPriority::Normal, 9, false, 1).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue("late fragment", JobPriority::Late, 10, false, 1).unwrap();
        queue.enqueue("first fragment", JobPriority::FirstFragment, 0, true, 1).unwrap();

        // occupier completes, then the first fragment must beat the late one
        let mut order = Vec::new();
        for _ in 0..3 {
            if let Some(JobEvent::Completed(job)) = events.recv().await {
                order.push(job.text);
            }
        }
        assert_eq!(order[0], "occupier");
        assert_eq!(order[1], "first fragment");
        assert_eq!(order[2], "late fragment");
    }
}
