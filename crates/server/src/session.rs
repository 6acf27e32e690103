//! Active call registry
//!
//! Tracks the orchestrator for every live call, enforces the per-process
//! call capacity, and cleans up calls that went quiet without a proper
//! stop message.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use outdial_pipeline::CallOrchestrator;

use crate::ServerError;

/// One live call
pub struct ActiveCall {
    pub call_id: String,
    pub orchestrator: Arc<CallOrchestrator>,
    pub created_at: Instant,
    last_activity: RwLock<Instant>,
}

impl ActiveCall {
    pub fn new(call_id: impl Into<String>, orchestrator: Arc<CallOrchestrator>) -> Self {
        Self {
            call_id: call_id.into(),
            orchestrator,
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }
}

impl std::fmt::Debug for ActiveCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCall")
            .field("call_id", &self.call_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Registry of live calls
pub struct CallRegistry {
    calls: RwLock<HashMap<String, Arc<ActiveCall>>>,
    max_calls: usize,
    call_timeout: Duration,
    cleanup_interval: Duration,
}

impl CallRegistry {
    pub fn new(max_calls: usize) -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            max_calls,
            call_timeout: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(300),
        }
    }

    /// Register a call; fails when the process is at capacity.
    pub fn insert(
        &self,
        call_id: impl Into<String>,
        orchestrator: Arc<CallOrchestrator>,
    ) -> Result<Arc<ActiveCall>, ServerError> {
        let call_id = call_id.into();
        let mut calls = self.calls.write();

        if calls.len() >= self.max_calls {
            self.cleanup_expired_internal(&mut calls);
            if calls.len() >= self.max_calls {
                return Err(ServerError::Capacity(self.max_calls));
            }
        }

        let call = Arc::new(ActiveCall::new(call_id.clone(), orchestrator));
        calls.insert(call_id.clone(), call.clone());
        tracing::info!(call_id = %call_id, active = calls.len(), "Registered call");
        Ok(call)
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<ActiveCall>> {
        self.calls.read().get(call_id).cloned()
    }

    pub fn remove(&self, call_id: &str) {
        if self.calls.write().remove(call_id).is_some() {
            tracing::info!(call_id = %call_id, "Removed call");
        }
    }

    pub fn count(&self) -> usize {
        self.calls.read().len()
    }

    /// Start the periodic cleanup task. Returns a shutdown sender.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        let interval = registry.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let before = registry.count();
                        registry.cleanup_expired();
                        let after = registry.count();
                        if before != after {
                            tracing::info!(
                                removed = before - after,
                                remaining = after,
                                "Call cleanup removed stale calls"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Call cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    pub fn cleanup_expired(&self) {
        let mut calls = self.calls.write();
        self.cleanup_expired_internal(&mut calls);
    }

    fn cleanup_expired_internal(&self, calls: &mut HashMap<String, Arc<ActiveCall>>) {
        let timeout = self.call_timeout;
        let expired: Vec<String> = calls
            .iter()
            .filter(|(_, call)| call.is_expired(timeout))
            .map(|(id, _)| id.clone())
            .collect();

        for call_id in expired {
            if let Some(call) = calls.remove(&call_id) {
                call.orchestrator.handle_media_stop();
                tracing::info!(call_id = %call_id, "Expired call");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outdial_cache::AudioCache;
    use outdial_config::{
        CacheConfig, LatencyConfig, LlmConfig, OrchestratorConfig, ScriptsConfig, SynthesisConfig,
    };
    use outdial_metrics::CycleTracker;
    use outdial_pipeline::OrchestratorDeps;
    use outdial_synth::SynthesisQueue;

    struct NullLlm;

    #[async_trait::async_trait]
    impl outdial_core::LanguageModel for NullLlm {
        async fn generate_stream(
            &self,
            _request: outdial_core::GenerateRequest,
            _tx: tokio::sync::mpsc::Sender<outdial_core::StreamChunk>,
        ) -> outdial_core::Result<outdial_core::GenerateResponse> {
            Ok(outdial_core::GenerateResponse {
                text: String::new(),
                finish_reason: outdial_core::FinishReason::Stop,
                usage: outdial_core::TokenUsage::default(),
            })
        }
    }

    struct NullSynth;

    #[async_trait::async_trait]
    impl outdial_core::SpeechSynthesizer for NullSynth {
        fn name(&self) -> &str {
            "null"
        }
        async fn synthesize(&self, text: &str, _voice: &str) -> outdial_core::Result<Vec<u8>> {
            Ok(text.as_bytes().to_vec())
        }
    }

    struct NullTranscoder;

    #[async_trait::async_trait]
    impl outdial_core::Transcoder for NullTranscoder {
        async fn to_narrowband(&self, encoded: &[u8]) -> outdial_core::Result<Vec<u8>> {
            Ok(encoded.to_vec())
        }
    }

    fn orchestrator(call_id: &str) -> Arc<CallOrchestrator> {
        let (queue, queue_events) = SynthesisQueue::start(
            SynthesisConfig {
                providers: Vec::new(),
                max_concurrent: 1,
                max_retries: 0,
            },
            vec![Arc::new(NullSynth)],
            None,
            "v",
        );
        CallOrchestrator::new(
            call_id,
            "user",
            OrchestratorConfig::default(),
            ScriptsConfig::default(),
            LlmConfig::default(),
            OrchestratorDeps {
                llm: Arc::new(NullLlm),
                queue,
                queue_events,
                transcoder: Arc::new(NullTranscoder),
                cache: Arc::new(AudioCache::new(CacheConfig::default())),
                tracker: Arc::new(CycleTracker::new(LatencyConfig::default())),
                voice_id: "v".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = CallRegistry::new(4);
        registry.insert("c1", orchestrator("c1")).unwrap();

        assert!(registry.get("c1").is_some());
        assert_eq!(registry.count(), 1);

        registry.remove("c1");
        assert!(registry.get("c1").is_none());
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let registry = CallRegistry::new(1);
        registry.insert("c1", orchestrator("c1")).unwrap();

        let err = registry.insert("c2", orchestrator("c2")).unwrap_err();
        assert!(matches!(err, ServerError::Capacity(1)));
    }
}
