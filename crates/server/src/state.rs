//! Shared application state
//!
//! Assembles the process-wide services: the two resource pools, the audio
//! cache, the latency tracker, the provider clients, and the call registry.
//! Everything here is injected into each call's orchestrator by reference —
//! no ambient globals.

use std::sync::Arc;
use tokio::sync::watch;

use outdial_cache::AudioCache;
use outdial_config::Settings;
use outdial_core::{LanguageModel, SpeechRecognizer, SpeechSynthesizer, Transcoder};
use outdial_llm::AnthropicClient;
use outdial_metrics::CycleTracker;
use outdial_pool::{
    ConnectionFactory, PooledTranscoder, ResourcePool, TranscoderFactory,
};

use crate::recognition::WsRecognizer;
use crate::session::CallRegistry;
use crate::ServerError;

/// Process-wide shared services
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub calls: Arc<CallRegistry>,
    pub cache: Arc<AudioCache>,
    pub tracker: Arc<CycleTracker>,
    pub transcoder_pool: Arc<ResourcePool<TranscoderFactory>>,
    pub transcoder: Arc<dyn Transcoder>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub llm: Arc<dyn LanguageModel>,
    pub synthesizers: Vec<Arc<dyn SpeechSynthesizer>>,
    /// Default voice for synthesis and cache keys
    pub voice_id: String,
    /// Shutdown handles for the background maintenance tasks
    pub background_tasks: Arc<Vec<watch::Sender<bool>>>,
}

impl AppState {
    /// Wire every shared service from settings, warm the pools, and run
    /// cache maintenance + warm-up.
    pub async fn build(settings: Settings) -> Result<Self, ServerError> {
        let settings = Arc::new(settings);
        let mut background_tasks = Vec::new();

        let tracker = Arc::new(CycleTracker::new(settings.latency.clone()));
        let cache = Arc::new(AudioCache::new(settings.cache.clone()));
        cache.maintenance();

        // Transcoder subprocess pool
        let transcoder_pool = ResourcePool::new(
            "transcoder",
            TranscoderFactory::new(
                settings.pools.transcoder_bin.clone(),
                settings.pools.transcoder_args.clone(),
            ),
            settings.pools.transcoder.clone(),
        );
        transcoder_pool.warm_up().await;
        background_tasks.push(transcoder_pool.start_health_task());
        let transcoder: Arc<dyn Transcoder> =
            Arc::new(PooledTranscoder::new(transcoder_pool.clone()));

        // Recognition connection pool + client
        let recognition_pool = ResourcePool::new(
            "recognition",
            WsRecognizer::connection_factory(&settings.recognition),
            settings.pools.connection.clone(),
        );
        recognition_pool.warm_up().await;
        background_tasks.push(recognition_pool.start_health_task());
        let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(WsRecognizer::new(
            settings.recognition.clone(),
            recognition_pool,
        ));

        // Synthesis providers in fallback order, each with its own
        // connection pool when it streams over WebSocket
        let mut synthesizers: Vec<Arc<dyn SpeechSynthesizer>> = Vec::new();
        for provider in &settings.synthesis.providers {
            if provider.url.starts_with("ws") {
                let pool = ResourcePool::new(
                    format!("synthesis-{}", provider.name),
                    ConnectionFactory::new(provider.url.clone())
                        .with_header("authorization", format!("Bearer {}", provider.api_key)),
                    settings.pools.connection.clone(),
                );
                pool.warm_up().await;
                background_tasks.push(pool.start_health_task());
                synthesizers.push(Arc::new(outdial_synth::WsSynthesizer::new(
                    provider.name.clone(),
                    pool,
                )));
            } else {
                synthesizers.push(Arc::new(outdial_synth::HttpSynthesizer::new(
                    provider.name.clone(),
                    provider.url.clone(),
                    provider.api_key.clone(),
                )));
            }
        }
        if synthesizers.is_empty() {
            return Err(ServerError::Config(
                "no synthesis providers configured".into(),
            ));
        }
        let voice_id = settings
            .synthesis
            .providers
            .first()
            .map(|p| p.voice_id.clone())
            .unwrap_or_else(|| "default".into());

        let llm: Arc<dyn LanguageModel> = Arc::new(
            AnthropicClient::new(settings.llm.clone())
                .map_err(|e| ServerError::Config(e.to_string()))?,
        );

        let calls = Arc::new(CallRegistry::new(settings.server.max_calls));
        background_tasks.push(calls.start_cleanup_task());

        let state = Self {
            settings,
            calls,
            cache,
            tracker,
            transcoder_pool,
            transcoder,
            recognizer,
            llm,
            synthesizers,
            voice_id,
            background_tasks: Arc::new(background_tasks),
        };

        state.warm_cache().await;
        Ok(state)
    }

    /// Pre-synthesize the curated opening phrases so first turns hit cache.
    async fn warm_cache(&self) {
        let phrases = self.settings.cache.warmup_phrases.clone();
        if phrases.is_empty() {
            return;
        }

        let mut warmed = 0usize;
        for phrase in &phrases {
            if self.cache.get(phrase, &self.voice_id).is_some() {
                continue;
            }

            let mut synthesized = None;
            for provider in &self.synthesizers {
                match provider.synthesize(phrase, &self.voice_id).await {
                    Ok(audio) => {
                        synthesized = Some(audio);
                        break;
                    },
                    Err(e) => {
                        tracing::warn!(provider = provider.name(), error = %e, "Warm-up synthesis failed");
                    },
                }
            }

            let Some(audio) = synthesized else { continue };
            match self.transcoder.to_narrowband(&audio).await {
                Ok(playback) => {
                    self.cache.put(phrase, &self.voice_id, audio, playback);
                    warmed += 1;
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Warm-up transcode failed");
                },
            }
        }

        tracing::info!(warmed, total = phrases.len(), "Cache warm-up complete");
    }

    /// Signal every background maintenance task to stop
    pub fn shutdown_background_tasks(&self) {
        for task in self.background_tasks.iter() {
            let _ = task.send(true);
        }
    }
}
