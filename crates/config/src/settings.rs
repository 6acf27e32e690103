//! Main settings module
//!
//! Layered loading: defaults from `constants`, then an optional TOML file,
//! then `OUTDIAL_`-prefixed environment variables.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{audio, cache, cutoff, latency, pools, synthesis, timing, transcripts};
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// HTTP/WebSocket server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Speech-recognition stream configuration
    #[serde(default)]
    pub recognition: RecognitionConfig,

    /// Speech-synthesis provider chain configuration
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Turn-taking orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Audio cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Resource pool configuration
    #[serde(default)]
    pub pools: PoolsConfig,

    /// Latency monitoring configuration
    #[serde(default)]
    pub latency: LatencyConfig,

    /// Scripted utterances
    #[serde(default)]
    pub scripts: ScriptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent calls handled by this process
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_calls() -> usize {
    50
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_calls: default_max_calls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Streaming endpoint URL
    #[serde(default = "default_recognition_url")]
    pub url: String,
    /// API key (falls back to RECOGNITION_API_KEY)
    #[serde(default = "default_recognition_key")]
    pub api_key: String,
    /// Input sample rate advertised to the service
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Endpointing sensitivity (milliseconds of trailing silence)
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u64,
    /// Utterance-end timeout (milliseconds)
    #[serde(default = "default_utterance_end_ms")]
    pub utterance_end_ms: u64,
    /// Keep-alive interval during silence (milliseconds)
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
}

fn default_recognition_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}
fn default_recognition_key() -> String {
    std::env::var("RECOGNITION_API_KEY").unwrap_or_default()
}
fn default_sample_rate() -> u32 {
    8000
}
fn default_endpointing_ms() -> u64 {
    300
}
fn default_utterance_end_ms() -> u64 {
    1000
}
fn default_keepalive_ms() -> u64 {
    timing::RECOGNITION_KEEPALIVE_MS
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            url: default_recognition_url(),
            api_key: default_recognition_key(),
            sample_rate: default_sample_rate(),
            endpointing_ms: default_endpointing_ms(),
            utterance_end_ms: default_utterance_end_ms(),
            keepalive_ms: default_keepalive_ms(),
        }
    }
}

/// One synthesis provider in the fallback chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisProviderConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    pub voice_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Providers tried in order per job
    #[serde(default = "default_providers")]
    pub providers: Vec<SynthesisProviderConfig>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_providers() -> Vec<SynthesisProviderConfig> {
    vec![SynthesisProviderConfig {
        name: "elevenlabs".to_string(),
        url: "wss://api.elevenlabs.io/v1/text-to-speech".to_string(),
        api_key: std::env::var("SYNTHESIS_API_KEY").unwrap_or_default(),
        voice_id: "default".to_string(),
    }]
}
fn default_max_concurrent() -> usize {
    synthesis::MAX_CONCURRENT_JOBS
}
fn default_max_retries() -> u32 {
    synthesis::MAX_RETRIES
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_key")]
    pub api_key: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_llm_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_llm_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}
fn default_llm_key() -> String {
    std::env::var("ANTHROPIC_API_KEY").unwrap_or_default()
}
fn default_llm_max_tokens() -> u32 {
    256
}
fn default_llm_temperature() -> f32 {
    0.7
}
fn default_system_prompt() -> String {
    "You are a friendly phone agent. Respond concisely and naturally; \
     your replies are spoken aloud, so keep them short."
        .to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: default_llm_key(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_grace_ms")]
    pub barge_in_grace_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub barge_in_cooldown_ms: u64,
    #[serde(default = "default_min_interval_ms")]
    pub min_response_interval_ms: u64,
    #[serde(default = "default_duplicate_window_ms")]
    pub duplicate_window_ms: u64,
    #[serde(default = "default_min_transcript_chars")]
    pub min_transcript_chars: usize,
    #[serde(default = "default_repetition_window")]
    pub repetition_window: usize,
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: usize,
    /// Enable backchannel acknowledgments during long user turns
    #[serde(default = "default_backchannels")]
    pub backchannels_enabled: bool,
    #[serde(default = "default_backchannel_after_ms")]
    pub backchannel_after_ms: u64,
    /// Early-cutoff bounds
    #[serde(default = "default_cutoff_min")]
    pub cutoff_min_chars: usize,
    #[serde(default = "default_cutoff_max")]
    pub cutoff_max_chars: usize,
    /// Outbound frame size in µ-law bytes
    #[serde(default = "default_frame_bytes")]
    pub frame_bytes: usize,
}

fn default_grace_ms() -> u64 {
    timing::BARGE_IN_GRACE_MS
}
fn default_cooldown_ms() -> u64 {
    timing::BARGE_IN_COOLDOWN_MS
}
fn default_min_interval_ms() -> u64 {
    timing::MIN_RESPONSE_INTERVAL_MS
}
fn default_duplicate_window_ms() -> u64 {
    timing::DUPLICATE_WINDOW_MS
}
fn default_min_transcript_chars() -> usize {
    transcripts::MIN_TRANSCRIPT_CHARS
}
fn default_repetition_window() -> usize {
    transcripts::REPETITION_WINDOW
}
fn default_repetition_threshold() -> usize {
    transcripts::REPETITION_THRESHOLD
}
fn default_backchannels() -> bool {
    true
}
fn default_backchannel_after_ms() -> u64 {
    timing::BACKCHANNEL_AFTER_MS
}
fn default_cutoff_min() -> usize {
    cutoff::MIN_RESPONSE_CHARS
}
fn default_cutoff_max() -> usize {
    cutoff::MAX_RESPONSE_CHARS
}
fn default_frame_bytes() -> usize {
    audio::FRAME_BYTES
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            barge_in_grace_ms: default_grace_ms(),
            barge_in_cooldown_ms: default_cooldown_ms(),
            min_response_interval_ms: default_min_interval_ms(),
            duplicate_window_ms: default_duplicate_window_ms(),
            min_transcript_chars: default_min_transcript_chars(),
            repetition_window: default_repetition_window(),
            repetition_threshold: default_repetition_threshold(),
            backchannels_enabled: default_backchannels(),
            backchannel_after_ms: default_backchannel_after_ms(),
            cutoff_min_chars: default_cutoff_min(),
            cutoff_max_chars: default_cutoff_max(),
            frame_bytes: default_frame_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_jaccard")]
    pub jaccard_threshold: f64,
    #[serde(default = "default_min_cacheable")]
    pub min_cacheable_chars: usize,
    #[serde(default = "default_ttl_secs")]
    pub entry_ttl_secs: u64,
    /// High-frequency phrases pre-synthesized at startup
    #[serde(default)]
    pub warmup_phrases: Vec<String>,
}

fn default_cache_enabled() -> bool {
    true
}
fn default_jaccard() -> f64 {
    cache::JACCARD_THRESHOLD
}
fn default_min_cacheable() -> usize {
    cache::MIN_CACHEABLE_CHARS
}
fn default_ttl_secs() -> u64 {
    cache::ENTRY_TTL_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            jaccard_threshold: default_jaccard(),
            min_cacheable_chars: default_min_cacheable(),
            entry_ttl_secs: default_ttl_secs(),
            warmup_phrases: Vec::new(),
        }
    }
}

/// Tuning for one resource pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_target")]
    pub target_size: usize,
    #[serde(default = "default_pool_max")]
    pub max_size: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_max_checkout_ms")]
    pub max_checkout_ms: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
}

fn default_pool_target() -> usize {
    pools::TARGET_SIZE
}
fn default_pool_max() -> usize {
    pools::MAX_SIZE
}
fn default_acquire_timeout_ms() -> u64 {
    pools::ACQUIRE_TIMEOUT_MS
}
fn default_max_checkout_ms() -> u64 {
    pools::MAX_CHECKOUT_MS
}
fn default_max_age_secs() -> u64 {
    pools::MAX_AGE_SECS
}
fn default_health_interval_secs() -> u64 {
    pools::HEALTH_INTERVAL_SECS
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_size: default_pool_target(),
            max_size: default_pool_max(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            max_checkout_ms: default_max_checkout_ms(),
            max_age_secs: default_max_age_secs(),
            health_interval_secs: default_health_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    #[serde(default)]
    pub transcoder: PoolConfig,
    #[serde(default)]
    pub connection: PoolConfig,
    /// Transcoder subprocess command
    #[serde(default = "default_transcoder_bin")]
    pub transcoder_bin: String,
    /// Transcoder arguments (input on stdin, µ-law 8k mono on stdout)
    #[serde(default = "default_transcoder_args")]
    pub transcoder_args: Vec<String>,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            transcoder: PoolConfig::default(),
            connection: PoolConfig::default(),
            transcoder_bin: default_transcoder_bin(),
            transcoder_args: default_transcoder_args(),
        }
    }
}

fn default_transcoder_bin() -> String {
    "ffmpeg".to_string()
}
fn default_transcoder_args() -> Vec<String> {
    [
        "-loglevel", "error", "-i", "pipe:0", "-ar", "8000", "-ac", "1", "-f", "mulaw", "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_slow_ceiling_ms")]
    pub slow_call_ceiling_ms: u64,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
}

fn default_window_size() -> usize {
    latency::WINDOW_SIZE
}
fn default_slow_ceiling_ms() -> u64 {
    latency::SLOW_CALL_CEILING_MS
}
fn default_breaker_threshold() -> u32 {
    latency::BREAKER_THRESHOLD
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            slow_call_ceiling_ms: default_slow_ceiling_ms(),
            breaker_threshold: default_breaker_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    #[serde(default = "default_opening")]
    pub opening: String,
    #[serde(default = "default_goodbye")]
    pub goodbye: String,
    #[serde(default = "default_apology")]
    pub apology: String,
    #[serde(default = "default_disengagement")]
    pub disengagement: String,
    #[serde(default = "default_backchannel_phrases")]
    pub backchannels: Vec<String>,
}

fn default_opening() -> String {
    "Hello! Thanks for taking my call. Do you have a quick moment?".to_string()
}
fn default_goodbye() -> String {
    "Thanks for your time. Have a great day!".to_string()
}
fn default_apology() -> String {
    "I'm sorry, I'm having trouble on my end. Let me call you back another time.".to_string()
}
fn default_disengagement() -> String {
    "I don't want to keep repeating myself, so I'll let you go. Thanks for your time!".to_string()
}
fn default_backchannel_phrases() -> Vec<String> {
    vec!["Mm-hmm.".to_string(), "I see.".to_string(), "Right.".to_string()]
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            opening: default_opening(),
            goodbye: default_goodbye(),
            apology: default_apology(),
            disengagement: default_disengagement(),
            backchannels: default_backchannel_phrases(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix("OUTDIAL").separator("__"));

        let settings: Settings = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Sanity-check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.synthesis.providers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one synthesis provider is required".to_string(),
            ));
        }
        if self.pools.transcoder.target_size > self.pools.transcoder.max_size
            || self.pools.connection.target_size > self.pools.connection.max_size
        {
            return Err(ConfigError::Invalid(
                "pool target_size must not exceed max_size".to_string(),
            ));
        }
        if self.orchestrator.cutoff_min_chars >= self.orchestrator.cutoff_max_chars {
            return Err(ConfigError::Invalid(
                "cutoff_min_chars must be below cutoff_max_chars".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cache.jaccard_threshold) {
            return Err(ConfigError::Invalid(
                "jaccard_threshold must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
