//! Configuration loading and centralized tuning constants

pub mod constants;
pub mod settings;

pub use settings::{
    CacheConfig, LatencyConfig, LlmConfig, OrchestratorConfig, PoolConfig, PoolsConfig,
    RecognitionConfig, ScriptsConfig, ServerConfig, Settings, SynthesisConfig,
    SynthesisProviderConfig,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
