//! Configuration management for the scripture question-answering service
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default`, `config/{env}`)
//! - Environment variables (`SCRIPTURE_QA__` prefix, `__` separator)
//!
//! Every section has compiled defaults, so an empty environment yields a
//! working local setup (Ollama + Qdrant on localhost).

pub mod constants;
pub mod pipeline;
pub mod settings;

pub use pipeline::PipelineConfig;
pub use settings::{
    fallback_settings, load_settings, load_settings_file, load_settings_from, LlmSettings, ObservabilityConfig, RagConfig,
    RerankerSettings, RuntimeEnvironment, ServerConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
