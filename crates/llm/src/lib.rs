//! Language model integration
//!
//! Features:
//! - Multiple backend support (Ollama, OpenAI / Azure OpenAI, Claude)
//! - Schema-constrained generation with local JSON Schema validation
//! - Tolerant JSON parsing for salvaging malformed structured output
//! - Provider selection once at startup via `LlmFactory`

pub mod backend;
pub mod claude;
pub mod factory;
pub mod repair;
pub mod schema;

pub use backend::{LlmConfig, OllamaBackend, OpenAIBackend, OpenAIConfig};
pub use claude::{ClaudeBackend, ClaudeConfig};
pub use factory::{LlmFactory, LlmProvider, LlmProviderConfig};
pub use repair::{from_str_lenient, parse_lenient, repair_json};
pub use schema::{parse_structured, validate_value};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Structured output failed to parse or validate; `raw` is the payload as received
    #[error("Schema validation failed: {reason}")]
    SchemaValidation { raw: String, reason: String },

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Transient failures worth a transport retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Network(_) | LlmError::Timeout)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for scripture_qa_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::SchemaValidation { raw, reason } => {
                scripture_qa_core::Error::SchemaValidation { raw, reason }
            },
            LlmError::Timeout => scripture_qa_core::Error::Timeout("language model".to_string()),
            LlmError::Configuration(msg) => scripture_qa_core::Error::Config(msg),
            other => scripture_qa_core::Error::Llm(other.to_string()),
        }
    }
}
