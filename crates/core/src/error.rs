//! Crate-wide error type

use thiserror::Error;

/// Errors crossing crate boundaries
#[derive(Error, Debug)]
pub enum Error {
    /// Document store, embedding or rerank failure. Fatal to the turn.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Language model transport or generation failure
    #[error("LLM error: {0}")]
    Llm(String),

    /// Structured output did not validate against the requested schema.
    /// `raw` carries the unvalidated payload so callers can salvage it.
    #[error("Schema validation failed: {reason}")]
    SchemaValidation { raw: String, reason: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Raw payload of a schema validation failure, if this is one
    pub fn schema_payload(&self) -> Option<&str> {
        match self {
            Error::SchemaValidation { raw, .. } => Some(raw),
            _ => None,
        }
    }

    pub fn is_retrieval(&self) -> bool {
        matches!(self, Error::Retrieval(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
