//! Ollama Embeddings
//!
//! Uses Ollama's embedding API for generating dense vectors.
//!
//! ## Query Prefix
//!
//! nomic-embed-text is trained with task prefixes. Queries are embedded as
//! `search_query: <query>`; documents were indexed as `search_document: <text>`.
//! Models without prefixes can set `query_prefix` to an empty string.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use scripture_qa_config::constants::{endpoints, rag, timeouts};
use scripture_qa_config::RagConfig;

use crate::RagError;

/// Prefix applied to queries before embedding
pub const DEFAULT_QUERY_PREFIX: &str = "search_query: ";

/// Ollama embedding configuration
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingConfig {
    /// Ollama API endpoint
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Embedding dimension
    pub embedding_dim: usize,
    /// Text prepended to every query
    pub query_prefix: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::OLLAMA_DEFAULT.to_string(),
            model: rag::EMBEDDING_MODEL.to_string(),
            embedding_dim: rag::VECTOR_DIM,
            query_prefix: DEFAULT_QUERY_PREFIX.to_string(),
            timeout: Duration::from_millis(timeouts::SEARCH_MS),
        }
    }
}

impl From<&RagConfig> for OllamaEmbeddingConfig {
    fn from(config: &RagConfig) -> Self {
        Self {
            endpoint: config.embedding_endpoint.clone(),
            model: config.embedding_model.clone(),
            embedding_dim: config.vector_dim,
            query_prefix: DEFAULT_QUERY_PREFIX.to_string(),
            timeout: Duration::from_millis(config.search_timeout_ms),
        }
    }
}

/// Request to Ollama embedding API
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: String,
}

/// Response from Ollama embedding API
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama embedder
pub struct OllamaEmbedder {
    client: Client,
    config: OllamaEmbeddingConfig,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: OllamaEmbeddingConfig) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Embed a query with the configured prefix
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        let formatted = format!("{}{}", self.config.query_prefix, query);
        self.embed_raw(formatted).await
    }

    /// Raw embedding without any formatting
    async fn embed_raw(&self, text: String) -> Result<Vec<f32>, RagError> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: text,
        };

        let url = format!("{}/api/embed", self.config.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "Ollama embedding failed: {} - {}",
                status, text
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("Failed to parse Ollama response: {}", e)))?;

        let embedding = embed_response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("No embedding returned".to_string()))?;

        if embedding.len() != self.config.embedding_dim {
            return Err(RagError::Embedding(format!(
                "Expected {} dimensions from {}, got {}",
                self.config.embedding_dim,
                self.config.model,
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    /// Get embedding dimension
    pub fn dim(&self) -> usize {
        self.config.embedding_dim
    }

    /// Get model name
    pub fn model(&self) -> &str {
        &self.config.model
    }
}
