//! Hybrid retrieval over the translated scripture corpus
//!
//! Features:
//! - Dense vector search via Qdrant, query embeddings from Ollama
//! - Lexical BM25 search via Tantivy
//! - Weighted reciprocal-rank fusion of both result lists
//! - Mandatory cross-encoder reranking (remote service, ONNX, or keyword scorer)

pub mod embeddings;
pub mod reranker;
pub mod retriever;
pub mod sparse_search;
pub mod store;
pub mod vector_store;

pub use embeddings::{OllamaEmbedder, OllamaEmbeddingConfig};
pub use reranker::{build_reranker, KeywordReranker, RemoteReranker, RemoteRerankerConfig, SimpleScorer};
#[cfg(feature = "onnx")]
pub use reranker::CrossEncoderReranker;
pub use retriever::{fuse, HybridRetriever, RetrieverConfig};
pub use sparse_search::{SparseConfig, SparseIndex};
pub use store::CorpusStore;
pub use vector_store::{VectorDistance, VectorStore, VectorStoreConfig};

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Reranker error: {0}")]
    Reranker(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No passages found for query: {0}")]
    EmptyResults(String),

    #[error("{stage} timed out after {millis}ms")]
    Timeout { stage: &'static str, millis: u64 },
}

impl From<RagError> for scripture_qa_core::Error {
    fn from(err: RagError) -> Self {
        scripture_qa_core::Error::Retrieval(err.to_string())
    }
}
