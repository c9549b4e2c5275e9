//! Document store over Qdrant (dense) and Tantivy (lexical)

use async_trait::async_trait;
use std::sync::Arc;

use scripture_qa_config::RagConfig;
use scripture_qa_core::{DocumentStore, Passage, Result};

use crate::embeddings::{OllamaEmbedder, OllamaEmbeddingConfig};
use crate::sparse_search::{SparseConfig, SparseIndex};
use crate::vector_store::{VectorStore, VectorStoreConfig};
use crate::RagError;

/// Production `DocumentStore`.
///
/// Dense search embeds the query with Ollama and searches Qdrant; lexical
/// search runs BM25 over the Tantivy index. Both read pre-built indexes.
pub struct CorpusStore {
    embedder: OllamaEmbedder,
    vector_store: VectorStore,
    sparse_index: Arc<SparseIndex>,
}

impl CorpusStore {
    pub fn new(
        embedder: OllamaEmbedder,
        vector_store: VectorStore,
        sparse_index: Arc<SparseIndex>,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            sparse_index,
        }
    }

    /// Connect every backend from settings
    pub async fn from_settings(config: &RagConfig) -> std::result::Result<Self, RagError> {
        let embedder = OllamaEmbedder::new(OllamaEmbeddingConfig::from(config))?;

        let vector_store = VectorStore::new(VectorStoreConfig::from(config))?;
        vector_store.ensure_collection().await?;

        let sparse_index = SparseIndex::new(SparseConfig {
            index_path: Some(config.sparse_index_path.clone()),
            stemming: true,
        })?;
        if sparse_index.doc_count() == 0 {
            tracing::warn!(
                path = %config.sparse_index_path,
                "Lexical index is empty; hybrid search will rely on dense results"
            );
        }

        tracing::info!(
            collection = %vector_store.collection(),
            embedding_model = %embedder.model(),
            "Corpus store ready"
        );

        Ok(Self::new(embedder, vector_store, Arc::new(sparse_index)))
    }
}

#[async_trait]
impl DocumentStore for CorpusStore {
    async fn search_dense(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        let embedding = self.embedder.embed_query(query).await?;
        let hits = self.vector_store.search(embedding, k).await?;
        Ok(hits.into_iter().map(|h| h.passage).collect())
    }

    async fn search_lexical(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        // Tantivy search is CPU-bound
        let index = Arc::clone(&self.sparse_index);
        let query_owned = query.to_string();
        let hits = tokio::task::spawn_blocking(move || index.search(&query_owned, k))
            .await
            .map_err(|e| RagError::Search(format!("Lexical search task failed: {}", e)))??;

        Ok(hits.into_iter().map(|h| h.passage).collect())
    }

    fn name(&self) -> &str {
        "qdrant+tantivy"
    }
}
