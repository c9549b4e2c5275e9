//! Hybrid Retriever
//!
//! Combines dense and lexical search with weighted RRF fusion, then reranks
//! the fused candidates. Reranking always runs; it narrows `candidate_top_k`
//! fused candidates down to `final_top_k`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scripture_qa_config::constants::{rag, timeouts};
use scripture_qa_config::RagConfig;
use scripture_qa_core::{DocumentStore, Passage, Reranker, RetrievedPassage, SearchSource};

use crate::RagError;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Results requested from each search, and kept after fusion
    pub candidate_top_k: usize,
    /// Results kept after reranking
    pub final_top_k: usize,
    /// Weight for dense ranks in fusion
    pub dense_weight: f32,
    /// Weight for lexical ranks in fusion
    pub lexical_weight: f32,
    /// RRF k parameter
    pub rrf_k: f32,
    /// Timeout for each search call
    pub search_timeout: Duration,
    /// Timeout for the rerank call
    pub rerank_timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            candidate_top_k: rag::CANDIDATE_TOP_K,
            final_top_k: rag::FINAL_TOP_K,
            dense_weight: rag::DENSE_WEIGHT,
            lexical_weight: rag::LEXICAL_WEIGHT,
            rrf_k: rag::RRF_K,
            search_timeout: Duration::from_millis(timeouts::SEARCH_MS),
            rerank_timeout: Duration::from_millis(timeouts::RERANK_MS),
        }
    }
}

impl From<&RagConfig> for RetrieverConfig {
    fn from(config: &RagConfig) -> Self {
        Self {
            candidate_top_k: config.candidate_top_k,
            final_top_k: config.final_top_k,
            dense_weight: config.dense_weight,
            lexical_weight: config.lexical_weight,
            rrf_k: config.rrf_k,
            search_timeout: Duration::from_millis(config.search_timeout_ms),
            rerank_timeout: Duration::from_millis(config.rerank_timeout_ms),
        }
    }
}

/// Weighted reciprocal rank fusion.
///
/// Each list contributes `weight / (rrf_k + rank + 1)` per passage; a passage
/// in both lists sums both contributions and is marked `Hybrid`. The result
/// is sorted by fused score with ties kept in first-seen order (dense list
/// first), so identical inputs always give the identical ranking.
pub fn fuse(
    dense: Vec<Passage>,
    lexical: Vec<Passage>,
    dense_weight: f32,
    lexical_weight: f32,
    rrf_k: f32,
) -> Vec<RetrievedPassage> {
    let mut fused: Vec<RetrievedPassage> = Vec::with_capacity(dense.len() + lexical.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    let lists = [
        (dense, dense_weight, SearchSource::Dense),
        (lexical, lexical_weight, SearchSource::Lexical),
    ];

    for (list, weight, source) in lists {
        for (rank, passage) in list.into_iter().enumerate() {
            let contribution = weight / (rrf_k + rank as f32 + 1.0);
            match positions.get(passage.identity()) {
                Some(&idx) => {
                    let existing = &mut fused[idx];
                    // The same list may repeat a passage; only cross-list hits are hybrid
                    if existing.source != source {
                        existing.source = SearchSource::Hybrid;
                    }
                    existing.score += contribution;
                },
                None => {
                    positions.insert(passage.identity().to_string(), fused.len());
                    fused.push(RetrievedPassage::new(passage, contribution, source));
                },
            }
        }
    }

    // Stable sort keeps first-seen order among equal scores
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}

/// Hybrid retriever combining dense and lexical search
pub struct HybridRetriever {
    store: Arc<dyn DocumentStore>,
    reranker: Arc<dyn Reranker>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        reranker: Arc<dyn Reranker>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            store,
            reranker,
            config,
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Retrieve, fuse and rerank passages for a (normalized) question.
    ///
    /// Any search or rerank failure is returned as an error, and so is a
    /// query for which neither search finds anything.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedPassage>, RagError> {
        let start = Instant::now();
        let k = self.config.candidate_top_k;

        // Independent searches; fusion order does not depend on completion order
        let (dense, lexical) = tokio::join!(
            with_timeout("dense search", self.config.search_timeout, async {
                self.store
                    .search_dense(query, k)
                    .await
                    .map_err(|e| RagError::Search(format!("dense: {}", e)))
            }),
            with_timeout("lexical search", self.config.search_timeout, async {
                self.store
                    .search_lexical(query, k)
                    .await
                    .map_err(|e| RagError::Search(format!("lexical: {}", e)))
            }),
        );
        let dense = dense?;
        let lexical = lexical?;

        let dense_count = dense.len();
        let lexical_count = lexical.len();

        if dense.is_empty() && lexical.is_empty() {
            tracing::warn!(store = self.store.name(), query, "Both searches returned nothing");
            return Err(RagError::EmptyResults(query.to_string()));
        }

        let mut candidates = fuse(
            dense,
            lexical,
            self.config.dense_weight,
            self.config.lexical_weight,
            self.config.rrf_k,
        );
        candidates.truncate(self.config.candidate_top_k);
        let candidate_count = candidates.len();

        let mut reranked = with_timeout("rerank", self.config.rerank_timeout, async {
            self.reranker
                .rerank(query, candidates, self.config.final_top_k)
                .await
                .map_err(|e| RagError::Reranker(e.to_string()))
        })
        .await?;
        // Rerankers are external; enforce the limit here as well
        reranked.truncate(self.config.final_top_k);

        tracing::debug!(
            dense = dense_count,
            lexical = lexical_count,
            candidates = candidate_count,
            returned = reranked.len(),
            reranker = self.reranker.name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Hybrid retrieval complete"
        );

        Ok(reranked)
    }
}

async fn with_timeout<T>(
    stage: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, RagError>>,
) -> Result<T, RagError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| RagError::Timeout {
            stage,
            millis: limit.as_millis() as u64,
        })?
}
