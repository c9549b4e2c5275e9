//! Retrieval traits

use crate::{Passage, Result, RetrievedPassage};
use async_trait::async_trait;

/// Read-only passage store supporting two independent search modes
///
/// Population and indexing happen outside the pipeline.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Embedding similarity search, best match first
    async fn search_dense(&self, query: &str, k: usize) -> Result<Vec<Passage>>;

    /// Term-overlap search, best match first
    async fn search_lexical(&self, query: &str, k: usize) -> Result<Vec<Passage>>;

    /// Store name for logging
    fn name(&self) -> &str;
}

/// Second-pass scorer over a small candidate set
#[async_trait]
pub trait Reranker: Send + Sync + 'static {
    /// Score every (query, passage) pair jointly.
    ///
    /// Returns passages sorted by descending rerank score, at most `top_n`.
    async fn rerank(
        &self,
        query: &str,
        passages: Vec<RetrievedPassage>,
        top_n: usize,
    ) -> Result<Vec<RetrievedPassage>>;

    /// Reranker name for logging
    fn name(&self) -> &str;
}
