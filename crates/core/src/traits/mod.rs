//! Traits for the pipeline's external collaborators
//!
//! ```text
//! Retrieval:
//!   - DocumentStore: dense + lexical passage search
//!   - Reranker: joint (query, passage) scoring
//!
//! Language Models:
//!   - LanguageModel: free-form and schema-constrained generation
//! ```
//!
//! Implementations are chosen once at startup and shared as `Arc<dyn ...>`.

mod llm;
mod retriever;

pub use llm::LanguageModel;
pub use retriever::{DocumentStore, Reranker};
