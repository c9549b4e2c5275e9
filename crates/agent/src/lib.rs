//! Scripture answering pipeline
//!
//! Features:
//! - Follow-up detection over recent conversation history
//! - Query normalization (grammar pass, or standalone rewrite plus topic-change check)
//! - Hybrid retrieval with mandatory reranking (see `scripture_qa_rag`)
//! - Schema-constrained answer synthesis with citations and a salvage path
//! - Confidence evaluation with an "insufficient information" sentinel
//! - Bounded refinement of low-confidence answers
//! - Windowed, topic-aware conversation history
//! - Per-session serialization of turns

pub mod classifier;
pub mod conversation;
pub mod evaluator;
mod llm_call;
pub mod normalizer;
pub mod pipeline;
pub mod prompts;
pub mod refinement;
pub mod session;
pub mod synthesizer;

pub use classifier::DialogueTurnClassifier;
pub use conversation::{ConversationState, ConversationStateManager};
pub use evaluator::{ConfidenceEvaluator, COULD_NOT_EVALUATE, NOT_ENOUGH_INFORMATION};
pub use normalizer::{NormalizedQuery, QueryNormalizer};
pub use pipeline::{AnswerPipeline, TurnOutcome};
pub use refinement::RefinementLoop;
pub use session::{Session, SessionReply};
pub use synthesizer::{AnswerSynthesizer, DocumentCatalog, RefinementFeedback};

use scripture_qa_rag::RagError;
use thiserror::Error;

/// Agent errors
///
/// Language model faults never surface here; they degrade to defaults
/// inside the pipeline. Only retrieval failures and bad input do.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RagError),

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),
}

impl AgentError {
    pub fn is_retrieval(&self) -> bool {
        matches!(self, AgentError::Retrieval(_))
    }
}

impl From<AgentError> for scripture_qa_core::Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Retrieval(e) => e.into(),
            AgentError::InvalidQuestion(msg) => scripture_qa_core::Error::Internal(msg),
        }
    }
}
