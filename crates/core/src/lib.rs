//! Core traits and types for the scripture question-answering pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - Passage and retrieval result types
//! - Answer, citation and confidence types (the persisted answer format)
//! - Conversation turn types
//! - Traits for the external collaborators (document store, reranker, language model)
//! - Error types

pub mod answer;
pub mod conversation;
pub mod error;
pub mod llm_types;
pub mod passage;
pub mod traits;

pub use answer::{AnswerResult, Citation, ConfidenceScore};
pub use conversation::{ConversationTurn, TurnContent, TurnRole};
pub use error::{Error, Result};
pub use llm_types::{FinishReason, GenerateRequest, GenerateResponse, Message, OutputSchema, Role};
pub use passage::{Passage, RetrievedPassage, SearchSource};
pub use traits::{DocumentStore, LanguageModel, Reranker};
