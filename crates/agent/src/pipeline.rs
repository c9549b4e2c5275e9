//! Answering pipeline
//!
//! One turn runs strictly in order:
//!
//! 1. follow-up classification over recent history
//! 2. query normalization (grammar pass, or rewrite plus topic-change check)
//! 3. hybrid retrieval against the normalized question
//! 4. synthesis, evaluation and bounded refinement
//! 5. conversation state update
//!
//! A retrieval failure aborts the turn and leaves the state untouched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use scripture_qa_config::PipelineConfig;
use scripture_qa_core::{AnswerResult, ConversationTurn, LanguageModel};
use scripture_qa_rag::HybridRetriever;

use crate::classifier::DialogueTurnClassifier;
use crate::conversation::{ConversationState, ConversationStateManager};
use crate::evaluator::ConfidenceEvaluator;
use crate::normalizer::QueryNormalizer;
use crate::refinement::RefinementLoop;
use crate::synthesizer::AnswerSynthesizer;
use crate::AgentError;

/// Result of one answered turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: AnswerResult,
    /// Question actually used for retrieval and synthesis
    pub enhanced_question: String,
    pub is_follow_up: bool,
    pub reset_history: bool,
}

pub struct AnswerPipeline {
    classifier: DialogueTurnClassifier,
    normalizer: QueryNormalizer,
    retriever: Arc<HybridRetriever>,
    refinement: RefinementLoop,
    conversation: ConversationStateManager,
}

impl AnswerPipeline {
    pub fn new(
        classifier: DialogueTurnClassifier,
        normalizer: QueryNormalizer,
        retriever: Arc<HybridRetriever>,
        refinement: RefinementLoop,
        conversation: ConversationStateManager,
    ) -> Self {
        Self {
            classifier,
            normalizer,
            retriever,
            refinement,
            conversation,
        }
    }

    /// Wire every stage to one language model
    pub fn from_config(
        llm: Arc<dyn LanguageModel>,
        retriever: Arc<HybridRetriever>,
        config: &PipelineConfig,
        llm_timeout: Duration,
    ) -> Self {
        let synthesizer = Arc::new(AnswerSynthesizer::new(
            llm.clone(),
            llm_timeout,
            config.answer_temperature,
        ));
        let evaluator = Arc::new(ConfidenceEvaluator::new(llm.clone(), llm_timeout));

        Self::new(
            DialogueTurnClassifier::new(llm.clone(), llm_timeout, config.classifier_history),
            QueryNormalizer::new(llm, llm_timeout, config.classifier_history),
            retriever,
            RefinementLoop::new(
                synthesizer,
                evaluator,
                config.confidence_threshold,
                config.max_regeneration_attempts,
            ),
            ConversationStateManager::from_config(config),
        )
    }

    pub fn conversation(&self) -> &ConversationStateManager {
        &self.conversation
    }

    /// Answer one question and record it in `state`
    pub async fn answer(
        &self,
        question: &str,
        state: &mut ConversationState,
    ) -> Result<TurnOutcome, AgentError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AgentError::InvalidQuestion("question is empty".to_string()));
        }

        let start = Instant::now();
        let history: Vec<ConversationTurn> = self.conversation.recent(state).to_vec();

        let is_follow_up = self.classifier.is_follow_up(question, &history).await;
        let normalized = self.normalizer.normalize(question, &history, is_follow_up).await;

        tracing::debug!(
            question,
            enhanced = %normalized.question,
            is_follow_up,
            reset_history = normalized.reset_history,
            "Question normalized"
        );

        let passages = match self.retriever.retrieve(&normalized.question).await {
            Ok(passages) => passages,
            Err(e) => {
                tracing::error!(error = %e, "Retrieval failed, aborting turn");
                metrics::counter!("scripture_qa_retrieval_failures_total").increment(1);
                return Err(e.into());
            },
        };

        let answer = self
            .refinement
            .run(&normalized.question, &passages, &history)
            .await;

        self.conversation
            .commit_turn(state, question, answer.clone(), normalized.reset_history);

        let score = answer.confidence_score();
        tracing::info!(
            is_follow_up,
            passages = passages.len(),
            citations = answer.citations.len(),
            confidence = score,
            regenerations = answer.regeneration_attempts,
            history_len = state.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Turn answered"
        );
        metrics::counter!("scripture_qa_turns_total", "follow_up" => is_follow_up.to_string())
            .increment(1);
        if score >= 0 {
            metrics::histogram!("scripture_qa_confidence_score").record(score as f64);
        }
        metrics::histogram!("scripture_qa_turn_duration_seconds").record(start.elapsed().as_secs_f64());

        Ok(TurnOutcome {
            answer,
            enhanced_question: normalized.question,
            is_follow_up,
            reset_history: normalized.reset_history,
        })
    }

    /// Stateless form of the caller contract: prior history in, answer and
    /// updated history out
    pub async fn answer_with_history(
        &self,
        question: &str,
        chat_history: Vec<ConversationTurn>,
    ) -> Result<(TurnOutcome, Vec<ConversationTurn>), AgentError> {
        let mut state = ConversationState::from_turns(chat_history);
        let outcome = self.answer(question, &mut state).await?;
        Ok((outcome, state.into_turns()))
    }
}
