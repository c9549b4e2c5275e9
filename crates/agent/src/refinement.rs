//! Bounded answer refinement
//!
//! Synthesize, evaluate, and while the score is in `[0, threshold)` and
//! attempts remain, synthesize again with the evaluator's reasoning as
//! feedback. The last attempt's answer and score are returned even if they
//! are worse than an earlier one.

use std::sync::Arc;

use scripture_qa_core::{AnswerResult, ConversationTurn, RetrievedPassage};

use crate::evaluator::ConfidenceEvaluator;
use crate::synthesizer::{AnswerSynthesizer, RefinementFeedback};

pub struct RefinementLoop {
    synthesizer: Arc<AnswerSynthesizer>,
    evaluator: Arc<ConfidenceEvaluator>,
    threshold: i32,
    max_attempts: u32,
}

impl RefinementLoop {
    pub fn new(
        synthesizer: Arc<AnswerSynthesizer>,
        evaluator: Arc<ConfidenceEvaluator>,
        threshold: i32,
        max_attempts: u32,
    ) -> Self {
        Self {
            synthesizer,
            evaluator,
            threshold,
            max_attempts,
        }
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Produce a scored answer, refining at most `max_attempts` times
    pub async fn run(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
        history: &[ConversationTurn],
    ) -> AnswerResult {
        let mut answer = self.synthesizer.synthesize(question, passages, history, None).await;
        let mut confidence = self.evaluator.evaluate(question, &answer, passages, history).await;
        let mut attempts = 0;

        while confidence.is_low(self.threshold) && attempts < self.max_attempts {
            attempts += 1;
            tracing::info!(
                score = confidence.confidence_score,
                threshold = self.threshold,
                attempt = attempts,
                "Low confidence, refining answer"
            );
            metrics::counter!("scripture_qa_refinements_total").increment(1);

            let feedback = RefinementFeedback {
                previous_answer: answer.answer.clone(),
                reasoning: confidence.reasoning.clone(),
            };
            answer = self
                .synthesizer
                .synthesize(question, passages, history, Some(&feedback))
                .await;
            confidence = self.evaluator.evaluate(question, &answer, passages, history).await;
        }

        tracing::debug!(
            score = confidence.confidence_score,
            attempts,
            "Answer scored"
        );

        let mut answer = answer.with_confidence(confidence);
        answer.regeneration_attempts = attempts;
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use scripture_qa_core::{
        Error, GenerateRequest, GenerateResponse, LanguageModel, OutputSchema, Passage, Result,
        SearchSource,
    };
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replies to structured calls from per-schema queues
    struct ScriptedLlm {
        answers: Mutex<VecDeque<Value>>,
        scores: Mutex<VecDeque<Result<Value>>>,
        synthesis_prompts: Mutex<Vec<String>>,
        evaluations: Mutex<usize>,
    }

    impl ScriptedLlm {
        fn new(answers: Vec<Value>, scores: Vec<Result<Value>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                scores: Mutex::new(scores.into()),
                synthesis_prompts: Mutex::new(Vec::new()),
                evaluations: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse> {
            Err(Error::Llm("unexpected free-form call".into()))
        }

        async fn generate_structured(&self, request: GenerateRequest, schema: &OutputSchema) -> Result<Value> {
            match schema.name.as_str() {
                "answer" => {
                    let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
                    self.synthesis_prompts.lock().push(prompt);
                    self.answers
                        .lock()
                        .pop_front()
                        .ok_or_else(|| Error::Llm("no scripted answer".into()))
                },
                "confidence" => {
                    *self.evaluations.lock() += 1;
                    self.scores
                        .lock()
                        .pop_front()
                        .unwrap_or_else(|| Err(Error::Llm("no scripted score".into())))
                },
                other => Err(Error::Llm(format!("unexpected schema {}", other))),
            }
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn passages() -> Vec<RetrievedPassage> {
        vec![RetrievedPassage::new(
            Passage::new("Paris is the capital of France").with_source("Atlas").with_page(3),
            1.0,
            SearchSource::Reranked,
        )]
    }

    fn refinement(llm: Arc<ScriptedLlm>, max_attempts: u32) -> RefinementLoop {
        let timeout = Duration::from_secs(5);
        RefinementLoop::new(
            Arc::new(AnswerSynthesizer::new(llm.clone(), timeout, 0.2)),
            Arc::new(ConfidenceEvaluator::new(llm, timeout)),
            75,
            max_attempts,
        )
    }

    fn answer(text: &str) -> Value {
        json!({"answer": text, "citations": [{"document_name": "Atlas", "document_number": 1, "page_numbers": [3]}]})
    }

    fn score(n: i64, reasoning: &str) -> Result<Value> {
        Ok(json!({"confidence_score": n, "reasoning": reasoning}))
    }

    #[tokio::test]
    async fn test_high_confidence_is_not_refined() {
        let llm = Arc::new(ScriptedLlm::new(vec![answer("Paris.")], vec![score(90, "direct")]));
        let result = refinement(llm.clone(), 1).run("Capital of France?", &passages(), &[]).await;

        assert_eq!(result.answer, "Paris.");
        assert_eq!(result.confidence_score(), 90);
        assert_eq!(result.regeneration_attempts, 0);
        assert_eq!(llm.synthesis_prompts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_refines_once_with_feedback() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![answer("France's capital is Lyon."), answer("Paris.")],
            vec![score(40, "The documents name Paris, not Lyon."), score(60, "terse")],
        ));
        let result = refinement(llm.clone(), 1).run("Capital of France?", &passages(), &[]).await;

        assert_eq!(result.answer, "Paris.");
        assert_eq!(result.confidence_score(), 60);
        assert_eq!(result.regeneration_attempts, 1);

        let prompts = llm.synthesis_prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("The documents name Paris, not Lyon."));
        assert!(prompts[1].contains("France's capital is Lyon."));
    }

    #[tokio::test]
    async fn test_all_low_scores_stop_after_max_attempts() {
        // one more answer and score than allowed, so an extra pass would succeed
        let llm = Arc::new(ScriptedLlm::new(
            (1..=5).map(|i| answer(&format!("draft {}", i))).collect(),
            (1..=5).map(|i| score(10 * i, "weak support")).collect(),
        ));
        let result = refinement(llm.clone(), 3).run("q", &passages(), &[]).await;

        assert_eq!(llm.synthesis_prompts.lock().len(), 4);
        assert_eq!(*llm.evaluations.lock(), 4);
        assert_eq!(result.regeneration_attempts, 3);
        assert_eq!(result.answer, "draft 4");
        assert_eq!(result.confidence_score(), 40);
    }

    #[tokio::test]
    async fn test_last_attempt_wins_even_if_worse() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![answer("first"), answer("second")],
            vec![score(70, "close"), score(20, "worse")],
        ));
        let result = refinement(llm, 1).run("q", &passages(), &[]).await;
        assert_eq!(result.answer, "second");
        assert_eq!(result.confidence_score(), 20);
    }

    #[tokio::test]
    async fn test_unevaluated_answer_is_not_refined() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![answer("Paris.")],
            vec![Err(Error::Llm("provider down".into()))],
        ));
        let result = refinement(llm.clone(), 1).run("q", &passages(), &[]).await;

        assert_eq!(result.confidence_score(), -1);
        assert_eq!(result.regeneration_attempts, 0);
        assert_eq!(llm.synthesis_prompts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_sentinel_skips_evaluation() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![json!({"answer": "Insufficient information", "citations": []})],
            vec![],
        ));
        let result = refinement(llm, 1).run("Who won the 1998 World Cup?", &passages(), &[]).await;

        assert!(result.is_insufficient_information());
        let confidence = result.confidence.unwrap();
        assert_eq!(confidence.confidence_score, -1);
        assert_eq!(confidence.reasoning, crate::NOT_ENOUGH_INFORMATION);
    }

    #[tokio::test]
    async fn test_zero_attempts_disables_refinement() {
        let llm = Arc::new(ScriptedLlm::new(vec![answer("Lyon.")], vec![score(10, "wrong")]));
        let result = refinement(llm, 0).run("q", &passages(), &[]).await;
        assert_eq!(result.answer, "Lyon.");
        assert_eq!(result.regeneration_attempts, 0);
    }
}
