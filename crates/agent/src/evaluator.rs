//! Confidence evaluator
//!
//! Scores how well an answer is supported by the passages it was written
//! from. The "Insufficient information" sentinel is never sent to the model.
//! An evaluation that cannot be obtained scores -1, which never triggers
//! refinement.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use scripture_qa_core::{
    AnswerResult, ConfidenceScore, ConversationTurn, GenerateRequest, LanguageModel, OutputSchema,
    RetrievedPassage,
};
use scripture_qa_llm::parse_lenient;

use crate::llm_call;
use crate::prompts;
use crate::synthesizer::DocumentCatalog;

/// Reasoning attached to the sentinel answer
pub const NOT_ENOUGH_INFORMATION: &str = "not enough information";

/// Reasoning attached when no score could be obtained
pub const COULD_NOT_EVALUATE: &str = "could not evaluate";

pub struct ConfidenceEvaluator {
    llm: Arc<dyn LanguageModel>,
    timeout: Duration,
    schema: OutputSchema,
}

impl ConfidenceEvaluator {
    pub fn new(llm: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self {
            llm,
            timeout,
            schema: OutputSchema::new(
                "confidence",
                "How well the answer is supported by the documents",
                json!({
                    "type": "object",
                    "properties": {
                        "confidence_score": { "type": "integer" },
                        "reasoning": { "type": "string" }
                    },
                    "required": ["confidence_score", "reasoning"],
                    "additionalProperties": false
                }),
            ),
        }
    }

    pub async fn evaluate(
        &self,
        question: &str,
        answer: &AnswerResult,
        passages: &[RetrievedPassage],
        history: &[ConversationTurn],
    ) -> ConfidenceScore {
        if answer.is_insufficient_information() {
            return ConfidenceScore::not_evaluated(NOT_ENOUGH_INFORMATION);
        }

        let catalog = DocumentCatalog::from_passages(passages);
        let user_prompt = prompts::evaluation_user(question, &answer.answer, &catalog, history);

        let request = GenerateRequest::new(prompts::EVALUATION_SYSTEM)
            .with_user_message(user_prompt.clone())
            .with_temperature(0.0);

        let result = llm_call::generate_structured(
            self.llm.as_ref(),
            request,
            &self.schema,
            self.timeout,
            "evaluation",
        )
        .await;

        match result {
            Ok(value) => {
                if let Some(score) = score_from_value(&value) {
                    return score;
                }
                tracing::warn!("Structured evaluation had no usable score");
            },
            Err(e) => match e.schema_payload() {
                Some(raw) => {
                    if let Some(score) = salvage_score(raw) {
                        record_salvage("payload");
                        return score;
                    }
                    tracing::warn!(error = %e, "Evaluation payload could not be salvaged");
                },
                None => {
                    tracing::warn!(error = %e, "Evaluation failed");
                    record_salvage("unevaluated");
                    return ConfidenceScore::not_evaluated(COULD_NOT_EVALUATE);
                },
            },
        }

        self.evaluate_unconstrained(&user_prompt).await
    }

    async fn evaluate_unconstrained(&self, user_prompt: &str) -> ConfidenceScore {
        let system = format!(
            "{}\n\n{}\nThe object must match this JSON schema:\n{}",
            prompts::EVALUATION_SYSTEM,
            prompts::JSON_ONLY_SUFFIX,
            self.schema.schema
        );
        let request = GenerateRequest::new(system)
            .with_user_message(user_prompt)
            .with_temperature(0.0);

        let salvaged = match llm_call::generate_text(
            self.llm.as_ref(),
            request,
            self.timeout,
            "evaluation_unconstrained",
        )
        .await
        {
            Ok(text) => salvage_score(&text),
            Err(e) => {
                tracing::warn!(error = %e, "Unconstrained evaluation failed");
                None
            },
        };

        match salvaged {
            Some(score) => {
                record_salvage("unconstrained");
                score
            },
            None => {
                record_salvage("unevaluated");
                ConfidenceScore::not_evaluated(COULD_NOT_EVALUATE)
            },
        }
    }
}

fn record_salvage(outcome: &'static str) {
    metrics::counter!("scripture_qa_salvage_total", "stage" => "evaluation", "outcome" => outcome)
        .increment(1);
}

/// Tolerant parse of a malformed evaluation payload
pub fn salvage_score(raw: &str) -> Option<ConfidenceScore> {
    parse_lenient(raw).as_ref().and_then(score_from_value)
}

/// Score from a JSON value; accepts integers, floats and numeric strings
fn score_from_value(value: &Value) -> Option<ConfidenceScore> {
    let score = match value.get("confidence_score")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
        _ => return None,
    };
    if !score.is_finite() {
        return None;
    }
    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(ConfidenceScore::new(score.round() as i32, reasoning))
}
