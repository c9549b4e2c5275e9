//! Dialogue turn classifier
//!
//! Decides whether a new question is a follow-up to the recent history.
//! Any failure or unclear answer counts as "not a follow-up": the question
//! then only gets a grammar pass instead of a history-based rewrite.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use scripture_qa_core::{ConversationTurn, GenerateRequest, LanguageModel, OutputSchema};
use scripture_qa_llm::parse_lenient;

use crate::llm_call;
use crate::prompts;

pub struct DialogueTurnClassifier {
    llm: Arc<dyn LanguageModel>,
    timeout: Duration,
    /// Most recent turns shown to the model
    history_window: usize,
    schema: OutputSchema,
}

impl DialogueTurnClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>, timeout: Duration, history_window: usize) -> Self {
        Self {
            llm,
            timeout,
            history_window,
            schema: Self::output_schema(),
        }
    }

    fn output_schema() -> OutputSchema {
        OutputSchema::new(
            "follow_up_classification",
            "Whether the new question is a follow-up to the conversation",
            json!({
                "type": "object",
                "properties": {
                    "is_follow_up": { "type": "boolean" }
                },
                "required": ["is_follow_up"],
                "additionalProperties": false
            }),
        )
    }

    /// Classify the question. One model call, no retries.
    pub async fn is_follow_up(&self, question: &str, history: &[ConversationTurn]) -> bool {
        if history.is_empty() {
            return false;
        }

        let recent = &history[history.len().saturating_sub(self.history_window)..];
        let request = GenerateRequest::new(prompts::CLASSIFIER_SYSTEM)
            .with_user_message(prompts::classifier_user(question, recent))
            .with_temperature(0.0)
            .with_max_tokens(32);

        let result = llm_call::generate_structured(
            self.llm.as_ref(),
            request,
            &self.schema,
            self.timeout,
            "classifier",
        )
        .await;

        let decision = match result {
            Ok(value) => interpret(&value),
            Err(e) => match e.schema_payload() {
                Some(raw) => interpret_raw(raw),
                None => {
                    tracing::warn!(error = %e, "Follow-up classification failed, treating as standalone");
                    None
                },
            },
        };

        match decision {
            Some(is_follow_up) => {
                tracing::debug!(is_follow_up, "Turn classified");
                is_follow_up
            },
            None => {
                tracing::warn!("Ambiguous follow-up classification, treating as standalone");
                false
            },
        }
    }
}

/// Read a yes/no answer out of a structured result
fn interpret(value: &Value) -> Option<bool> {
    match value.get("is_follow_up").unwrap_or(value) {
        Value::Bool(b) => Some(*b),
        Value::String(s) => parse_yes_no(s),
        _ => None,
    }
}

/// Structured parse first, then plain yes/no text
fn interpret_raw(raw: &str) -> Option<bool> {
    parse_lenient(raw)
        .as_ref()
        .and_then(interpret)
        .or_else(|| parse_yes_no(raw))
}

/// `yes`/`true` ⇒ true, `no`/`false` ⇒ false, case-insensitive, first word only
fn parse_yes_no(text: &str) -> Option<bool> {
    let first = text
        .trim()
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())?
        .to_lowercase();
    match first.as_str() {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_structured() {
        assert_eq!(interpret(&json!({"is_follow_up": true})), Some(true));
        assert_eq!(interpret(&json!({"is_follow_up": "No"})), Some(false));
        assert_eq!(interpret(&json!({"is_follow_up": 1})), None);
        assert_eq!(interpret(&json!(true)), Some(true));
    }

    #[test]
    fn test_interpret_raw() {
        assert_eq!(interpret_raw("```json\n{\"is_follow_up\": true"), Some(true));
        assert_eq!(interpret_raw("Yes, it refers to Paris."), Some(true));
        assert_eq!(interpret_raw("FALSE"), Some(false));
        assert_eq!(interpret_raw("It might be"), None);
        assert_eq!(interpret_raw(""), None);
    }
}
