//! Query normalizer
//!
//! Standalone questions get a grammar pass. Follow-ups get two separate
//! calls: a rewrite into a standalone question, and a topic-change check
//! that decides whether history is reset. Every failure keeps the original
//! question and never resets history.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use scripture_qa_core::{ConversationTurn, GenerateRequest, LanguageModel, OutputSchema};
use scripture_qa_llm::parse_lenient;

use crate::llm_call;
use crate::prompts;

/// Rewrites longer than this are answers, not questions
const MAX_REWRITE_CHARS: usize = 400;

/// Leading labels models put in front of the question they return
const KNOWN_LABELS: &[&str] = &[
    "question",
    "standalone question",
    "standalone",
    "corrected question",
    "corrected",
    "corrected version",
    "rewritten question",
    "rewritten",
];

/// Output of normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    /// Question used for retrieval and synthesis
    pub question: String,
    /// Whether the topic changed completely (follow-ups only)
    pub reset_history: bool,
}

pub struct QueryNormalizer {
    llm: Arc<dyn LanguageModel>,
    timeout: Duration,
    history_window: usize,
    topic_schema: OutputSchema,
}

impl QueryNormalizer {
    pub fn new(llm: Arc<dyn LanguageModel>, timeout: Duration, history_window: usize) -> Self {
        Self {
            llm,
            timeout,
            history_window,
            topic_schema: OutputSchema::new(
                "topic_change",
                "Whether the new question abandons the conversation's topic",
                json!({
                    "type": "object",
                    "properties": {
                        "reset_history": { "type": "boolean" }
                    },
                    "required": ["reset_history"],
                    "additionalProperties": false
                }),
            ),
        }
    }

    pub async fn normalize(
        &self,
        question: &str,
        history: &[ConversationTurn],
        is_follow_up: bool,
    ) -> NormalizedQuery {
        if !is_follow_up {
            return NormalizedQuery {
                question: self.correct_grammar(question).await,
                reset_history: false,
            };
        }

        let recent = &history[history.len().saturating_sub(self.history_window)..];
        let rewritten = self.rewrite(question, recent).await;
        let reset_history = self.topic_changed(question, recent).await;

        tracing::debug!(
            original = question,
            rewritten = %rewritten,
            reset_history,
            "Follow-up normalized"
        );

        NormalizedQuery {
            question: rewritten,
            reset_history,
        }
    }

    async fn correct_grammar(&self, question: &str) -> String {
        let request = GenerateRequest::new(prompts::GRAMMAR_SYSTEM)
            .with_user_message(prompts::grammar_user(question))
            .with_temperature(0.0);

        match llm_call::generate_text(self.llm.as_ref(), request, self.timeout, "grammar").await {
            Ok(text) => accept_rewrite(question, &text).unwrap_or_else(|| {
                tracing::warn!(output = %text, "Unusable grammar correction, keeping question");
                question.to_string()
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Grammar correction failed, keeping question");
                question.to_string()
            },
        }
    }

    async fn rewrite(&self, question: &str, history: &[ConversationTurn]) -> String {
        let request = GenerateRequest::new(prompts::REWRITE_SYSTEM)
            .with_user_message(prompts::rewrite_user(question, history))
            .with_temperature(0.0);

        match llm_call::generate_text(self.llm.as_ref(), request, self.timeout, "rewrite").await {
            Ok(text) => accept_rewrite(question, &text).unwrap_or_else(|| {
                tracing::warn!(output = %text, "Unusable follow-up rewrite, keeping question");
                question.to_string()
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Follow-up rewrite failed, keeping question");
                question.to_string()
            },
        }
    }

    async fn topic_changed(&self, question: &str, history: &[ConversationTurn]) -> bool {
        let request = GenerateRequest::new(prompts::TOPIC_CHANGE_SYSTEM)
            .with_user_message(prompts::topic_change_user(question, history))
            .with_temperature(0.0)
            .with_max_tokens(32);

        let result = llm_call::generate_structured(
            self.llm.as_ref(),
            request,
            &self.topic_schema,
            self.timeout,
            "topic_change",
        )
        .await;

        let value = match result {
            Ok(value) => Some(value),
            Err(e) => {
                let salvaged = e.schema_payload().and_then(parse_lenient);
                if salvaged.is_none() {
                    tracing::warn!(error = %e, "Topic change check failed, keeping history");
                }
                salvaged
            },
        };

        match value.as_ref().and_then(|v| v.get("reset_history")) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// Clean model output into a question, or `None` when it is unusable.
///
/// Strips wrapping quotes and a known leading label such as
/// "Standalone question:"; rejects empty output and output too long to be
/// a single question.
fn accept_rewrite(original: &str, output: &str) -> Option<String> {
    let mut text = output.trim();

    if let Some(first_line) = text.lines().find(|l| !l.trim().is_empty()) {
        text = first_line.trim();
    }

    text = strip_label(text);

    let text = text.trim_matches(|c: char| c == '"' || c == '\'' || c == '`').trim();

    if text.is_empty() {
        return None;
    }
    if text.chars().count() > MAX_REWRITE_CHARS {
        tracing::debug!(original, length = text.chars().count(), "Rewrite too long");
        return None;
    }
    Some(text.to_string())
}

/// Remove a leading label only when it is one of the known forms
fn strip_label(text: &str) -> &str {
    let Some((label, rest)) = text.split_once(':') else {
        return text;
    };
    let label = label
        .trim()
        .trim_matches(|c: char| c == '*' || c == '"')
        .to_lowercase();
    if label.contains('?') || !KNOWN_LABELS.contains(&label.as_str()) {
        return text;
    }
    rest.trim().trim_start_matches('*').trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_rewrite_cleans_labels() {
        assert_eq!(
            accept_rewrite("and its population?", "Standalone question: \"What is the population of Paris?\""),
            Some("What is the population of Paris?".to_string())
        );
        assert_eq!(
            accept_rewrite("who were pandavas", "Who were the Pandavas?\n\nThe Pandavas were..."),
            Some("Who were the Pandavas?".to_string())
        );
    }

    #[test]
    fn test_accept_rewrite_rejects_unusable() {
        assert_eq!(accept_rewrite("who is rama", "   "), None);
        let essay = "Rama is the seventh avatar of Vishnu. ".repeat(20);
        assert_eq!(accept_rewrite("who is rama", &essay), None);
    }

    #[test]
    fn test_accept_rewrite_accepts_long_rewrite_of_short_follow_up() {
        let rewrite = "Why did Bhishma take the vow of lifelong celibacy in the Adi Parva?";
        assert_eq!(accept_rewrite("why?", rewrite), Some(rewrite.to_string()));
    }

    #[test]
    fn test_accept_rewrite_keeps_question_words_before_colon() {
        let q = "What was the Yaksha's question: who is truly happy?";
        assert_eq!(accept_rewrite(q, q), Some(q.to_string()));

        let q = "Corrected by whom: the sage or the king?";
        assert_eq!(accept_rewrite(q, q), Some(q.to_string()));

        assert_eq!(
            accept_rewrite("who is karna", "**Corrected question:** Who is Karna?"),
            Some("Who is Karna?".to_string())
        );
    }

    #[test]
    fn test_accept_rewrite_keeps_colons_in_questions() {
        assert_eq!(
            accept_rewrite("what does gita 2:47 say", "What does Bhagavad Gita 2:47 say?"),
            Some("What does Bhagavad Gita 2:47 say?".to_string())
        );
    }
}
