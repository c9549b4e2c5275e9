//! Prompt templates for every language model call in a turn
//!
//! Each stage has its own system prompt. History and passages are rendered
//! into the user message so every provider sees the same text.

use scripture_qa_core::answer::INSUFFICIENT_INFORMATION;
use scripture_qa_core::ConversationTurn;

use crate::synthesizer::{DocumentCatalog, RefinementFeedback};

pub const CLASSIFIER_SYSTEM: &str = "You decide whether a user's new question is a follow-up \
to the conversation so far. A follow-up depends on earlier turns to be understood: it uses \
pronouns or references such as \"he\", \"it\", \"that war\", or continues the previous topic \
in an elliptical way (\"and his brothers?\"). A question that can be understood on its own is \
not a follow-up, even if it is about the same subject. Set is_follow_up accordingly.";

pub const GRAMMAR_SYSTEM: &str = "You correct the grammar and spelling of a question about \
translated religious texts. Keep the meaning, names and scope exactly as they are. Do not \
answer the question and do not add information. Reply with the corrected question only.";

pub const REWRITE_SYSTEM: &str = "You rewrite a follow-up question into a standalone question \
using the conversation history. If the question continues the conversation's topic, replace \
every pronoun or vague reference (\"he\", \"it\", \"that\", \"they\") with the person, place or \
thing it refers to in the history. If the question changes the topic completely, return it \
exactly as written. Do not answer the question. Reply with the question only.";

pub const TOPIC_CHANGE_SYSTEM: &str = "You decide whether a user's new question moves to a \
completely different topic from the conversation so far. Asking about a different aspect of \
the same person, event or text is not a topic change. Only set reset_history to true when \
nothing in the history is relevant to the new question.";

pub const SYNTHESIS_SYSTEM: &str = "You answer questions about translated religious texts \
using only the numbered documents provided. Rules:\n\
- Base every statement on the documents. Do not use outside knowledge.\n\
- Cite each document you used with its document_name and document_number exactly as given, \
and the page numbers you drew from.\n\
- Never cite a document that is not in the list.\n\
- If the documents do not contain the answer, set answer to \"Insufficient information\" and \
return no citations.";

pub const EVALUATION_SYSTEM: &str = "You grade how well an answer is supported by the \
documents it was written from. Score on this scale:\n\
- 90-100: every claim is fully and directly supported by the documents\n\
- 70-89: well supported with minor gaps\n\
- 50-69: partially supported\n\
- 0-49: unsupported or fabricated content\n\
Always explain your score in reasoning, naming any claims that lack support and what would \
improve the answer, even when the score is high.";

/// Appended when a schema-constrained call failed and is retried without a constraint
pub const JSON_ONLY_SUFFIX: &str = "Respond with a single JSON object and nothing else. \
Do not wrap it in code fences.";

/// Render history turns as `role: text` lines
pub fn format_history(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return "(no previous conversation)".to_string();
    }
    history
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn classifier_user(question: &str, history: &[ConversationTurn]) -> String {
    format!(
        "Conversation history:\n{}\n\nNew question: {}\n\nIs the new question a follow-up?",
        format_history(history),
        question
    )
}

pub fn grammar_user(question: &str) -> String {
    format!("Question: {}", question)
}

pub fn rewrite_user(question: &str, history: &[ConversationTurn]) -> String {
    format!(
        "Conversation history:\n{}\n\nFollow-up question: {}\n\nStandalone question:",
        format_history(history),
        question
    )
}

pub fn topic_change_user(question: &str, history: &[ConversationTurn]) -> String {
    format!(
        "Conversation history:\n{}\n\nNew question: {}\n\nHas the topic changed completely?",
        format_history(history),
        question
    )
}

pub fn synthesis_user(
    question: &str,
    catalog: &DocumentCatalog,
    history: &[ConversationTurn],
    feedback: Option<&RefinementFeedback>,
) -> String {
    let mut prompt = format!(
        "Documents:\n{}\n\nConversation history:\n{}\n\nQuestion: {}",
        catalog.render(),
        format_history(history),
        question
    );

    if let Some(feedback) = feedback {
        prompt.push_str(&format!(
            "\n\nA previous answer to this question was:\n{}\n\n\
             Suggested improvements:\n{}\n\n\
             Write an improved answer that addresses these suggestions while staying \
             within the documents.",
            feedback.previous_answer, feedback.reasoning
        ));
    }

    prompt.push_str(&format!(
        "\n\nIf the documents do not answer the question, answer \"{}\".",
        INSUFFICIENT_INFORMATION
    ));
    prompt
}

pub fn evaluation_user(
    question: &str,
    answer: &str,
    catalog: &DocumentCatalog,
    history: &[ConversationTurn],
) -> String {
    format!(
        "Documents:\n{}\n\nConversation history:\n{}\n\nQuestion: {}\n\nAnswer to grade:\n{}",
        catalog.render(),
        format_history(history),
        question,
        answer
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scripture_qa_core::{AnswerResult, Citation};

    #[test]
    fn test_format_history() {
        let history = vec![
            ConversationTurn::user("Who was Bharata?"),
            ConversationTurn::answer(AnswerResult::new(
                "A king of the lunar dynasty.",
                vec![Citation::new("Adi Parva", 1, vec![74])],
            )),
        ];
        assert_eq!(
            format_history(&history),
            "user: Who was Bharata?\nassistant: A king of the lunar dynasty."
        );
        assert_eq!(format_history(&[]), "(no previous conversation)");
    }

    #[test]
    fn test_synthesis_prompt_includes_feedback() {
        let catalog = DocumentCatalog::default();
        let feedback = RefinementFeedback {
            previous_answer: "Bhishma was a king.".to_string(),
            reasoning: "Bhishma never ruled; cite his vow.".to_string(),
        };

        let prompt = synthesis_user("Who was Bhishma?", &catalog, &[], Some(&feedback));
        assert!(prompt.contains("Suggested improvements:\nBhishma never ruled; cite his vow."));
        assert!(prompt.contains("Bhishma was a king."));

        let plain = synthesis_user("Who was Bhishma?", &catalog, &[], None);
        assert!(!plain.contains("Suggested improvements"));
    }
}
