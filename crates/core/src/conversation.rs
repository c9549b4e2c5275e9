//! Conversation turn types

use crate::answer::AnswerResult;
use crate::llm_types::{Message, Role};
use serde::{Deserialize, Serialize};

/// Turn role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
            TurnRole::System => write!(f, "system"),
        }
    }
}

/// Turn content: plain text or a structured answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Answer(AnswerResult),
}

impl TurnContent {
    /// Text shown to a language model for this turn
    pub fn as_text(&self) -> &str {
        match self {
            TurnContent::Text(text) => text,
            TurnContent::Answer(answer) => &answer.answer,
        }
    }

    pub fn as_answer(&self) -> Option<&AnswerResult> {
        match self {
            TurnContent::Answer(answer) => Some(answer),
            TurnContent::Text(_) => None,
        }
    }
}

/// A single conversation turn, serialized as `{role, content}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: TurnContent,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn answer(answer: AnswerResult) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: TurnContent::Answer(answer),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_text()
    }

    /// Convert to a chat message for prompt construction
    pub fn to_message(&self) -> Message {
        let role = match self.role {
            TurnRole::User => Role::User,
            TurnRole::Assistant => Role::Assistant,
            TurnRole::System => Role::System,
        };
        Message {
            role,
            content: self.text().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::Citation;

    #[test]
    fn test_text_turn_serialization() {
        let turn = ConversationTurn::user("What is the capital of France?");
        let json = serde_json::to_string(&turn).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"What is the capital of France?"}"#);
    }

    #[test]
    fn test_answer_turn_roundtrip() {
        let answer = AnswerResult::new("Paris.", vec![Citation::new("Atlas", 1, vec![3])]);
        let turn = ConversationTurn::answer(answer.clone());

        let json = serde_json::to_string(&turn).unwrap();
        let back: ConversationTurn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, TurnRole::Assistant);
        assert_eq!(back.content.as_answer(), Some(&answer));
        assert_eq!(back.text(), "Paris.");
    }

    #[test]
    fn test_to_message() {
        let msg = ConversationTurn::assistant("Paris.").to_message();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "Paris.");
    }
}
