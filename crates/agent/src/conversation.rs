//! Conversation state management
//!
//! The persisted history is a plain list of `{role, content}` turns. After
//! every answered turn the history is either reset (complete topic change on
//! a long conversation) or trimmed to the most recent window, then the new
//! user and assistant turns are appended.

use serde::{Deserialize, Serialize};

use scripture_qa_config::PipelineConfig;
use scripture_qa_core::{AnswerResult, ConversationTurn};

/// Ordered conversation history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationState {
    turns: Vec<ConversationTurn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn into_turns(self) -> Vec<ConversationTurn> {
        self.turns
    }
}

/// Applies the window and reset rules to a `ConversationState`
#[derive(Debug, Clone, Copy)]
pub struct ConversationStateManager {
    chat_memory_window: usize,
    topic_change_window: usize,
}

impl ConversationStateManager {
    pub fn new(chat_memory_window: usize, topic_change_window: usize) -> Self {
        Self {
            chat_memory_window,
            topic_change_window,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.chat_memory_window, config.topic_change_window)
    }

    /// History visible to a turn: the most recent `chat_memory_window` entries
    pub fn recent<'a>(&self, state: &'a ConversationState) -> &'a [ConversationTurn] {
        let turns = state.turns();
        &turns[turns.len().saturating_sub(self.chat_memory_window)..]
    }

    /// Record an answered turn.
    ///
    /// The reset decision looks at the length before any trimming: history
    /// is cleared only when `reset_history` is set and it holds more than
    /// `topic_change_window` entries.
    pub(crate) fn commit_turn(
        &self,
        state: &mut ConversationState,
        question: &str,
        answer: AnswerResult,
        reset_history: bool,
    ) {
        let previous_len = state.turns.len();

        if reset_history && previous_len > self.topic_change_window {
            tracing::info!(previous_len, "Topic changed, clearing conversation history");
            state.turns.clear();
        } else if previous_len > self.chat_memory_window {
            state.turns.drain(..previous_len - self.chat_memory_window);
        }

        state.turns.push(ConversationTurn::user(question));
        state.turns.push(ConversationTurn::answer(answer));
    }
}

impl Default for ConversationStateManager {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(n: usize) -> ConversationState {
        ConversationState::from_turns(
            (0..n)
                .map(|i| {
                    if i % 2 == 0 {
                        ConversationTurn::user(format!("q{}", i))
                    } else {
                        ConversationTurn::assistant(format!("a{}", i))
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn test_window_trims_oldest() {
        let manager = ConversationStateManager::new(10, 6);
        let mut state = state_with(12);

        manager.commit_turn(&mut state, "next", AnswerResult::new("ok", vec![]), false);

        assert_eq!(state.len(), 12);
        assert_eq!(state.turns()[0].text(), "q2");
        assert_eq!(state.turns()[10].text(), "next");
        assert_eq!(state.turns()[11].text(), "ok");
    }

    #[test]
    fn test_reset_requires_long_history() {
        let manager = ConversationStateManager::new(10, 6);

        let mut short = state_with(6);
        manager.commit_turn(&mut short, "new topic", AnswerResult::new("ok", vec![]), true);
        assert_eq!(short.len(), 8);

        let mut long = state_with(7);
        manager.commit_turn(&mut long, "new topic", AnswerResult::new("ok", vec![]), true);
        assert_eq!(long.len(), 2);
        assert_eq!(long.turns()[0].text(), "new topic");
    }

    #[test]
    fn test_reset_uses_length_before_trimming() {
        let manager = ConversationStateManager::new(4, 6);
        let mut state = state_with(8);

        manager.commit_turn(&mut state, "elsewhere", AnswerResult::new("ok", vec![]), true);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_recent_view() {
        let manager = ConversationStateManager::new(3, 6);
        let state = state_with(5);
        let recent = manager.recent(&state);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text(), "q2");
        assert!(manager.recent(&ConversationState::new()).is_empty());
    }

    #[test]
    fn test_state_serializes_as_list() {
        let mut state = ConversationState::new();
        ConversationStateManager::default().commit_turn(
            &mut state,
            "Who was Karna?",
            AnswerResult::insufficient_information(),
            false,
        );

        let json = serde_json::to_value(&state).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["role"], "user");
        assert_eq!(json[1]["content"]["answer"], "Insufficient information");

        let back: ConversationState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
