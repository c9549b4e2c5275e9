//! Conversation session
//!
//! A session owns one `ConversationState` for its whole lifetime. Turns are
//! serialized by an async mutex held across the full pipeline run, so two
//! questions sent to the same session never interleave.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use scripture_qa_core::ConversationTurn;

use crate::conversation::ConversationState;
use crate::pipeline::{AnswerPipeline, TurnOutcome};
use crate::AgentError;

/// One answered turn with the history as it stood right after it
#[derive(Debug, Clone)]
pub struct SessionReply {
    pub outcome: TurnOutcome,
    pub chat_history: Vec<ConversationTurn>,
}

pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pipeline: Arc<AnswerPipeline>,
    state: Mutex<ConversationState>,
    last_activity: RwLock<Instant>,
}

impl Session {
    /// New session with an empty history and a random id
    pub fn new(pipeline: Arc<AnswerPipeline>) -> Self {
        Self::with_history(uuid::Uuid::new_v4().to_string(), pipeline, Vec::new())
    }

    /// Resume a conversation from a caller-supplied history
    pub fn with_history(
        id: impl Into<String>,
        pipeline: Arc<AnswerPipeline>,
        chat_history: Vec<ConversationTurn>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            pipeline,
            state: Mutex::new(ConversationState::from_turns(chat_history)),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    /// Answer a question in this session's conversation.
    ///
    /// Waits for any turn already in flight on this session. The returned
    /// history is captured before the lock is released.
    pub async fn ask(&self, question: &str) -> Result<SessionReply, AgentError> {
        self.touch();
        let mut state = self.state.lock().await;
        let outcome = self.pipeline.answer(question, &mut state).await;
        self.touch();

        match outcome {
            Ok(outcome) => Ok(SessionReply {
                outcome,
                chat_history: state.turns().to_vec(),
            }),
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Turn failed");
                Err(e)
            },
        }
    }

    /// Current chat history
    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.state.lock().await.turns().to_vec()
    }

    pub async fn turn_count(&self) -> usize {
        self.state.lock().await.len()
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    pub fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.idle_for() > idle_timeout
    }
}
