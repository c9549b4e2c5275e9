//! Session Management
//!
//! Bounded in-memory registry of conversation sessions. Each session owns
//! its conversation history; sessions idle longer than the configured
//! timeout are evicted by a background task.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use scripture_qa_agent::{AnswerPipeline, Session};
use scripture_qa_core::ConversationTurn;

use crate::ServerError;

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    pipeline: Arc<AnswerPipeline>,
    max_sessions: usize,
    session_timeout: Duration,
    cleanup_interval: Duration,
}

impl SessionManager {
    pub fn new(pipeline: Arc<AnswerPipeline>, max_sessions: usize, session_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pipeline,
            max_sessions,
            session_timeout,
            cleanup_interval: (session_timeout / 6).max(Duration::from_secs(1)),
        }
    }

    /// Start a background task that periodically evicts idle sessions.
    ///
    /// Send `true` on the returned channel to stop it.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = manager.cleanup_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let removed = manager.cleanup_expired();
                        if removed > 0 {
                            tracing::info!(removed, remaining = manager.count(), "Evicted idle sessions");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Open a session, optionally seeded with a prior chat history
    pub fn create(&self, chat_history: Vec<ConversationTurn>) -> Result<Arc<Session>, ServerError> {
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.max_sessions {
            self.cleanup_expired_internal(&mut sessions);
            if sessions.len() >= self.max_sessions {
                return Err(ServerError::SessionLimit(self.max_sessions));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::with_history(id.clone(), self.pipeline.clone(), chat_history));
        sessions.insert(id.clone(), session.clone());
        metrics::gauge!("scripture_qa_active_sessions").set(sessions.len() as f64);

        tracing::info!(session_id = %id, "Created session");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Session>, ServerError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::SessionNotFound(id.to_string()))
    }

    /// Close a session; returns whether it existed
    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id).is_some();
        if removed {
            metrics::gauge!("scripture_qa_active_sessions").set(sessions.len() as f64);
            tracing::info!(session_id = %id, "Removed session");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Evict idle sessions, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write();
        self.cleanup_expired_internal(&mut sessions)
    }

    fn cleanup_expired_internal(&self, sessions: &mut HashMap<String, Arc<Session>>) -> usize {
        let timeout = self.session_timeout;
        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = !session.is_expired(timeout);
            if !keep {
                tracing::info!(session_id = %id, "Expired session");
            }
            keep
        });
        let removed = before - sessions.len();
        if removed > 0 {
            metrics::gauge!("scripture_qa_active_sessions").set(sessions.len() as f64);
        }
        removed
    }
}
