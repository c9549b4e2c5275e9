//! Application State
//!
//! Shared state across all handlers. Everything here is built once at
//! startup and read-only afterwards, apart from the session registry.

use std::sync::Arc;

use scripture_qa_agent::AnswerPipeline;
use scripture_qa_config::Settings;
use scripture_qa_core::LanguageModel;

use crate::session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub sessions: Arc<SessionManager>,
    /// Provider behind the pipeline, kept for health checks
    pub llm: Arc<dyn LanguageModel>,
}

impl AppState {
    pub fn new(config: Settings, pipeline: Arc<AnswerPipeline>, llm: Arc<dyn LanguageModel>) -> Self {
        let sessions = Arc::new(SessionManager::new(
            pipeline,
            config.server.max_sessions,
            std::time::Duration::from_secs(config.server.session_idle_secs),
        ));
        Self {
            config: Arc::new(config),
            sessions,
            llm,
        }
    }
}
