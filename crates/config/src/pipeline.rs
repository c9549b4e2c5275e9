//! Answering pipeline configuration

use serde::{Deserialize, Serialize};

use crate::constants::{conversation, llm, refinement};

/// Behaviour of one answered turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Messages kept in the rolling conversation window
    #[serde(default = "default_chat_memory_window")]
    pub chat_memory_window: usize,

    /// History longer than this is wiped when the topic changes
    #[serde(default = "default_topic_change_window")]
    pub topic_change_window: usize,

    /// Messages shown to the follow-up classifier
    #[serde(default = "default_classifier_history")]
    pub classifier_history: usize,

    /// Scores in [0, threshold) trigger refinement
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: i32,

    /// Extra synthesis passes allowed per turn
    #[serde(default = "default_max_regeneration_attempts")]
    pub max_regeneration_attempts: u32,

    /// Sampling temperature for answer synthesis
    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,
}

fn default_chat_memory_window() -> usize {
    conversation::CHAT_MEMORY_WINDOW
}
fn default_topic_change_window() -> usize {
    conversation::TOPIC_CHANGE_WINDOW
}
fn default_classifier_history() -> usize {
    conversation::CLASSIFIER_HISTORY
}
fn default_confidence_threshold() -> i32 {
    refinement::CONFIDENCE_THRESHOLD
}
fn default_max_regeneration_attempts() -> u32 {
    refinement::MAX_REGENERATION_ATTEMPTS
}
fn default_answer_temperature() -> f32 {
    llm::DEFAULT_TEMPERATURE
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chat_memory_window: default_chat_memory_window(),
            topic_change_window: default_topic_change_window(),
            classifier_history: default_classifier_history(),
            confidence_threshold: default_confidence_threshold(),
            max_regeneration_attempts: default_max_regeneration_attempts(),
            answer_temperature: default_answer_temperature(),
        }
    }
}
