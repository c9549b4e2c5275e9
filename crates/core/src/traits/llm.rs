//! Language model trait

use crate::{GenerateRequest, GenerateResponse, OutputSchema, Result};
use async_trait::async_trait;

/// Language model interface
///
/// Implementations:
/// - `OllamaBackend` - local Ollama inference
/// - `OpenAIBackend` - OpenAI / Azure OpenAI chat completions
/// - `ClaudeBackend` - Anthropic messages API
///
/// # Example
///
/// ```ignore
/// let llm: Arc<dyn LanguageModel> = LlmFactory::create(&config)?;
/// let request = GenerateRequest::new("You answer questions about the epics")
///     .with_user_message("Who was Bharata?");
/// let response = llm.generate(request).await?;
/// ```
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Free-form generation
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;

    /// Schema-constrained generation
    ///
    /// Returns the parsed JSON value when it validates against `schema`.
    /// When the provider output does not parse or validate, returns
    /// `Error::SchemaValidation` carrying the raw payload.
    async fn generate_structured(
        &self,
        request: GenerateRequest,
        schema: &OutputSchema,
    ) -> Result<serde_json::Value>;

    /// Check if the backend is reachable and the model is loaded
    async fn is_available(&self) -> bool;

    /// Model name for logging
    fn model_name(&self) -> &str;
}
