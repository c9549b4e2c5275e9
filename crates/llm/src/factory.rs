//! LLM factory
//!
//! Builds the configured provider once at startup. The pipeline receives
//! an `Arc<dyn LanguageModel>` and never dispatches on the provider again.
//!
//! ## Example
//! ```ignore
//! let config = LlmProviderConfig::from_settings(&settings.llm)?;
//! let llm = LlmFactory::create(&config)?;
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use scripture_qa_config::constants::{endpoints, llm, timeouts};
use scripture_qa_config::LlmSettings;
use scripture_qa_core::LanguageModel;

use crate::backend::{LlmConfig, OllamaBackend, OpenAIBackend, OpenAIConfig};
use crate::claude::{ClaudeBackend, ClaudeConfig};
use crate::LlmError;

/// Default Azure OpenAI API version (first with json_schema response format)
const AZURE_API_VERSION: &str = "2024-08-01-preview";

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    /// Ollama - local models
    #[default]
    Ollama,
    /// OpenAI or any OpenAI-compatible server
    OpenAI,
    /// Azure-hosted OpenAI deployments
    AzureOpenAI,
    /// Anthropic Claude
    Claude,
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" | "local" => Ok(LlmProvider::Ollama),
            "openai" | "gpt" => Ok(LlmProvider::OpenAI),
            "azure" | "azure_openai" | "azure-openai" => Ok(LlmProvider::AzureOpenAI),
            "claude" | "anthropic" => Ok(LlmProvider::Claude),
            other => Err(LlmError::Configuration(format!("Unknown LLM provider '{}'", other))),
        }
    }
}

/// Unified LLM provider configuration
#[derive(Debug, Clone)]
pub struct LlmProviderConfig {
    pub provider: LlmProvider,
    /// API key (Claude / OpenAI / Azure)
    pub api_key: Option<String>,
    /// Endpoint override
    pub endpoint: Option<String>,
    /// Model name, alias, or Azure deployment
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Azure API version
    pub azure_api_version: Option<String>,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            api_key: None,
            endpoint: None,
            model: llm::DEFAULT_MODEL.to_string(),
            max_tokens: llm::DEFAULT_MAX_TOKENS,
            temperature: llm::DEFAULT_TEMPERATURE,
            timeout: Duration::from_millis(timeouts::LLM_REQUEST_MS),
            max_retries: llm::DEFAULT_MAX_RETRIES,
            azure_api_version: None,
        }
    }
}

impl LlmProviderConfig {
    /// Build from the `llm` settings section
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, LlmError> {
        Ok(Self {
            provider: settings.provider.parse()?,
            api_key: settings.api_key.clone(),
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout: Duration::from_millis(settings.timeout_ms),
            max_retries: settings.max_retries,
            azure_api_version: settings.api_version.clone(),
        })
    }

    pub fn ollama(model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::Ollama,
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            api_key: Some(api_key.into()),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn claude(api_key: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::Claude,
            api_key: Some(api_key.into()),
            model: "sonnet".to_string(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Factory for creating LLM backends
pub struct LlmFactory;

impl LlmFactory {
    /// Create the configured `LanguageModel`
    pub fn create(config: &LlmProviderConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
        let model: Arc<dyn LanguageModel> = match config.provider {
            LlmProvider::Ollama => {
                let backend = OllamaBackend::new(LlmConfig {
                    model: config.model.clone(),
                    endpoint: config
                        .endpoint
                        .clone()
                        .unwrap_or_else(|| endpoints::OLLAMA_DEFAULT.to_string()),
                    max_tokens: config.max_tokens,
                    temperature: config.temperature,
                    timeout: config.timeout,
                    max_retries: config.max_retries,
                    ..Default::default()
                })?;
                Arc::new(backend)
            },

            LlmProvider::OpenAI => {
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                    .unwrap_or_default();
                let mut openai = OpenAIConfig::openai(api_key, &config.model);
                if let Some(endpoint) = &config.endpoint {
                    openai.endpoint = endpoint.clone();
                }
                openai.max_tokens = config.max_tokens;
                openai.temperature = config.temperature;
                openai.timeout = config.timeout;
                openai.max_retries = config.max_retries;
                Arc::new(OpenAIBackend::new(openai)?)
            },

            LlmProvider::AzureOpenAI => {
                let endpoint = config.endpoint.clone().ok_or_else(|| {
                    LlmError::Configuration("Azure OpenAI requires endpoint".to_string())
                })?;
                let api_key = config.api_key.clone().ok_or_else(|| {
                    LlmError::Configuration("Azure OpenAI requires api_key".to_string())
                })?;
                let api_version = config
                    .azure_api_version
                    .clone()
                    .unwrap_or_else(|| AZURE_API_VERSION.to_string());

                let mut azure = OpenAIConfig::azure(endpoint, api_key, &config.model, api_version);
                azure.max_tokens = config.max_tokens;
                azure.temperature = config.temperature;
                azure.timeout = config.timeout;
                azure.max_retries = config.max_retries;
                Arc::new(OpenAIBackend::new(azure)?)
            },

            LlmProvider::Claude => {
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                    .ok_or_else(|| {
                        LlmError::Configuration("Claude requires ANTHROPIC_API_KEY".to_string())
                    })?;

                let mut claude = ClaudeConfig::new(api_key)
                    .with_model(&config.model)
                    .with_max_tokens(config.max_tokens)
                    .with_temperature(config.temperature)
                    .with_timeout(config.timeout);
                claude.max_retries = config.max_retries;
                if let Some(endpoint) = &config.endpoint {
                    claude = claude.with_endpoint(endpoint.clone());
                }
                Arc::new(ClaudeBackend::new(claude)?)
            },
        };

        tracing::info!(
            provider = ?config.provider,
            model = %model.model_name(),
            "Language model provider initialised"
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Claude".parse::<LlmProvider>().unwrap(), LlmProvider::Claude);
        assert_eq!("anthropic".parse::<LlmProvider>().unwrap(), LlmProvider::Claude);
        assert_eq!("azure_openai".parse::<LlmProvider>().unwrap(), LlmProvider::AzureOpenAI);
        assert!("gpt4all".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_from_settings() {
        let settings = LlmSettings {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: Some("sk-test".to_string()),
            timeout_ms: 5_000,
            ..Default::default()
        };
        let config = LlmProviderConfig::from_settings(&settings).unwrap();
        assert_eq!(config.provider, LlmProvider::OpenAI);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_create_ollama() {
        let llm = LlmFactory::create(&LlmProviderConfig::ollama("llama3.1:8b")).unwrap();
        assert_eq!(llm.model_name(), "llama3.1:8b");
    }

    #[test]
    fn test_create_claude_resolves_alias() {
        let llm = LlmFactory::create(&LlmProviderConfig::claude("test-key").with_model("haiku")).unwrap();
        assert_eq!(llm.model_name(), "claude-3-5-haiku-20241022");
    }

    #[test]
    fn test_azure_requires_endpoint() {
        let config = LlmProviderConfig {
            provider: LlmProvider::AzureOpenAI,
            api_key: Some("key".to_string()),
            ..Default::default()
        };
        assert!(LlmFactory::create(&config).is_err());
    }
}
