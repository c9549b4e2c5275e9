//! LLM backend implementations
//!
//! Ollama and OpenAI-compatible chat backends. Both implement the core
//! `LanguageModel` trait directly, including schema-constrained mode:
//! - Ollama: JSON schema passed as the `format` field
//! - OpenAI / Azure: `response_format` of type `json_schema`
//!
//! Transport failures (network errors, timeouts, 5xx) are retried with
//! exponential backoff inside the client. Schema failures are not retried
//! here; they are returned to the caller with the raw payload.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use scripture_qa_config::constants::{endpoints, llm, timeouts};
use scripture_qa_core::{
    FinishReason, GenerateRequest, GenerateResponse, LanguageModel, Message, OutputSchema,
};
use serde::{Deserialize, Serialize};

use crate::schema::parse_structured;
use crate::LlmError;

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model name/ID
    pub model: String,
    /// API endpoint
    pub endpoint: String,
    /// Maximum tokens to generate (request may override)
    pub max_tokens: u32,
    /// Temperature (request may override)
    pub temperature: f32,
    /// Request timeout
    pub timeout: Duration,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
    /// Initial backoff duration (doubles each retry)
    pub initial_backoff: Duration,
    /// Keep model loaded in memory between calls ("5m", "1h", "-1")
    pub keep_alive: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: llm::DEFAULT_MODEL.to_string(),
            endpoint: endpoints::OLLAMA_DEFAULT.to_string(),
            max_tokens: llm::DEFAULT_MAX_TOKENS,
            temperature: llm::DEFAULT_TEMPERATURE,
            timeout: Duration::from_millis(timeouts::LLM_REQUEST_MS),
            max_retries: llm::DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(llm::INITIAL_BACKOFF_MS),
            keep_alive: "5m".to_string(),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or retries run out
pub(crate) async fn with_retries<T, F, Fut>(
    max_retries: u32,
    initial_backoff: Duration,
    mut op: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut backoff = initial_backoff;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tracing::warn!(
                backoff_ms = backoff.as_millis() as u64,
                attempt,
                max_retries,
                "LLM request failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => last_error = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| LlmError::Network("Max retries exceeded".to_string())))
}

/// Ollama chat backend
#[derive(Clone)]
pub struct OllamaBackend {
    client: Client,
    config: LlmConfig,
}

impl OllamaBackend {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn build_request(&self, request: &GenerateRequest, format: Option<serde_json::Value>) -> OllamaChatRequest {
        OllamaChatRequest {
            model: request.model.clone().unwrap_or_else(|| self.config.model.clone()),
            messages: request.messages.iter().map(OllamaMessage::from).collect(),
            stream: false,
            options: Some(OllamaOptions {
                temperature: Some(request.temperature.unwrap_or(self.config.temperature)),
                num_predict: Some(request.max_tokens.unwrap_or(self.config.max_tokens) as i32),
            }),
            keep_alive: Some(self.config.keep_alive.clone()),
            format,
        }
    }

    async fn chat(&self, request: &OllamaChatRequest) -> Result<OllamaChatResponse, LlmError> {
        let start = Instant::now();
        let result = with_retries(self.config.max_retries, self.config.initial_backoff, || {
            self.execute_request(request)
        })
        .await;

        tracing::debug!(
            model = %request.model,
            structured = request.format.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Ollama chat completed"
        );
        result
    }

    async fn execute_request(&self, request: &OllamaChatRequest) -> Result<OllamaChatResponse, LlmError> {
        let response = self.client.post(self.api_url("/chat")).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            // 5xx errors are retryable, 4xx are not
            if status.is_server_error() {
                return Err(LlmError::Network(format!("Server error {}: {}", status, error)));
            }
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error)));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LanguageModel for OllamaBackend {
    async fn generate(&self, request: GenerateRequest) -> scripture_qa_core::Result<GenerateResponse> {
        let body = self.build_request(&request, None);
        let response = self.chat(&body).await?;

        Ok(GenerateResponse {
            text: response.message.content,
            finish_reason: if response.done {
                FinishReason::Stop
            } else {
                FinishReason::Length
            },
        })
    }

    async fn generate_structured(
        &self,
        request: GenerateRequest,
        schema: &OutputSchema,
    ) -> scripture_qa_core::Result<serde_json::Value> {
        let body = self.build_request(&request, Some(schema.schema.clone()));
        let response = self.chat(&body).await?;
        Ok(parse_structured(&response.message.content, schema)?)
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(self.api_url("/tags"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
    /// JSON schema constraining the output
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    done: bool,
}

// =============================================================================
// OpenAI-compatible backend
// =============================================================================

/// Configuration for OpenAI-compatible backends
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API endpoint (OpenAI: https://api.openai.com/v1, Azure: resource URL)
    pub endpoint: String,
    pub api_key: String,
    /// Model name, or deployment name on Azure
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Azure API version (Azure specific)
    pub api_version: Option<String>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::OPENAI_DEFAULT.to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: llm::DEFAULT_MAX_TOKENS,
            temperature: llm::DEFAULT_TEMPERATURE,
            timeout: Duration::from_millis(timeouts::LLM_REQUEST_MS),
            max_retries: llm::DEFAULT_MAX_RETRIES,
            api_version: None,
        }
    }
}

impl OpenAIConfig {
    /// Create config for OpenAI
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Create config for Azure OpenAI
    pub fn azure(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: deployment.into(),
            api_version: Some(api_version.into()),
            ..Default::default()
        }
    }

    /// Create config for a local OpenAI-compatible server (vLLM, llama.cpp)
    pub fn local(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: "not-needed".to_string(),
            model: model.into(),
            ..Default::default()
        }
    }
}

/// OpenAI-compatible backend
///
/// Works with OpenAI, Azure OpenAI, vLLM and other servers exposing
/// `/chat/completions`.
pub struct OpenAIBackend {
    config: OpenAIConfig,
    client: Client,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIConfig) -> Result<Self, LlmError> {
        let is_local = config.endpoint.starts_with("http://localhost")
            || config.endpoint.starts_with("http://127.0.0.1");
        if config.api_key.is_empty() && !is_local {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Full API URL for chat completions
    fn chat_url(&self) -> String {
        if let Some(ref api_version) = self.config.api_version {
            // Azure: {endpoint}/openai/deployments/{model}/chat/completions?api-version={version}
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.config.endpoint.trim_end_matches('/'),
                self.config.model,
                api_version
            )
        } else {
            format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
        }
    }

    fn build_headers(&self) -> reqwest::header::HeaderMap {
        use reqwest::header::HeaderValue;

        let mut headers = reqwest::header::HeaderMap::new();

        if self.config.api_version.is_some() {
            // Azure uses api-key header
            if let Ok(val) = HeaderValue::from_str(&self.config.api_key) {
                headers.insert("api-key", val);
            }
        } else {
            let auth_value = format!("Bearer {}", self.config.api_key);
            if let Ok(val) = HeaderValue::from_str(&auth_value) {
                headers.insert(reqwest::header::AUTHORIZATION, val);
            }
        }

        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        headers
    }

    fn build_request(&self, request: &GenerateRequest, response_format: Option<OpenAIResponseFormat>) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: request.model.clone().unwrap_or_else(|| self.config.model.clone()),
            messages: request
                .messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.to_string(),
                    content: Some(m.content.clone()),
                    refusal: None,
                })
                .collect(),
            max_tokens: Some(request.max_tokens.unwrap_or(self.config.max_tokens)),
            temperature: Some(request.temperature.unwrap_or(self.config.temperature)),
            response_format,
        }
    }

    async fn chat(&self, request: &OpenAIChatRequest) -> Result<OpenAIChoice, LlmError> {
        let start = Instant::now();
        let backoff = Duration::from_millis(llm::INITIAL_BACKOFF_MS);
        let result = with_retries(self.config.max_retries, backoff, || {
            self.execute_request(request)
        })
        .await;

        tracing::debug!(
            model = %request.model,
            structured = request.response_format.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "OpenAI chat completed"
        );
        result
    }

    async fn execute_request(&self, request: &OpenAIChatRequest) -> Result<OpenAIChoice, LlmError> {
        let response = self
            .client
            .post(self.chat_url())
            .headers(self.build_headers())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(LlmError::Network(format!("HTTP {}: {}", status, error_text)));
            }
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))
    }
}

#[async_trait]
impl LanguageModel for OpenAIBackend {
    async fn generate(&self, request: GenerateRequest) -> scripture_qa_core::Result<GenerateResponse> {
        let body = self.build_request(&request, None);
        let choice = self.chat(&body).await?;

        Ok(GenerateResponse {
            text: choice.message.content.unwrap_or_default(),
            finish_reason: match choice.finish_reason.as_deref() {
                Some("length") => FinishReason::Length,
                _ => FinishReason::Stop,
            },
        })
    }

    async fn generate_structured(
        &self,
        request: GenerateRequest,
        schema: &OutputSchema,
    ) -> scripture_qa_core::Result<serde_json::Value> {
        let format = OpenAIResponseFormat::json_schema(schema);
        let body = self.build_request(&request, Some(format));
        let choice = self.chat(&body).await?;

        match choice.message.content {
            Some(content) => Ok(parse_structured(&content, schema)?),
            None => Err(LlmError::SchemaValidation {
                raw: choice.message.refusal.unwrap_or_default(),
                reason: "model returned no content".to_string(),
            }
            .into()),
        }
    }

    async fn is_available(&self) -> bool {
        if self.config.api_version.is_some() {
            // Azure has no cheap deployment-level health check
            return true;
        }
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(&url)
            .headers(self.build_headers())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAIResponseFormat>,
}

#[derive(Debug, Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: OpenAIJsonSchema,
}

impl OpenAIResponseFormat {
    fn json_schema(schema: &OutputSchema) -> Self {
        Self {
            kind: "json_schema",
            json_schema: OpenAIJsonSchema {
                name: schema.name.clone(),
                description: schema.description.clone(),
                schema: schema.schema.clone(),
                strict: true,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAIJsonSchema {
    name: String,
    description: String,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert_eq!(config.keep_alive, "5m");
    }

    #[test]
    fn test_message_conversion() {
        let msg = Message::user("Hello");
        let ollama_msg: OllamaMessage = (&msg).into();
        assert_eq!(ollama_msg.role, "user");
        assert_eq!(ollama_msg.content, "Hello");
    }

    #[test]
    fn test_ollama_structured_request_carries_format() {
        let backend = OllamaBackend::new(LlmConfig::default()).unwrap();
        let request = GenerateRequest::new("sys").with_user_message("q").with_temperature(0.0);
        let body = backend.build_request(&request, Some(json!({"type": "object"})));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["format"]["type"], "object");
        assert_eq!(json["options"]["temperature"], 0.0);
        assert_eq!(json["stream"], false);

        let plain = serde_json::to_value(backend.build_request(&request, None)).unwrap();
        assert!(plain.get("format").is_none());
    }

    #[test]
    fn test_openai_config_default() {
        let config = OpenAIConfig::default();
        assert_eq!(config.endpoint, "https://api.openai.com/v1");
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_openai_requires_key_for_remote() {
        assert!(OpenAIBackend::new(OpenAIConfig::default()).is_err());
        assert!(OpenAIBackend::new(OpenAIConfig::local("http://localhost:8000/v1", "qwen")).is_ok());
    }

    #[test]
    fn test_azure_url() {
        let backend = OpenAIBackend::new(OpenAIConfig::azure(
            "https://res.openai.azure.com/",
            "key",
            "gpt-4o",
            "2024-08-01-preview",
        ))
        .unwrap();
        assert_eq!(
            backend.chat_url(),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-08-01-preview"
        );
        assert!(backend.build_headers().contains_key("api-key"));
    }

    #[test]
    fn test_response_format_serialization() {
        let schema = OutputSchema::new("answer", "Answer with citations", json!({"type": "object"}));
        let json = serde_json::to_value(OpenAIResponseFormat::json_schema(&schema)).unwrap();
        assert_eq!(json["type"], "json_schema");
        assert_eq!(json["json_schema"]["name"], "answer");
        assert_eq!(json["json_schema"]["strict"], true);
    }

    #[tokio::test]
    async fn test_retries_stop_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = with_retries(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Api("400".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = with_retries(2, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Timeout) }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
