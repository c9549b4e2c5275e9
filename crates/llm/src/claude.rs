//! Claude backend
//!
//! Implements the Anthropic Messages API. Schema-constrained generation
//! uses a single tool whose `input_schema` is the output schema, with
//! `tool_choice` forcing the model to call it; the tool input is the result.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use scripture_qa_config::constants::{endpoints, llm, timeouts};
use scripture_qa_core::{
    FinishReason, GenerateRequest, GenerateResponse, LanguageModel, Message, OutputSchema, Role,
};
use serde::{Deserialize, Serialize};

use crate::backend::with_retries;
use crate::schema::validate_value;
use crate::LlmError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Resolve short aliases to Claude model ids; anything else passes through
pub fn resolve_model(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "opus" | "opus-4.5" => "claude-opus-4-5-20251101".to_string(),
        "sonnet" | "sonnet-4" => "claude-sonnet-4-20250514".to_string(),
        "haiku" | "haiku-3.5" => "claude-3-5-haiku-20241022".to_string(),
        _ => name.to_string(),
    }
}

/// Configuration for Claude backend
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    /// Model id (aliases resolved by `with_model`)
    pub model: String,
    pub max_tokens: u32,
    /// Temperature (0.0 - 1.0)
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: u32,
    /// API endpoint (for testing or proxy)
    pub endpoint: String,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            model: resolve_model("sonnet"),
            max_tokens: llm::DEFAULT_MAX_TOKENS,
            temperature: llm::DEFAULT_TEMPERATURE,
            timeout: Duration::from_millis(timeouts::LLM_REQUEST_MS),
            max_retries: llm::DEFAULT_MAX_RETRIES,
            endpoint: endpoints::ANTHROPIC_DEFAULT.to_string(),
        }
    }
}

impl ClaudeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Set model by id or alias ("opus", "sonnet", "haiku")
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = resolve_model(model);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Claude backend
pub struct ClaudeBackend {
    config: ClaudeConfig,
    client: Client,
}

impl ClaudeBackend {
    pub fn new(config: ClaudeConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Configuration(
                "ANTHROPIC_API_KEY not set. Set it via environment or config.".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn build_request(&self, request: &GenerateRequest, schema: Option<&OutputSchema>) -> ClaudeRequest {
        // System messages go in the top-level field
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let (tools, tool_choice) = match schema {
            Some(schema) => (
                Some(vec![ClaudeTool {
                    name: schema.name.clone(),
                    description: schema.description.clone(),
                    input_schema: schema.schema.clone(),
                }]),
                Some(ClaudeToolChoice {
                    kind: "tool",
                    name: schema.name.clone(),
                }),
            ),
            None => (None, None),
        };

        ClaudeRequest {
            model: request
                .model
                .as_deref()
                .map(resolve_model)
                .unwrap_or_else(|| self.config.model.clone()),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            messages: convert_messages(&request.messages),
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            tools,
            tool_choice,
            temperature: Some(request.temperature.unwrap_or(self.config.temperature).clamp(0.0, 1.0)),
        }
    }

    async fn send(&self, request: &ClaudeRequest) -> Result<ClaudeApiResponse, LlmError> {
        let start = Instant::now();
        let backoff = Duration::from_millis(llm::INITIAL_BACKOFF_MS);
        let result = with_retries(self.config.max_retries, backoff, || {
            self.execute_request(request)
        })
        .await;

        tracing::debug!(
            model = %request.model,
            structured = request.tool_choice.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Claude request completed"
        );
        result
    }

    async fn execute_request(&self, request: &ClaudeRequest) -> Result<ClaudeApiResponse, LlmError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint.trim_end_matches('/')))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            // 429 and 529 (overloaded) are transient
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(LlmError::Network(format!("HTTP {}: {}", status, error_text)));
            }
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

/// Convert chat messages to Claude format (system messages excluded)
fn convert_messages(messages: &[Message]) -> Vec<ClaudeMessage> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| ClaudeMessage {
            role: m.role.to_string(),
            content: m.content.clone(),
        })
        .collect()
}

/// Text blocks of a response, concatenated
fn response_text(response: &ClaudeApiResponse) -> String {
    response
        .content
        .iter()
        .filter_map(|block| match block {
            ClaudeContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Input of the forced tool call, validated against the schema
fn extract_tool_input(response: ClaudeApiResponse, schema: &OutputSchema) -> Result<serde_json::Value, LlmError> {
    let text = response_text(&response);
    let input = response.content.into_iter().find_map(|block| match block {
        ClaudeContentBlock::ToolUse { name, input, .. } if name == schema.name => Some(input),
        _ => None,
    });

    let Some(input) = input else {
        return Err(LlmError::SchemaValidation {
            raw: text,
            reason: format!("model did not call the '{}' tool", schema.name),
        });
    };

    validate_value(&input, schema).map_err(|reason| LlmError::SchemaValidation {
        raw: input.to_string(),
        reason,
    })?;
    Ok(input)
}

#[async_trait]
impl LanguageModel for ClaudeBackend {
    async fn generate(&self, request: GenerateRequest) -> scripture_qa_core::Result<GenerateResponse> {
        let body = self.build_request(&request, None);
        let response = self.send(&body).await?;

        Ok(GenerateResponse {
            text: response_text(&response),
            finish_reason: match response.stop_reason {
                Some(ClaudeStopReason::MaxTokens) => FinishReason::Length,
                _ => FinishReason::Stop,
            },
        })
    }

    async fn generate_structured(
        &self,
        request: GenerateRequest,
        schema: &OutputSchema,
    ) -> scripture_qa_core::Result<serde_json::Value> {
        let body = self.build_request(&request, Some(schema));
        let response = self.send(&body).await?;
        Ok(extract_tool_input(response, schema)?)
    }

    async fn is_available(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// =============================================================================
// Claude API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ClaudeTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ClaudeToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[allow(dead_code)]
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
struct ClaudeTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ClaudeToolChoice {
    #[serde(rename = "type")]
    kind: &'static str,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeApiResponse {
    content: Vec<ClaudeContentBlock>,
    #[serde(default)]
    stop_reason: Option<ClaudeStopReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ClaudeStopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> ClaudeBackend {
        ClaudeBackend::new(ClaudeConfig::new("test-key")).unwrap()
    }

    fn answer_schema() -> OutputSchema {
        OutputSchema::new(
            "answer",
            "Answer with citations",
            json!({
                "type": "object",
                "properties": {"answer": {"type": "string"}},
                "required": ["answer"]
            }),
        )
    }

    #[test]
    fn test_model_aliases() {
        assert_eq!(resolve_model("Sonnet"), "claude-sonnet-4-20250514");
        assert_eq!(resolve_model("claude-custom-1"), "claude-custom-1");
    }

    #[test]
    fn test_missing_key_rejected() {
        let mut config = ClaudeConfig::new("");
        config.api_key.clear();
        assert!(ClaudeBackend::new(config).is_err());
    }

    #[test]
    fn test_system_prompt_extracted() {
        let request = GenerateRequest::new("You are a scholar").with_user_message("Who was Puru?");
        let body = backend().build_request(&request, None);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["system"], "You are a scholar");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_structured_request_forces_tool() {
        let request = GenerateRequest::new("sys").with_user_message("q");
        let body = backend().build_request(&request, Some(&answer_schema()));
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["tools"][0]["name"], "answer");
        assert_eq!(json["tool_choice"]["type"], "tool");
        assert_eq!(json["tool_choice"]["name"], "answer");
    }

    #[test]
    fn test_tool_input_extracted() {
        let response: ClaudeApiResponse = serde_json::from_str(
            r#"{
                "content": [{"type": "tool_use", "id": "t1", "name": "answer", "input": {"answer": "Paris"}}],
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();
        let value = extract_tool_input(response, &answer_schema()).unwrap();
        assert_eq!(value["answer"], "Paris");
    }

    #[test]
    fn test_invalid_tool_input_keeps_raw() {
        let response: ClaudeApiResponse = serde_json::from_str(
            r#"{
                "content": [{"type": "tool_use", "id": "t1", "name": "answer", "input": {"text": "Paris"}}],
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();
        match extract_tool_input(response, &answer_schema()) {
            Err(LlmError::SchemaValidation { raw, .. }) => assert!(raw.contains("Paris")),
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_text_only_response_is_schema_failure() {
        let response: ClaudeApiResponse = serde_json::from_str(
            r#"{
                "content": [{"type": "text", "text": "{\"answer\": \"Paris\"}"}],
                "stop_reason": "end_turn"
            }"#,
        )
        .unwrap();
        match extract_tool_input(response, &answer_schema()) {
            Err(LlmError::SchemaValidation { raw, .. }) => assert_eq!(raw, "{\"answer\": \"Paris\"}"),
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_blocks_ignored() {
        let response: ClaudeApiResponse = serde_json::from_str(
            r#"{
                "content": [{"type": "thinking", "thinking": "..."}, {"type": "text", "text": "Hi"}],
                "stop_reason": "end_turn"
            }"#,
        )
        .unwrap();
        assert_eq!(response_text(&response), "Hi");
    }
}
