//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{endpoints, llm, rag, refinement, timeouts};
use crate::{ConfigError, PipelineConfig};

/// Language model providers accepted by `llm.provider`
pub const KNOWN_PROVIDERS: &[&str] = &["ollama", "openai", "azure", "azure_openai", "claude", "anthropic"];

/// Reranker kinds accepted by `rag.reranker.kind`
pub const KNOWN_RERANKERS: &[&str] = &["keyword", "remote", "onnx"];

/// Model calls before retrieval: classifier, rewrite, topic change
const CALLS_BEFORE_RETRIEVAL: u32 = 3;

/// Model calls per synthesis pass: answer and evaluation, each with one
/// unconstrained retry
const CALLS_PER_PASS: u32 = 4;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Relaxed validation
    #[default]
    Development,
    Staging,
    /// All validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }

    /// Parse an environment name such as the one selecting `config/{env}.yaml`
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "staging" => Some(Self::Staging),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    /// Language model provider, selected once at startup
    #[serde(default)]
    pub llm: LlmSettings,

    /// Retrieval and reranking
    #[serde(default)]
    pub rag: RagConfig,

    /// Turn handling (memory windows, refinement)
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_llm()?;
        self.validate_rag()?;
        self.validate_pipeline()?;
        self.validate_budget()?;
        Ok(())
    }

    /// Worst-case wall time of one answered turn
    pub fn turn_budget(&self) -> Duration {
        let passes = self.pipeline.max_regeneration_attempts.saturating_add(1);
        let calls = CALLS_BEFORE_RETRIEVAL.saturating_add(CALLS_PER_PASS.saturating_mul(passes));
        let retrieval = self.rag.search_timeout_ms.saturating_add(self.rag.rerank_timeout_ms);
        self.llm
            .call_budget()
            .saturating_mul(calls)
            .saturating_add(Duration::from_millis(retrieval))
    }

    fn validate_budget(&self) -> Result<(), ConfigError> {
        let budget = self.turn_budget();
        if Duration::from_secs(self.server.timeout_seconds) < budget {
            return Err(ConfigError::invalid(
                "server.timeout_seconds",
                format!(
                    "A turn can take up to {}s with the current llm, rag and pipeline settings, \
                     request timeout is {}s",
                    budget.as_secs_f64().ceil() as u64,
                    self.server.timeout_seconds
                ),
            ));
        }
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;

        if server.port == 0 {
            return Err(ConfigError::invalid("server.port", "Port cannot be 0"));
        }
        if server.max_sessions == 0 {
            return Err(ConfigError::invalid(
                "server.max_sessions",
                "Max sessions must be at least 1",
            ));
        }
        if server.timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "server.timeout_seconds",
                "Timeout must be at least 1 second",
            ));
        }

        Ok(())
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        let llm = &self.llm;
        let provider = llm.provider.to_lowercase();

        if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
            return Err(ConfigError::invalid(
                "llm.provider",
                format!("Unknown provider '{}', expected one of {:?}", llm.provider, KNOWN_PROVIDERS),
            ));
        }
        if llm.model.trim().is_empty() {
            return Err(ConfigError::MissingField("llm.model".to_string()));
        }
        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(ConfigError::invalid(
                "llm.temperature",
                format!("Must be between 0.0 and 2.0, got {}", llm.temperature),
            ));
        }
        if llm.timeout_ms == 0 {
            return Err(ConfigError::invalid("llm.timeout_ms", "Must be positive"));
        }
        if provider != "ollama" && self.environment.is_production() && llm.api_key.is_none() {
            return Err(ConfigError::MissingField("llm.api_key".to_string()));
        }
        if provider.starts_with("azure") && llm.endpoint.is_none() {
            return Err(ConfigError::MissingField("llm.endpoint".to_string()));
        }

        Ok(())
    }

    fn validate_rag(&self) -> Result<(), ConfigError> {
        let rag = &self.rag;

        if !(0.0..=1.0).contains(&rag.dense_weight) {
            return Err(ConfigError::invalid(
                "rag.dense_weight",
                format!("Must be between 0.0 and 1.0, got {}", rag.dense_weight),
            ));
        }
        if !(0.0..=1.0).contains(&rag.lexical_weight) {
            return Err(ConfigError::invalid(
                "rag.lexical_weight",
                format!("Must be between 0.0 and 1.0, got {}", rag.lexical_weight),
            ));
        }
        if rag.dense_weight + rag.lexical_weight <= 0.0 {
            return Err(ConfigError::invalid(
                "rag.dense_weight",
                "Dense and lexical weights cannot both be zero",
            ));
        }
        if rag.rrf_k <= 0.0 {
            return Err(ConfigError::invalid(
                "rag.rrf_k",
                format!("Must be positive, got {}", rag.rrf_k),
            ));
        }
        if rag.final_top_k == 0 {
            return Err(ConfigError::invalid("rag.final_top_k", "Must be at least 1"));
        }
        if rag.final_top_k > rag.candidate_top_k {
            return Err(ConfigError::invalid(
                "rag.final_top_k",
                format!(
                    "Reranking must narrow the candidate set: final_top_k {} > candidate_top_k {}",
                    rag.final_top_k, rag.candidate_top_k
                ),
            ));
        }
        if rag.search_timeout_ms == 0 || rag.rerank_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "rag.search_timeout_ms",
                "Search and rerank timeouts must be positive",
            ));
        }
        if rag.vector_dim == 0 {
            return Err(ConfigError::invalid("rag.vector_dim", "Must be positive"));
        }

        let kind = rag.reranker.kind.to_lowercase();
        if !KNOWN_RERANKERS.contains(&kind.as_str()) {
            return Err(ConfigError::invalid(
                "rag.reranker.kind",
                format!("Unknown reranker '{}', expected one of {:?}", rag.reranker.kind, KNOWN_RERANKERS),
            ));
        }
        if kind == "onnx" && rag.reranker.model_path.is_none() {
            return Err(ConfigError::MissingField("rag.reranker.model_path".to_string()));
        }

        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        let pipeline = &self.pipeline;

        if pipeline.chat_memory_window == 0 {
            return Err(ConfigError::invalid(
                "pipeline.chat_memory_window",
                "Must be at least 1",
            ));
        }
        if pipeline.topic_change_window >= pipeline.chat_memory_window {
            return Err(ConfigError::invalid(
                "pipeline.topic_change_window",
                format!(
                    "Must be shorter than chat_memory_window ({} >= {})",
                    pipeline.topic_change_window, pipeline.chat_memory_window
                ),
            ));
        }
        if !(1..=100).contains(&pipeline.confidence_threshold) {
            return Err(ConfigError::invalid(
                "pipeline.confidence_threshold",
                format!("Must be between 1 and 100, got {}", pipeline.confidence_threshold),
            ));
        }
        if pipeline.max_regeneration_attempts > refinement::MAX_REGENERATION_CEILING {
            return Err(ConfigError::invalid(
                "pipeline.max_regeneration_attempts",
                format!(
                    "At most {} extra attempts allowed, got {}",
                    refinement::MAX_REGENERATION_CEILING,
                    pipeline.max_regeneration_attempts
                ),
            ));
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS allowed origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Maximum concurrently open sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Idle time after which a session is evicted
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_timeout() -> u64 {
    timeouts::HTTP_REQUEST_SECS
}
fn default_true() -> bool {
    true
}
fn default_max_sessions() -> usize {
    1000
}
fn default_session_idle_secs() -> u64 {
    timeouts::SESSION_IDLE_SECS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_seconds: default_timeout(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_sessions: default_max_sessions(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

/// Language model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// ollama | openai | azure | claude
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Override of the provider's default endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Azure OpenAI API version
    #[serde(default)]
    pub api_version: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,

    /// Transport retries for network errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_provider() -> String {
    llm::DEFAULT_PROVIDER.to_string()
}
fn default_model() -> String {
    llm::DEFAULT_MODEL.to_string()
}
fn default_temperature() -> f32 {
    llm::DEFAULT_TEMPERATURE
}
fn default_max_tokens() -> u32 {
    llm::DEFAULT_MAX_TOKENS
}
fn default_llm_timeout_ms() -> u64 {
    timeouts::LLM_REQUEST_MS
}
fn default_max_retries() -> u32 {
    llm::DEFAULT_MAX_RETRIES
}

impl LlmSettings {
    /// Upper bound for one call: every transport attempt plus backoff
    pub fn call_budget(&self) -> Duration {
        let attempts = u64::from(self.max_retries) + 1;
        let backoff = llm::INITIAL_BACKOFF_MS
            .saturating_mul(1u64.checked_shl(self.max_retries).map_or(u64::MAX, |n| n - 1));
        Duration::from_millis(
            self.timeout_ms
                .saturating_mul(attempts)
                .saturating_add(backoff),
        )
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: None,
            api_key: None,
            api_version: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_llm_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_qdrant_endpoint")]
    pub qdrant_endpoint: String,

    #[serde(default)]
    pub qdrant_api_key: Option<String>,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,

    /// On-disk Tantivy index for lexical search
    #[serde(default = "default_sparse_index_path")]
    pub sparse_index_path: String,

    /// Ollama endpoint serving the embedding model
    #[serde(default = "default_embedding_endpoint")]
    pub embedding_endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_dense_weight")]
    pub dense_weight: f32,

    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,

    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Results requested from each search, and kept after the merge
    #[serde(default = "default_candidate_top_k")]
    pub candidate_top_k: usize,

    /// Passages kept after reranking
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,

    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    #[serde(default = "default_rerank_timeout_ms")]
    pub rerank_timeout_ms: u64,

    #[serde(default)]
    pub reranker: RerankerSettings,
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.to_string()
}
fn default_collection() -> String {
    rag::COLLECTION.to_string()
}
fn default_vector_dim() -> usize {
    rag::VECTOR_DIM
}
fn default_sparse_index_path() -> String {
    rag::SPARSE_INDEX_PATH.to_string()
}
fn default_embedding_endpoint() -> String {
    endpoints::OLLAMA_DEFAULT.to_string()
}
fn default_embedding_model() -> String {
    rag::EMBEDDING_MODEL.to_string()
}
fn default_dense_weight() -> f32 {
    rag::DENSE_WEIGHT
}
fn default_lexical_weight() -> f32 {
    rag::LEXICAL_WEIGHT
}
fn default_rrf_k() -> f32 {
    rag::RRF_K
}
fn default_candidate_top_k() -> usize {
    rag::CANDIDATE_TOP_K
}
fn default_final_top_k() -> usize {
    rag::FINAL_TOP_K
}
fn default_search_timeout_ms() -> u64 {
    timeouts::SEARCH_MS
}
fn default_rerank_timeout_ms() -> u64 {
    timeouts::RERANK_MS
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            qdrant_endpoint: default_qdrant_endpoint(),
            qdrant_api_key: None,
            collection: default_collection(),
            vector_dim: default_vector_dim(),
            sparse_index_path: default_sparse_index_path(),
            embedding_endpoint: default_embedding_endpoint(),
            embedding_model: default_embedding_model(),
            dense_weight: default_dense_weight(),
            lexical_weight: default_lexical_weight(),
            rrf_k: default_rrf_k(),
            candidate_top_k: default_candidate_top_k(),
            final_top_k: default_final_top_k(),
            search_timeout_ms: default_search_timeout_ms(),
            rerank_timeout_ms: default_rerank_timeout_ms(),
            reranker: RerankerSettings::default(),
        }
    }
}

/// Cross-encoder reranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerSettings {
    /// keyword | remote | onnx
    #[serde(default = "default_reranker_kind")]
    pub kind: String,

    /// Rerank service endpoint (kind = remote)
    #[serde(default = "default_reranker_endpoint")]
    pub endpoint: String,

    /// ONNX model path (kind = onnx)
    #[serde(default)]
    pub model_path: Option<String>,

    /// tokenizer.json path (kind = onnx), defaults to the model's directory
    #[serde(default)]
    pub tokenizer_path: Option<String>,

    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,
}

fn default_reranker_kind() -> String {
    "remote".to_string()
}
fn default_reranker_endpoint() -> String {
    endpoints::RERANKER_DEFAULT.to_string()
}
fn default_max_seq_len() -> usize {
    rag::RERANKER_MAX_SEQ_LEN
}

impl Default for RerankerSettings {
    fn default() -> Self {
        Self {
            kind: default_reranker_kind(),
            endpoint: default_reranker_endpoint(),
            model_path: None,
            tokenizer_path: None,
            max_seq_len: default_max_seq_len(),
        }
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Install the Prometheus recorder and expose /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from `config/` relative to the working directory
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from files in `dir`, then environment variables
///
/// Precedence (highest first): `SCRIPTURE_QA__*` environment variables,
/// `{dir}/{env}.*`, `{dir}/default.*`, compiled defaults.
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::from(dir.join("default")).required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("SCRIPTURE_QA")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    tracing::debug!(
        provider = %settings.llm.provider,
        model = %settings.llm.model,
        reranker = %settings.rag.reranker.kind,
        "Settings loaded"
    );

    Ok(settings)
}

/// Settings to use after a failed load
///
/// Compiled defaults stand in everywhere except production, where the
/// load error is returned so the process refuses to start.
pub fn fallback_settings(env: Option<&str>, error: ConfigError) -> Result<Settings, ConfigError> {
    let production = env
        .and_then(RuntimeEnvironment::from_name)
        .is_some_and(|e| e.is_production());
    if production {
        return Err(error);
    }
    Ok(Settings::default())
}

/// Load one YAML settings file as-is, without layering or environment overrides
pub fn load_settings_file(path: &Path) -> Result<Settings, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
    let settings: Settings =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.rag.candidate_top_k, 5);
        assert_eq!(settings.rag.final_top_k, 3);
        assert_eq!(settings.pipeline.chat_memory_window, 10);
        assert_eq!(settings.pipeline.topic_change_window, 6);
        assert_eq!(settings.pipeline.confidence_threshold, 75);
        assert_eq!(settings.pipeline.max_regeneration_attempts, 1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rag_validation_weights() {
        let mut settings = Settings::default();

        settings.rag.dense_weight = 1.5;
        assert!(settings.validate_rag().is_err());

        settings.rag.dense_weight = 0.0;
        settings.rag.lexical_weight = 0.0;
        assert!(settings.validate_rag().is_err());

        settings.rag.lexical_weight = 1.0;
        assert!(settings.validate_rag().is_ok());
    }

    #[test]
    fn test_rerank_must_narrow() {
        let mut settings = Settings::default();
        settings.rag.final_top_k = 6;
        assert!(settings.validate_rag().is_err());

        settings.rag.final_top_k = 0;
        assert!(settings.validate_rag().is_err());
    }

    #[test]
    fn test_pipeline_validation() {
        let mut settings = Settings::default();
        settings.pipeline.topic_change_window = 10;
        assert!(settings.validate_pipeline().is_err());

        settings.pipeline.topic_change_window = 6;
        settings.pipeline.confidence_threshold = 0;
        assert!(settings.validate_pipeline().is_err());

        settings.pipeline.confidence_threshold = 75;
        settings.pipeline.max_regeneration_attempts = 50;
        assert!(settings.validate_pipeline().is_err());
    }

    #[test]
    fn test_llm_validation() {
        let mut settings = Settings::default();
        settings.llm.provider = "gpt4all".to_string();
        assert!(settings.validate_llm().is_err());

        settings.llm.provider = "Claude".to_string();
        assert!(settings.validate_llm().is_ok());

        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate_llm().is_err());

        settings.llm.api_key = Some("sk-test".to_string());
        assert!(settings.validate_llm().is_ok());
    }

    #[test]
    fn test_unknown_reranker_rejected() {
        let mut settings = Settings::default();
        settings.rag.reranker.kind = "colbert".to_string();
        assert!(settings.validate_rag().is_err());

        settings.rag.reranker.kind = "onnx".to_string();
        assert!(settings.validate_rag().is_err());

        settings.rag.reranker.model_path = Some("models/reranker.onnx".to_string());
        assert!(settings.validate_rag().is_ok());
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.yaml"),
            "llm:\n  model: qwen2.5:14b\nrag:\n  dense_weight: 0.6\n  lexical_weight: 0.4\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("staging.yaml"),
            "server:\n  timeout_seconds: 1200\npipeline:\n  max_regeneration_attempts: 2\n",
        )
        .unwrap();

        let settings = load_settings_from(dir.path(), Some("staging")).unwrap();
        assert_eq!(settings.llm.model, "qwen2.5:14b");
        assert!((settings.rag.dense_weight - 0.6).abs() < f32::EPSILON);
        assert_eq!(settings.pipeline.max_regeneration_attempts, 2);
        // untouched sections keep compiled defaults
        assert_eq!(settings.rag.final_top_k, 3);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.yaml"),
            "rag:\n  candidate_top_k: 2\n  final_top_k: 3\n",
        )
        .unwrap();

        let err = load_settings_from(dir.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_shipped_default_file_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/default.yaml");
        let settings = load_settings_file(&path).unwrap();
        assert_eq!(settings.pipeline.chat_memory_window, 10);
        assert_eq!(settings.rag.reranker.kind, "remote");
    }

    #[test]
    fn test_call_budget_covers_retries() {
        let mut llm = LlmSettings::default();
        llm.timeout_ms = 10_000;
        llm.max_retries = 0;
        assert_eq!(llm.call_budget(), Duration::from_millis(10_000));

        llm.max_retries = 2;
        // three attempts, backoff 200ms then 400ms
        assert_eq!(llm.call_budget(), Duration::from_millis(30_600));
    }

    #[test]
    fn test_request_timeout_must_cover_turn() {
        let mut settings = Settings::default();
        assert!(Duration::from_secs(settings.server.timeout_seconds) >= settings.turn_budget());

        // 3 + 4 * 2 calls of 60.2s, plus 25s of retrieval
        assert_eq!(settings.turn_budget(), Duration::from_millis(687_200));

        settings.server.timeout_seconds = 180;
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        settings.server.timeout_seconds = 720;
        settings.pipeline.max_regeneration_attempts = 3;
        assert!(settings.validate().is_err());

        settings.server.timeout_seconds = 1_200;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_shipped_production_file_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/production.yaml");
        let settings = load_settings_file(&path).unwrap_or_else(|e| panic!("{}", e));
        assert!(settings.environment.is_production());
        assert_eq!(settings.llm.max_retries, 2);
        assert!(Duration::from_secs(settings.server.timeout_seconds) >= settings.turn_budget());
    }

    #[test]
    fn test_fallback_refused_in_production() {
        let err = || ConfigError::invalid("llm.provider", "Unknown provider");

        assert!(fallback_settings(Some("production"), err()).is_err());
        assert!(fallback_settings(Some("PROD"), err()).is_err());

        let settings = fallback_settings(Some("staging"), err()).unwrap();
        assert_eq!(settings.llm.provider, "ollama");
        assert!(fallback_settings(None, err()).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = load_settings_file(Path::new("/nonexistent/settings.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
