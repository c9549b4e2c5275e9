//! Centralized constants
//!
//! Single source of truth for defaults used across crates. Settings structs
//! take their defaults from here, and components that are built without a
//! `Settings` (tests, tools) use the same values.

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Ollama LLM and embedding endpoint
    pub const OLLAMA_DEFAULT: &str = "http://localhost:11434";

    /// Qdrant vector store endpoint
    pub const QDRANT_DEFAULT: &str = "http://127.0.0.1:6334";

    /// OpenAI API endpoint
    pub const OPENAI_DEFAULT: &str = "https://api.openai.com/v1";

    /// Anthropic API endpoint
    pub const ANTHROPIC_DEFAULT: &str = "https://api.anthropic.com";

    /// Cross-encoder rerank service (text-embeddings-inference)
    pub const RERANKER_DEFAULT: &str = "http://localhost:8081";
}

/// Timeouts (in milliseconds unless noted)
pub mod timeouts {
    /// LLM request timeout
    pub const LLM_REQUEST_MS: u64 = 30_000;

    /// Single dense or lexical search, embedding included
    pub const SEARCH_MS: u64 = 10_000;

    /// Rerank of one candidate set
    pub const RERANK_MS: u64 = 15_000;

    /// HTTP request timeout at the server layer (seconds)
    pub const HTTP_REQUEST_SECS: u64 = 720;

    /// Idle time after which a session is evicted (seconds)
    pub const SESSION_IDLE_SECS: u64 = 1_800;
}

/// Language model defaults
pub mod llm {
    pub const DEFAULT_PROVIDER: &str = "ollama";
    pub const DEFAULT_MODEL: &str = "llama3.1:8b";
    pub const DEFAULT_TEMPERATURE: f32 = 0.2;
    pub const DEFAULT_MAX_TOKENS: u32 = 1024;
    /// Transport retries inside the provider client (not refinement)
    pub const DEFAULT_MAX_RETRIES: u32 = 1;
    /// First retry delay; doubles on each further retry
    pub const INITIAL_BACKOFF_MS: u64 = 200;
}

/// Retrieval defaults
pub mod rag {
    /// Weight of the dense (semantic) list in the merge
    pub const DENSE_WEIGHT: f32 = 0.5;

    /// Weight of the lexical (keyword) list in the merge
    pub const LEXICAL_WEIGHT: f32 = 0.5;

    /// Reciprocal-rank constant used when fusing ranked lists
    pub const RRF_K: f32 = 60.0;

    /// Candidates fetched from each search and kept after the merge
    pub const CANDIDATE_TOP_K: usize = 5;

    /// Passages kept after reranking
    pub const FINAL_TOP_K: usize = 3;

    pub const COLLECTION: &str = "scriptures";
    pub const EMBEDDING_MODEL: &str = "nomic-embed-text";
    pub const VECTOR_DIM: usize = 768;
    pub const SPARSE_INDEX_PATH: &str = "data/lexical_index";

    /// Token budget for one (query, passage) pair fed to the cross-encoder
    pub const RERANKER_MAX_SEQ_LEN: usize = 512;
}

/// Conversation memory windows (in messages, one exchange = 2 messages)
pub mod conversation {
    /// Rolling window kept before each turn (5 exchanges)
    pub const CHAT_MEMORY_WINDOW: usize = 10;

    /// History must be longer than this for a topic change to wipe it (3 exchanges)
    pub const TOPIC_CHANGE_WINDOW: usize = 6;

    /// Messages shown to the follow-up classifier
    pub const CLASSIFIER_HISTORY: usize = 4;
}

/// Refinement loop defaults
pub mod refinement {
    /// Scores in [0, threshold) trigger another synthesis pass
    pub const CONFIDENCE_THRESHOLD: i32 = 75;

    /// Extra synthesis passes allowed per turn
    pub const MAX_REGENERATION_ATTEMPTS: u32 = 1;

    /// Hard ceiling accepted by validation
    pub const MAX_REGENERATION_CEILING: u32 = 5;
}
