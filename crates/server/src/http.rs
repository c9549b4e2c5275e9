//! HTTP Endpoints
//!
//! REST API over the answering pipeline.

use axum::{
    extract::{Json, Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use scripture_qa_core::{AnswerResult, ConversationTurn};

use crate::metrics::{metrics_handler, record_request};
use crate::state::AppState;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(&state.config.server.cors_origins, state.config.server.cors_enabled);
    let timeout = Duration::from_secs(state.config.server.timeout_seconds);

    Router::new()
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/ask", post(ask))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

/// CORS from configured origins; permissive when disabled
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins");
        return CorsLayer::permissive();
    }

    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        if !origins.is_empty() {
            tracing::error!("All configured CORS origins are invalid, falling back to localhost");
        }
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static("http://localhost:3000"))
            .allow_methods(methods)
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods(methods)
        .allow_headers(Any)
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    /// Prior conversation to resume
    #[serde(default)]
    chat_history: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session_id: String,
    created_at: String,
    chat_history: Vec<ConversationTurn>,
}

/// `POST /api/sessions`
async fn create_session(
    State(state): State<AppState>,
    request: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionResponse>), ServerError> {
    let Json(request) = request.unwrap_or_default();
    let session = state.sessions.create(request.chat_history)?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: session.id.clone(),
            created_at: session.created_at.to_rfc3339(),
            chat_history: session.history().await,
        }),
    ))
}

/// `GET /api/sessions`
async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.sessions.list();
    Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
    }))
}

/// `GET /api/sessions/:id`
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ServerError> {
    let session = state.sessions.get(&id)?;
    Ok(Json(SessionResponse {
        session_id: session.id.clone(),
        created_at: session.created_at.to_rfc3339(),
        chat_history: session.history().await,
    }))
}

/// `DELETE /api/sessions/:id`
async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.sessions.remove(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    answer: AnswerResult,
    enhanced_question: String,
    is_follow_up: bool,
    chat_history: Vec<ConversationTurn>,
}

/// `POST /api/sessions/:id/ask`
async fn ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ServerError> {
    let start = Instant::now();
    let result = answer_in_session(&state, &id, &request.question).await;

    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => StatusCode::from(e),
    };
    record_request("ask", status, start.elapsed());

    result.map(Json)
}

async fn answer_in_session(state: &AppState, id: &str, question: &str) -> Result<AskResponse, ServerError> {
    let session = state.sessions.get(id)?;
    let reply = session.ask(question).await?;

    Ok(AskResponse {
        answer: reply.outcome.answer,
        enhanced_question: reply.outcome.enhanced_question,
        is_follow_up: reply.outcome.is_follow_up,
        chat_history: reply.chat_history,
    })
}

/// `GET /health`: provider reachability and session count
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let llm_ok = tokio::time::timeout(Duration::from_secs(2), state.llm.is_available())
        .await
        .unwrap_or(false);

    let status_code = if llm_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if llm_ok { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "llm": {
                    "status": if llm_ok { "ok" } else { "unavailable" },
                    "model": state.llm.model_name(),
                },
                "sessions": {
                    "status": "ok",
                    "count": state.sessions.count(),
                }
            }
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    use scripture_qa_agent::AnswerPipeline;
    use scripture_qa_config::{PipelineConfig, Settings};
    use scripture_qa_core::{
        DocumentStore, Error, GenerateRequest, GenerateResponse, LanguageModel, OutputSchema, Passage,
        Result,
    };
    use scripture_qa_rag::{HybridRetriever, KeywordReranker, RetrieverConfig};

    struct CannedLlm;

    #[async_trait]
    impl LanguageModel for CannedLlm {
        async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
            let user = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(GenerateResponse::text(user.trim_start_matches("Question: ")))
        }

        async fn generate_structured(&self, _request: GenerateRequest, schema: &OutputSchema) -> Result<Value> {
            match schema.name.as_str() {
                "follow_up_classification" => Ok(json!({"is_follow_up": false})),
                "answer" => Ok(json!({
                    "answer": "Vyasa composed the Mahabharata.",
                    "citations": [{"document_name": "Adi Parva", "document_number": 1, "page_numbers": [1]}]
                })),
                "confidence" => Ok(json!({"confidence_score": 88, "reasoning": "Stated directly."})),
                other => Err(Error::Llm(format!("unexpected schema {}", other))),
            }
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    struct Corpus(Vec<Passage>);

    #[async_trait]
    impl DocumentStore for Corpus {
        async fn search_dense(&self, _query: &str, k: usize) -> Result<Vec<Passage>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }

        async fn search_lexical(&self, _query: &str, k: usize) -> Result<Vec<Passage>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }

        fn name(&self) -> &str {
            "corpus"
        }
    }

    fn app(passages: Vec<Passage>) -> Router {
        let llm: Arc<dyn LanguageModel> = Arc::new(CannedLlm);
        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(Corpus(passages)),
            Arc::new(KeywordReranker::new()),
            RetrieverConfig::default(),
        ));
        let pipeline = Arc::new(AnswerPipeline::from_config(
            llm.clone(),
            retriever,
            &PipelineConfig::default(),
            Duration::from_secs(5),
        ));
        create_router(AppState::new(Settings::default(), pipeline, llm))
    }

    fn corpus() -> Vec<Passage> {
        vec![Passage::new("Vyasa composed the Mahabharata.").with_source("Adi Parva").with_page(1)]
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_session_lifecycle_and_ask() {
        let app = app(corpus());

        let (status, created) = send(&app, "POST", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["session_id"].as_str().unwrap().to_string();

        let (status, answered) = send(
            &app,
            "POST",
            &format!("/api/sessions/{}/ask", id),
            Some(json!({"question": "Who composed the Mahabharata?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answered["answer"]["answer"], "Vyasa composed the Mahabharata.");
        assert_eq!(answered["answer"]["confidence"]["confidence_score"], 88);
        assert_eq!(answered["chat_history"].as_array().unwrap().len(), 2);
        assert_eq!(answered["chat_history"][0]["role"], "user");

        let (status, fetched) = send(&app, "GET", &format!("/api/sessions/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["chat_history"].as_array().unwrap().len(), 2);

        let (status, _) = send(&app, "DELETE", &format!("/api/sessions/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/api/sessions/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_resumes_history() {
        let app = app(corpus());
        let history = json!({"chat_history": [
            {"role": "user", "content": "Who was Vyasa?"},
            {"role": "assistant", "content": {"answer": "A sage.", "citations": []}}
        ]});

        let (status, created) = send(&app, "POST", "/api/sessions", Some(history)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["chat_history"][1]["content"]["answer"], "A sage.");
    }

    #[tokio::test]
    async fn test_empty_corpus_is_service_unavailable() {
        let app = app(Vec::new());
        let (_, created) = send(&app, "POST", "/api/sessions", None).await;
        let id = created["session_id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/sessions/{}/ask", id),
            Some(json!({"question": "Who composed the Mahabharata?"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("Retrieval"));

        let (_, fetched) = send(&app, "GET", &format!("/api/sessions/{}", id), None).await;
        assert!(fetched["chat_history"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_and_bad_question() {
        let app = app(corpus());
        let (status, _) = send(&app, "POST", "/api/sessions/nope/ask", Some(json!({"question": "hi"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, created) = send(&app, "POST", "/api/sessions", None).await;
        let id = created["session_id"].as_str().unwrap().to_string();
        let (status, _) = send(&app, "POST", &format!("/api/sessions/{}/ask", id), Some(json!({"question": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(corpus());
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["llm"]["model"], "canned");
    }
}
