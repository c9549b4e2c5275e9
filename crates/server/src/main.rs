//! Scripture QA Server Entry Point
//!
//! Every strategy (language model provider, document store, reranker) is
//! chosen here from configuration, once, and injected into the pipeline.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use scripture_qa_agent::AnswerPipeline;
use scripture_qa_config::{fallback_settings, load_settings, Settings};
use scripture_qa_core::LanguageModel;
use scripture_qa_llm::{LlmFactory, LlmProviderConfig};
use scripture_qa_rag::{build_reranker, CorpusStore, HybridRetriever, RetrieverConfig};
use scripture_qa_server::{create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("SCRIPTURE_QA_ENV")
        .or_else(|_| std::env::var("SCRIPTURE_QA__ENVIRONMENT"))
        .ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        },
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}", e);
            let settings = fallback_settings(env.as_deref(), e)?;
            eprintln!("Using default configuration");
            settings
        },
    };

    init_tracing(&config);

    tracing::info!("Starting Scripture QA Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        provider = %config.llm.provider,
        model = %config.llm.model,
        reranker = %config.rag.reranker.kind,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled && init_metrics().is_some() {
        tracing::info!("Initialized Prometheus metrics at /metrics");
    }

    let llm = init_llm(&config)?;
    let pipeline = Arc::new(init_pipeline(&config, llm.clone()).await?);

    if !llm.is_available().await {
        tracing::warn!(model = llm.model_name(), "Language model not reachable yet");
    }

    let state = AppState::new(config.clone(), pipeline, llm);
    let cleanup = state.sessions.start_cleanup_task();

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = cleanup.send(true);
    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_llm(config: &Settings) -> Result<Arc<dyn LanguageModel>, Box<dyn std::error::Error>> {
    let provider_config = LlmProviderConfig::from_settings(&config.llm)?;
    let llm = LlmFactory::create(&provider_config)?;
    tracing::info!(
        provider = ?provider_config.provider,
        model = llm.model_name(),
        "Language model provider initialized"
    );
    Ok(llm)
}

async fn init_pipeline(
    config: &Settings,
    llm: Arc<dyn LanguageModel>,
) -> Result<AnswerPipeline, Box<dyn std::error::Error>> {
    let store = CorpusStore::from_settings(&config.rag).await?;
    tracing::info!(
        endpoint = %config.rag.qdrant_endpoint,
        collection = %config.rag.collection,
        "Document store initialized"
    );

    let reranker = build_reranker(
        &config.rag.reranker,
        Duration::from_millis(config.rag.rerank_timeout_ms),
    )?;

    let retriever = Arc::new(HybridRetriever::new(
        Arc::new(store),
        reranker,
        RetrieverConfig::from(&config.rag),
    ));

    Ok(AnswerPipeline::from_config(
        llm,
        retriever,
        &config.pipeline,
        config.llm.call_budget(),
    ))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("scripture_qa={},tower_http=debug", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
