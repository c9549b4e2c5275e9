//! Timed language model calls shared by the pipeline stages

use serde_json::Value;
use std::time::Duration;

use scripture_qa_core::{Error, GenerateRequest, LanguageModel, OutputSchema, Result};

pub(crate) async fn generate_text(
    llm: &dyn LanguageModel,
    request: GenerateRequest,
    limit: Duration,
    stage: &'static str,
) -> Result<String> {
    let response = tokio::time::timeout(limit, llm.generate(request))
        .await
        .map_err(|_| timed_out(stage, limit))??;
    Ok(response.text)
}

pub(crate) async fn generate_structured(
    llm: &dyn LanguageModel,
    request: GenerateRequest,
    schema: &OutputSchema,
    limit: Duration,
    stage: &'static str,
) -> Result<Value> {
    tokio::time::timeout(limit, llm.generate_structured(request, schema))
        .await
        .map_err(|_| timed_out(stage, limit))?
}

fn timed_out(stage: &str, limit: Duration) -> Error {
    Error::Timeout(format!("{} after {}ms", stage, limit.as_millis()))
}
