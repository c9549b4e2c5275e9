//! Answer synthesizer
//!
//! Produces a cited answer from the retrieved passages with a
//! schema-constrained call. When the provider rejects the structured output,
//! the answer is salvaged in two stages:
//!
//! 1. tolerant parse of the raw payload carried by the validation error
//! 2. the same request without a schema constraint, tolerantly parsed
//!
//! If both fail the turn gets the fixed apology. Nothing here returns an error.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use scripture_qa_core::{
    AnswerResult, Citation, ConversationTurn, GenerateRequest, LanguageModel, OutputSchema,
    RetrievedPassage,
};
use scripture_qa_llm::parse_lenient;

use crate::llm_call;
use crate::prompts;

/// Evaluator feedback carried into a refinement pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementFeedback {
    pub previous_answer: String,
    pub reasoning: String,
}

/// One source document in a turn's passage set
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogDocument {
    pub name: String,
    /// 1-based ordinal, stable for the turn
    pub number: u32,
    pub pages: Vec<u32>,
    pub passages: Vec<String>,
}

/// Passages grouped by source document, numbered in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentCatalog {
    documents: Vec<CatalogDocument>,
}

impl DocumentCatalog {
    pub fn from_passages(passages: &[RetrievedPassage]) -> Self {
        let mut documents: Vec<CatalogDocument> = Vec::new();

        for passage in passages {
            let name = passage.document_name();
            let idx = match documents.iter().position(|d| d.name == name) {
                Some(idx) => idx,
                None => {
                    documents.push(CatalogDocument {
                        name: name.to_string(),
                        number: documents.len() as u32 + 1,
                        pages: Vec::new(),
                        passages: Vec::new(),
                    });
                    documents.len() - 1
                },
            };

            let doc = &mut documents[idx];
            if let Some(page) = passage.page() {
                if !doc.pages.contains(&page) {
                    doc.pages.push(page);
                }
            }
            doc.passages.push(passage.text().to_string());
        }

        Self { documents }
    }

    pub fn documents(&self) -> &[CatalogDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Find a document by name, ignoring case and surrounding whitespace
    pub fn lookup(&self, name: &str) -> Option<&CatalogDocument> {
        let name = name.trim();
        self.documents
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Find a document by its 1-based ordinal
    pub fn by_number(&self, number: u32) -> Option<&CatalogDocument> {
        self.documents.iter().find(|d| d.number == number)
    }

    /// Prompt rendering: `[n] name (pages ...)` followed by its passages
    pub fn render(&self) -> String {
        if self.documents.is_empty() {
            return "(no documents)".to_string();
        }

        self.documents
            .iter()
            .map(|doc| {
                let mut header = format!("[{}] document_name: {}", doc.number, doc.name);
                if !doc.pages.is_empty() {
                    let pages: Vec<String> = doc.pages.iter().map(u32::to_string).collect();
                    header.push_str(&format!(" (pages {})", pages.join(", ")));
                }
                format!("{}\n{}", header, doc.passages.join("\n\n"))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn LanguageModel>,
    timeout: Duration,
    temperature: f32,
    schema: OutputSchema,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, timeout: Duration, temperature: f32) -> Self {
        Self {
            llm,
            timeout,
            temperature,
            schema: Self::output_schema(),
        }
    }

    /// `{answer, citations: [{document_name, document_number, page_numbers}]}`
    pub fn output_schema() -> OutputSchema {
        OutputSchema::new(
            "answer",
            "Answer grounded in the provided documents, with citations",
            json!({
                "type": "object",
                "properties": {
                    "answer": { "type": "string" },
                    "citations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "document_name": { "type": "string" },
                                "document_number": { "type": "integer" },
                                "page_numbers": {
                                    "type": "array",
                                    "items": { "type": "integer" }
                                }
                            },
                            "required": ["document_name", "document_number", "page_numbers"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["answer", "citations"],
                "additionalProperties": false
            }),
        )
    }

    pub async fn synthesize(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
        history: &[ConversationTurn],
        feedback: Option<&RefinementFeedback>,
    ) -> AnswerResult {
        let catalog = DocumentCatalog::from_passages(passages);
        let user_prompt = prompts::synthesis_user(question, &catalog, history, feedback);

        let request = GenerateRequest::new(prompts::SYNTHESIS_SYSTEM)
            .with_user_message(user_prompt.clone())
            .with_temperature(self.temperature);

        let result = llm_call::generate_structured(
            self.llm.as_ref(),
            request,
            &self.schema,
            self.timeout,
            "synthesis",
        )
        .await;

        match result {
            Ok(value) => {
                if let Some(answer) = answer_from_value(&value, &catalog) {
                    return answer;
                }
                tracing::warn!("Structured answer had no answer text");
            },
            Err(e) => match e.schema_payload() {
                Some(raw) => {
                    tracing::warn!(error = %e, "Structured answer rejected, salvaging payload");
                    if let Some(answer) = try_salvage_answer(raw, &catalog) {
                        record_salvage("payload");
                        return answer;
                    }
                },
                None => {
                    tracing::warn!(error = %e, "Answer synthesis failed");
                    record_salvage("apology");
                    return AnswerResult::apology();
                },
            },
        }

        self.synthesize_unconstrained(&user_prompt, &catalog).await
    }

    /// Second salvage stage: same prompt, no schema, tolerant parse
    async fn synthesize_unconstrained(&self, user_prompt: &str, catalog: &DocumentCatalog) -> AnswerResult {
        let system = format!(
            "{}\n\n{}\nThe object must match this JSON schema:\n{}",
            prompts::SYNTHESIS_SYSTEM,
            prompts::JSON_ONLY_SUFFIX,
            self.schema.schema
        );
        let request = GenerateRequest::new(system)
            .with_user_message(user_prompt)
            .with_temperature(self.temperature);

        match llm_call::generate_text(self.llm.as_ref(), request, self.timeout, "synthesis_unconstrained").await {
            Ok(text) => match try_salvage_answer(&text, catalog) {
                Some(answer) => {
                    record_salvage("unconstrained");
                    answer
                },
                None => {
                    tracing::warn!("Unconstrained answer could not be parsed, apologising");
                    record_salvage("apology");
                    AnswerResult::apology()
                },
            },
            Err(e) => {
                tracing::warn!(error = %e, "Unconstrained synthesis failed, apologising");
                record_salvage("apology");
                AnswerResult::apology()
            },
        }
    }
}

fn record_salvage(outcome: &'static str) {
    metrics::counter!("scripture_qa_salvage_total", "stage" => "synthesis", "outcome" => outcome)
        .increment(1);
}

/// Best-effort answer from a malformed payload, or the apology.
///
/// Never fails: truncated JSON, a missing `answer` key or plain prose all
/// end in a well-formed `AnswerResult`.
pub fn salvage_answer(raw: &str, catalog: &DocumentCatalog) -> AnswerResult {
    try_salvage_answer(raw, catalog).unwrap_or_else(AnswerResult::apology)
}

fn try_salvage_answer(raw: &str, catalog: &DocumentCatalog) -> Option<AnswerResult> {
    let value = parse_lenient(raw)?;
    answer_from_value(&value, catalog)
}

/// Build an answer from a (possibly partial) JSON value.
///
/// Citations are checked against the catalog: a name that matches no
/// document falls back to the cited ordinal, citations matching neither are
/// dropped, ordinals are taken from the catalog, and citations of the same
/// document are merged.
fn answer_from_value(value: &Value, catalog: &DocumentCatalog) -> Option<AnswerResult> {
    let answer = value.get("answer")?.as_str()?.trim();
    if answer.is_empty() {
        return None;
    }

    let mut citations: Vec<Citation> = Vec::new();
    let raw_citations = value
        .get("citations")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for raw in raw_citations {
        let name = raw.get("document_name").and_then(Value::as_str).unwrap_or_default();
        let by_number = || {
            raw.get("document_number")
                .and_then(document_number)
                .and_then(|n| catalog.by_number(n))
        };
        let doc = match catalog.lookup(name) {
            Some(doc) => doc,
            None => match by_number() {
                Some(doc) => {
                    tracing::debug!(cited = name, document = %doc.name, "Citation matched by document number");
                    doc
                },
                None => {
                    tracing::warn!(document = name, "Dropping citation of a document outside the passage set");
                    continue;
                },
            },
        };

        let pages = raw.get("page_numbers").map(page_list).unwrap_or_default();

        match citations.iter_mut().find(|c| c.document_number == doc.number) {
            Some(existing) => {
                for page in pages {
                    if !existing.page_numbers.contains(&page) {
                        existing.page_numbers.push(page);
                    }
                }
                existing.page_numbers.sort_unstable();
            },
            None => {
                let mut pages = pages;
                pages.sort_unstable();
                pages.dedup();
                citations.push(Citation::new(doc.name.clone(), doc.number, pages));
            },
        }
    }

    citations.sort_by_key(|c| c.document_number);
    Some(AnswerResult::new(answer, citations))
}

/// Ordinal given as an integer or a numeric string
fn document_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Page numbers given as integers, floats, numeric strings, or a single value
fn page_list(value: &Value) -> Vec<u32> {
    let one = |v: &Value| -> Option<u32> {
        match v {
            Value::Number(n) => n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u32),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u32),
            _ => None,
        }
    };
    match value {
        Value::Array(items) => items.iter().filter_map(one).collect(),
        other => one(other).into_iter().collect(),
    }
}
