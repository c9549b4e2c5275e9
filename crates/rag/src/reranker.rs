//! Cross-Encoder Rerankers
//!
//! Every retrieval is reranked; the variants only differ in where the
//! cross-encoder runs:
//! - `RemoteReranker`: HTTP rerank service (TEI `/rerank` wire format)
//! - `CrossEncoderReranker`: in-process ONNX model (`onnx` feature)
//! - `KeywordReranker`: TF-IDF-like lexical scorer, needs no model
//!
//! The variant is chosen once at startup by `build_reranker`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use scripture_qa_config::RerankerSettings;
use scripture_qa_core::{Reranker, Result, RetrievedPassage, SearchSource};

use crate::RagError;

#[cfg(feature = "onnx")]
pub use onnx::CrossEncoderReranker;

/// Apply one score per passage, sort descending and keep `top_n`.
///
/// The sort is stable, so equal scores keep their fused order.
fn apply_scores(
    passages: Vec<RetrievedPassage>,
    scores: Vec<f32>,
    top_n: usize,
) -> Vec<RetrievedPassage> {
    let mut scored: Vec<RetrievedPassage> = passages
        .into_iter()
        .zip(scores)
        .map(|(mut p, score)| {
            p.score = score;
            p.source = SearchSource::Reranked;
            p
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_n);
    scored
}

/// Build the configured reranker
pub fn build_reranker(
    settings: &RerankerSettings,
    timeout: Duration,
) -> std::result::Result<Arc<dyn Reranker>, RagError> {
    let reranker: Arc<dyn Reranker> = match settings.kind.as_str() {
        "keyword" => Arc::new(KeywordReranker::new()),
        "remote" => Arc::new(RemoteReranker::new(RemoteRerankerConfig {
            endpoint: settings.endpoint.clone(),
            timeout,
        })?),
        #[cfg(feature = "onnx")]
        "onnx" => {
            let model_path = settings.model_path.as_deref().ok_or_else(|| {
                RagError::Configuration("rag.reranker.model_path is required for onnx".to_string())
            })?;
            Arc::new(CrossEncoderReranker::from_settings(
                model_path,
                settings.tokenizer_path.as_deref(),
                settings.max_seq_len,
            )?)
        },
        #[cfg(not(feature = "onnx"))]
        "onnx" => {
            return Err(RagError::Configuration(
                "reranker kind 'onnx' requires building with the onnx feature".to_string(),
            ))
        },
        other => {
            return Err(RagError::Configuration(format!(
                "unknown reranker kind '{}'",
                other
            )))
        },
    };

    tracing::info!(reranker = reranker.name(), "Reranker selected");
    Ok(reranker)
}

/// TF-IDF-like lexical scorer
///
/// Uses term frequency and an inverse document frequency approximation.
pub struct SimpleScorer;

impl SimpleScorer {
    const STOPWORDS: &'static [&'static str] = &[
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
        "can", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "through",
        "during", "before", "after", "above", "below", "between", "under", "again", "then",
        "once", "here", "there", "when", "where", "why", "how", "all", "each", "more", "most",
        "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too",
        "very", "just", "and", "but", "if", "or", "because", "until", "while", "about", "i", "me",
        "my", "we", "our", "you", "your", "he", "him", "his", "she", "her", "it", "its", "they",
        "them", "their", "what", "which", "who", "whom", "this", "that", "these", "those", "tell",
    ];

    fn terms(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Score using TF-IDF-like weighting
    ///
    /// - Term frequency: sqrt(count in doc) for diminishing returns
    /// - IDF approximation: log(1 + word_length) favors specific terms
    /// - Position boost: words appearing early in query get slight boost
    /// - Coverage bonus for matching more of the query
    pub fn score(query: &str, document: &str) -> f32 {
        let query_terms: Vec<String> = Self::terms(query)
            .into_iter()
            .filter(|w| w.len() > 1 && !Self::STOPWORDS.contains(&w.as_str()))
            .collect();

        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_words = Self::terms(document);
        let doc_len = doc_words.len().max(1) as f32;
        let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());

        let mut total_score = 0.0f32;
        let mut matched_terms = 0usize;

        for (pos, term) in query_terms.iter().enumerate() {
            let tf = doc_words.iter().filter(|w| *w == term).count() as f32;
            if tf > 0.0 {
                matched_terms += 1;
                let idf_approx = (1.0 + term.len() as f32).ln();
                let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
                total_score += tf.sqrt() * idf_approx * position_weight * length_norm;
            }
        }

        let coverage = matched_terms as f32 / query_terms.len() as f32;
        let raw_score = total_score + coverage * 0.3;
        (raw_score / (raw_score + 1.0)).min(1.0)
    }
}

/// Reranker backed by `SimpleScorer`
#[derive(Debug, Default)]
pub struct KeywordReranker;

impl KeywordReranker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reranker for KeywordReranker {
    async fn rerank(
        &self,
        query: &str,
        passages: Vec<RetrievedPassage>,
        top_n: usize,
    ) -> Result<Vec<RetrievedPassage>> {
        let scores = passages
            .iter()
            .map(|p| SimpleScorer::score(query, p.text()))
            .collect();
        Ok(apply_scores(passages, scores, top_n))
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Remote rerank service configuration
#[derive(Debug, Clone)]
pub struct RemoteRerankerConfig {
    /// Service base URL; requests go to `{endpoint}/rerank`
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

/// Cross-encoder served over HTTP
pub struct RemoteReranker {
    client: Client,
    config: RemoteRerankerConfig,
}

impl RemoteReranker {
    pub fn new(config: RemoteRerankerConfig) -> std::result::Result<Self, RagError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn score(&self, query: &str, texts: Vec<&str>) -> std::result::Result<Vec<f32>, RagError> {
        let count = texts.len();
        let url = format!("{}/rerank", self.config.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&RerankRequest {
                query,
                texts,
                truncate: true,
            })
            .send()
            .await
            .map_err(|e| RagError::Reranker(format!("Rerank request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Reranker(format!(
                "Rerank service returned {} - {}",
                status, body
            )));
        }

        let hits: Vec<RerankHit> = response
            .json()
            .await
            .map_err(|e| RagError::Reranker(format!("Invalid rerank response: {}", e)))?;

        scores_by_index(hits, count)
    }
}

/// Map index-addressed hits back to input order
fn scores_by_index(hits: Vec<RerankHit>, count: usize) -> std::result::Result<Vec<f32>, RagError> {
    let mut scores = vec![f32::NEG_INFINITY; count];
    for hit in hits {
        let slot = scores.get_mut(hit.index).ok_or_else(|| {
            RagError::Reranker(format!("Rerank index {} out of range ({})", hit.index, count))
        })?;
        *slot = hit.score;
    }
    Ok(scores)
}

#[async_trait]
impl Reranker for RemoteReranker {
    async fn rerank(
        &self,
        query: &str,
        passages: Vec<RetrievedPassage>,
        top_n: usize,
    ) -> Result<Vec<RetrievedPassage>> {
        if passages.is_empty() {
            return Ok(passages);
        }
        let scores = {
            let texts: Vec<&str> = passages.iter().map(|p| p.text()).collect();
            self.score(query, texts).await?
        };
        Ok(apply_scores(passages, scores, top_n))
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(feature = "onnx")]
mod onnx {
    use super::*;
    use ndarray::Array2;
    use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use tokenizers::Tokenizer;

    struct CrossEncoderModel {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
        max_seq_len: usize,
        uses_token_types: bool,
    }

    /// In-process ONNX cross-encoder (e.g. ms-marco-MiniLM)
    pub struct CrossEncoderReranker {
        model: Arc<CrossEncoderModel>,
    }

    impl CrossEncoderReranker {
        pub fn new(
            model_path: impl AsRef<Path>,
            tokenizer_path: impl AsRef<Path>,
            max_seq_len: usize,
        ) -> std::result::Result<Self, RagError> {
            let session = Session::builder()
                .map_err(|e| RagError::Model(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| RagError::Model(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e| RagError::Model(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| RagError::Model(e.to_string()))?;

            let uses_token_types = session.inputs.iter().any(|i| i.name == "token_type_ids");

            let tokenizer =
                Tokenizer::from_file(tokenizer_path).map_err(|e| RagError::Model(e.to_string()))?;

            Ok(Self {
                model: Arc::new(CrossEncoderModel {
                    session: Mutex::new(session),
                    tokenizer,
                    max_seq_len,
                    uses_token_types,
                }),
            })
        }

        /// Tokenizer defaults to `tokenizer.json` next to the model
        pub fn from_settings(
            model_path: &str,
            tokenizer_path: Option<&str>,
            max_seq_len: usize,
        ) -> std::result::Result<Self, RagError> {
            let tokenizer_path = match tokenizer_path {
                Some(p) => PathBuf::from(p),
                None => Path::new(model_path)
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join("tokenizer.json"),
            };
            Self::new(model_path, tokenizer_path, max_seq_len)
        }
    }

    impl CrossEncoderModel {
        fn score_pair(&self, query: &str, document: &str) -> std::result::Result<f32, RagError> {
            let encoding = self
                .tokenizer
                .encode((query, document), true)
                .map_err(|e| RagError::Reranker(e.to_string()))?;

            let len = encoding.get_ids().len().min(self.max_seq_len);
            let to_array = |values: Vec<i64>| {
                Array2::from_shape_vec((1, len), values)
                    .map_err(|e| RagError::Reranker(e.to_string()))
            };

            let ids = to_array(encoding.get_ids()[..len].iter().map(|&v| v as i64).collect())?;
            let mask = to_array(vec![1i64; len])?;
            let types = to_array(
                encoding.get_type_ids()[..len]
                    .iter()
                    .map(|&v| v as i64)
                    .collect(),
            )?;

            let ids = Tensor::from_array(ids).map_err(|e| RagError::Model(e.to_string()))?;
            let mask = Tensor::from_array(mask).map_err(|e| RagError::Model(e.to_string()))?;

            let mut session = self.session.lock();
            let run_result = if self.uses_token_types {
                let types = Tensor::from_array(types).map_err(|e| RagError::Model(e.to_string()))?;
                session.run(ort::inputs![
                    "input_ids" => ids,
                    "attention_mask" => mask,
                    "token_type_ids" => types,
                ])
            } else {
                session.run(ort::inputs![
                    "input_ids" => ids,
                    "attention_mask" => mask,
                ])
            };
            let outputs = run_result.map_err(|e| RagError::Model(e.to_string()))?;

            let (_, logits) = outputs
                .get("logits")
                .ok_or_else(|| RagError::Model("Missing logits output".to_string()))?
                .try_extract_tensor::<f32>()
                .map_err(|e| RagError::Model(e.to_string()))?;

            Ok(relevance_from_logits(logits))
        }
    }

    /// Single logit: sigmoid. Two logits: softmax probability of "relevant".
    fn relevance_from_logits(logits: &[f32]) -> f32 {
        match logits {
            [single] => 1.0 / (1.0 + (-single).exp()),
            [irrelevant, relevant, ..] => {
                let max = irrelevant.max(*relevant);
                let a = (irrelevant - max).exp();
                let b = (relevant - max).exp();
                b / (a + b)
            },
            [] => 0.0,
        }
    }

    #[async_trait]
    impl Reranker for CrossEncoderReranker {
        async fn rerank(
            &self,
            query: &str,
            passages: Vec<RetrievedPassage>,
            top_n: usize,
        ) -> Result<Vec<RetrievedPassage>> {
            let model = Arc::clone(&self.model);
            let query = query.to_string();
            let texts: Vec<String> = passages.iter().map(|p| p.text().to_string()).collect();

            // ONNX inference is CPU-bound
            let scores = tokio::task::spawn_blocking(move || {
                texts
                    .iter()
                    .map(|t| model.score_pair(&query, t))
                    .collect::<std::result::Result<Vec<f32>, RagError>>()
            })
            .await
            .map_err(|e| RagError::Reranker(format!("Rerank task failed: {}", e)))??;

            Ok(apply_scores(passages, scores, top_n))
        }

        fn name(&self) -> &str {
            "onnx"
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_relevance_from_logits() {
            assert!((relevance_from_logits(&[0.0]) - 0.5).abs() < 1e-6);
            assert!(relevance_from_logits(&[-2.0, 3.0]) > 0.9);
            assert_eq!(relevance_from_logits(&[]), 0.0);
        }
    }
}
