//! Passage types produced by the document store and the retriever

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key holding the source document name
pub const META_SOURCE: &str = "source";
/// Metadata key holding the page number (optional)
pub const META_PAGE: &str = "page";
/// Metadata key holding a stable passage id (optional)
pub const META_ID: &str = "id";

/// Passage-level record as stored in the document store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Passage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the source document name
    pub fn with_source(self, source: impl Into<String>) -> Self {
        self.with_metadata(META_SOURCE, source)
    }

    /// Set the page number
    pub fn with_page(self, page: u32) -> Self {
        self.with_metadata(META_PAGE, page.to_string())
    }

    /// Source document name, `"unknown"` when the store did not record one
    pub fn document_name(&self) -> &str {
        self.metadata
            .get(META_SOURCE)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
    }

    /// Page number, if recorded and numeric
    pub fn page(&self) -> Option<u32> {
        self.metadata
            .get(META_PAGE)
            .and_then(|p| p.trim().parse::<f64>().ok())
            .filter(|p| *p >= 0.0)
            .map(|p| p as u32)
    }

    /// Identity used to detect the same passage in both search lists.
    ///
    /// Stores that assign ids use them; otherwise the text itself is the key.
    pub fn identity(&self) -> &str {
        self.metadata
            .get(META_ID)
            .map(String::as_str)
            .unwrap_or(&self.text)
    }
}

/// Which search produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Dense,
    Lexical,
    Hybrid,
    Reranked,
}

/// Passage with the score assigned by the retrieval stage that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    #[serde(flatten)]
    pub passage: Passage,
    pub score: f32,
    pub source: SearchSource,
}

impl RetrievedPassage {
    pub fn new(passage: Passage, score: f32, source: SearchSource) -> Self {
        Self {
            passage,
            score,
            source,
        }
    }

    pub fn text(&self) -> &str {
        &self.passage.text
    }

    pub fn document_name(&self) -> &str {
        self.passage.document_name()
    }

    pub fn page(&self) -> Option<u32> {
        self.passage.page()
    }
}
