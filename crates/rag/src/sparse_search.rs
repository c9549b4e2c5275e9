//! Sparse Search using Tantivy (BM25)
//!
//! Provides keyword-based search for hybrid retrieval. Queries are parsed
//! leniently: user questions contain `?`, quotes and colons that the strict
//! query grammar rejects.

use parking_lot::Mutex;
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument,
};

use scripture_qa_core::passage::{Passage, META_ID, META_PAGE, META_SOURCE};

use crate::RagError;

const TOKENIZER_NAME: &str = "scripture_en";
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Sparse search configuration
#[derive(Debug, Clone)]
pub struct SparseConfig {
    /// Index path (use RAM if None)
    pub index_path: Option<String>,
    /// Enable stemming
    pub stemming: bool,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            stemming: true,
        }
    }
}

/// Sparse search result
#[derive(Debug, Clone)]
pub struct SparseResult {
    /// BM25 score
    pub score: f32,
    pub passage: Passage,
}

/// Sparse index for BM25 search
pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    /// Created on first write; the serving path only reads.
    writer: Mutex<Option<IndexWriter>>,
    id_field: Field,
    text_field: Field,
    source_field: Field,
    page_field: Field,
}

impl SparseIndex {
    /// Open (or create) a sparse index
    pub fn new(config: SparseConfig) -> Result<Self, RagError> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(TOKENIZER_NAME)
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let id_field = schema_builder.add_text_field(META_ID, STRING | STORED);
        let text_field = schema_builder.add_text_field("text", text_options);
        let source_field = schema_builder.add_text_field(META_SOURCE, STRING | STORED);
        let page_field = schema_builder.add_text_field(META_PAGE, STRING | STORED);

        let schema = schema_builder.build();

        let index = if let Some(ref path) = config.index_path {
            std::fs::create_dir_all(path).map_err(|e| RagError::Index(e.to_string()))?;
            let dir = tantivy::directory::MmapDirectory::open(Path::new(path))
                .map_err(|e| RagError::Index(e.to_string()))?;
            Index::open_or_create(dir, schema)
                .map_err(|e| RagError::Index(e.to_string()))?
        } else {
            Index::create_in_ram(schema)
        };

        index
            .tokenizers()
            .register(TOKENIZER_NAME, Self::build_tokenizer(&config));

        let reader = index.reader().map_err(|e| RagError::Index(e.to_string()))?;

        let sparse = Self {
            index,
            reader,
            writer: Mutex::new(None),
            id_field,
            text_field,
            source_field,
            page_field,
        };

        tracing::info!(
            path = config.index_path.as_deref().unwrap_or("<memory>"),
            stemming = config.stemming,
            docs = sparse.doc_count(),
            "Sparse index opened"
        );

        Ok(sparse)
    }

    fn build_tokenizer(config: &SparseConfig) -> TextAnalyzer {
        let base = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser);

        if config.stemming {
            base.filter(Stemmer::new(Language::English)).build()
        } else {
            base.build()
        }
    }

    /// Index passages and make them visible to searches
    pub fn index_passages(&self, passages: &[Passage]) -> Result<(), RagError> {
        let mut guard = self.writer.lock();
        if guard.is_none() {
            let writer = self
                .index
                .writer(WRITER_HEAP_BYTES)
                .map_err(|e| RagError::Index(e.to_string()))?;
            *guard = Some(writer);
        }
        let writer = guard
            .as_mut()
            .ok_or_else(|| RagError::Index("Writer not available".to_string()))?;

        for passage in passages {
            let mut doc = TantivyDocument::default();

            doc.add_text(self.id_field, passage.identity());
            doc.add_text(self.text_field, &passage.text);

            if let Some(source) = passage.metadata.get(META_SOURCE) {
                doc.add_text(self.source_field, source);
            }
            if let Some(page) = passage.metadata.get(META_PAGE) {
                doc.add_text(self.page_field, page);
            }

            writer
                .add_document(doc)
                .map_err(|e| RagError::Index(e.to_string()))?;
        }

        writer
            .commit()
            .map_err(|e| RagError::Index(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| RagError::Index(e.to_string()))?;

        Ok(())
    }

    /// Search using BM25
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SparseResult>, RagError> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);

        let (parsed, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!(query, errors = errors.len(), "Lenient parse dropped query parts");
        }

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(top_k))
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());

        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| RagError::Search(e.to_string()))?;

            let text = Self::stored_str(&doc, self.text_field).unwrap_or_default();
            let mut passage = Passage::new(text);

            if let Some(id) = Self::stored_str(&doc, self.id_field) {
                // Ids equal to the text were synthesised at index time
                if id != passage.text {
                    passage.metadata.insert(META_ID.to_string(), id);
                }
            }
            if let Some(source) = Self::stored_str(&doc, self.source_field) {
                passage.metadata.insert(META_SOURCE.to_string(), source);
            }
            if let Some(page) = Self::stored_str(&doc, self.page_field) {
                passage.metadata.insert(META_PAGE.to_string(), page);
            }

            results.push(SparseResult { score, passage });
        }

        Ok(results)
    }

    fn stored_str(doc: &TantivyDocument, field: Field) -> Option<String> {
        match doc.get_first(field) {
            Some(OwnedValue::Str(s)) => Some(s.to_string()),
            _ => None,
        }
    }

    /// Get document count
    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<Passage> {
        vec![
            Passage::new("Arjuna lowered his bow and refused to fight his kinsmen")
                .with_source("Bhagavad Gita")
                .with_page(3),
            Passage::new("Rama went into exile in the forest for fourteen years")
                .with_source("Ramayana")
                .with_page(88),
            Passage::new("Krishna counsels Arjuna on duty and action")
                .with_source("Bhagavad Gita")
                .with_page(5)
                .with_metadata(META_ID, "gita-5"),
        ]
    }

    #[test]
    fn test_sparse_index_create() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        assert_eq!(index.doc_count(), 0);
    }

    #[test]
    fn test_index_and_search() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        index.index_passages(&corpus()).unwrap();
        assert_eq!(index.doc_count(), 3);

        let results = index.search("exile forest", 5).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].passage.document_name(), "Ramayana");
        assert_eq!(results[0].passage.page(), Some(88));
    }

    #[test]
    fn test_question_punctuation_is_tolerated() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        index.index_passages(&corpus()).unwrap();

        let results = index.search("Why did Arjuna refuse: to \"fight\"?", 5).unwrap();
        assert!(!results.is_empty());
        assert!(results[0].passage.text.contains("Arjuna"));
    }

    #[test]
    fn test_ids_preserved() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        index.index_passages(&corpus()).unwrap();

        let results = index.search("counsels duty", 1).unwrap();
        assert_eq!(results[0].passage.identity(), "gita-5");
    }

    #[test]
    fn test_empty_query() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        index.index_passages(&corpus()).unwrap();
        assert!(index.search("   ", 5).unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_index_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexical").to_string_lossy().to_string();
        {
            let index = SparseIndex::new(SparseConfig {
                index_path: Some(path.clone()),
                stemming: true,
            })
            .unwrap();
            index.index_passages(&corpus()).unwrap();
        }

        let reopened = SparseIndex::new(SparseConfig {
            index_path: Some(path),
            stemming: true,
        })
        .unwrap();
        assert_eq!(reopened.doc_count(), 3);
    }
}
