//! Vector Store using Qdrant
//!
//! Dense similarity search over the pre-indexed passage collection.
//! Each point carries the passage text under `text` and its metadata
//! (`source`, `page`, optional `id`) as further payload keys.

use qdrant_client::{
    qdrant::{
        point_id::PointIdOptions, value::Kind, CreateCollectionBuilder, Distance,
        SearchPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
    },
    Qdrant,
};
use std::collections::HashMap;

use scripture_qa_config::constants::{endpoints, rag};
use scripture_qa_config::RagConfig;
use scripture_qa_core::passage::{Passage, META_ID};

use crate::RagError;

/// Payload key holding the passage text
const TEXT_KEY: &str = "text";

/// Vector store configuration
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    /// Qdrant endpoint
    pub endpoint: String,
    /// Collection name
    pub collection: String,
    /// Vector dimension
    pub vector_dim: usize,
    /// Distance metric
    pub distance: VectorDistance,
    /// API key (optional)
    pub api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::QDRANT_DEFAULT.to_string(),
            collection: rag::COLLECTION.to_string(),
            vector_dim: rag::VECTOR_DIM,
            distance: VectorDistance::Cosine,
            api_key: None,
        }
    }
}

impl From<&RagConfig> for VectorStoreConfig {
    fn from(config: &RagConfig) -> Self {
        Self {
            endpoint: config.qdrant_endpoint.clone(),
            collection: config.collection.clone(),
            vector_dim: config.vector_dim,
            distance: VectorDistance::Cosine,
            api_key: config.qdrant_api_key.clone(),
        }
    }
}

/// Distance metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorDistance {
    Cosine,
    Euclidean,
    DotProduct,
}

impl From<VectorDistance> for Distance {
    fn from(d: VectorDistance) -> Self {
        match d {
            VectorDistance::Cosine => Distance::Cosine,
            VectorDistance::Euclidean => Distance::Euclid,
            VectorDistance::DotProduct => Distance::Dot,
        }
    }
}

/// Search hit from the vector store
#[derive(Debug, Clone)]
pub struct VectorSearchResult {
    /// Similarity score
    pub score: f32,
    pub passage: Passage,
}

/// Vector store client
pub struct VectorStore {
    client: Qdrant,
    config: VectorStoreConfig,
}

impl VectorStore {
    /// Create a new vector store connection
    pub fn new(config: VectorStoreConfig) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("Qdrant connection using API key authentication");
        }

        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create collection if not exists
    pub async fn ensure_collection(&self) -> Result<(), RagError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        if !exists {
            tracing::warn!(
                collection = %self.config.collection,
                "Collection missing, creating an empty one"
            );
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(
                            self.config.vector_dim as u64,
                            Distance::from(self.config.distance),
                        ),
                    ),
                )
                .await
                .map_err(|e| RagError::VectorStore(e.to_string()))?;
        }

        Ok(())
    }

    /// Search by vector
    pub async fn search(
        &self,
        query_embedding: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<VectorSearchResult>, RagError> {
        if query_embedding.len() != self.config.vector_dim {
            return Err(RagError::Search(format!(
                "Query embedding has {} dimensions, collection expects {}",
                query_embedding.len(),
                self.config.vector_dim
            )));
        }

        let search_builder =
            SearchPointsBuilder::new(&self.config.collection, query_embedding, top_k as u64)
                .with_payload(true);

        let results = self
            .client
            .search_points(search_builder)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        Ok(results
            .result
            .into_iter()
            .map(|point| {
                let point_id = point
                    .id
                    .and_then(|pid| pid.point_id_options)
                    .map(|opts| match opts {
                        PointIdOptions::Uuid(u) => u,
                        PointIdOptions::Num(n) => n.to_string(),
                    });

                VectorSearchResult {
                    score: point.score,
                    passage: Self::from_payload(point.payload, point_id),
                }
            })
            .collect())
    }

    /// Rebuild a passage from a point payload.
    ///
    /// Non-string payload values (page numbers stored as ints or floats)
    /// are kept as their decimal text.
    fn from_payload(payload: HashMap<String, QdrantValue>, point_id: Option<String>) -> Passage {
        let mut passage = Passage::new(String::new());

        for (k, v) in payload {
            let value = match v.kind {
                Some(Kind::StringValue(s)) => s,
                Some(Kind::IntegerValue(i)) => i.to_string(),
                Some(Kind::DoubleValue(d)) => d.to_string(),
                Some(Kind::BoolValue(b)) => b.to_string(),
                _ => continue,
            };
            if k == TEXT_KEY {
                passage.text = value;
            } else {
                passage.metadata.insert(k, value);
            }
        }

        if let Some(id) = point_id {
            passage.metadata.entry(META_ID.to_string()).or_insert(id);
        }

        passage
    }

    /// Collection name
    pub fn collection(&self) -> &str {
        &self.config.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scripture_qa_core::passage::{META_PAGE, META_SOURCE};

    #[test]
    fn test_config_default() {
        let config = VectorStoreConfig::default();
        assert_eq!(config.vector_dim, 768);
        assert_eq!(config.collection, "scriptures");
        assert_eq!(config.distance, VectorDistance::Cosine);
    }

    #[test]
    fn test_payload_keeps_metadata() {
        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert(TEXT_KEY.to_string(), "Dhritarashtra said".to_string().into());
        payload.insert(META_SOURCE.to_string(), "Bhagavad Gita".to_string().into());
        payload.insert(META_PAGE.to_string(), "1".to_string().into());

        let restored = VectorStore::from_payload(payload, Some("17".to_string()));

        assert_eq!(restored.text, "Dhritarashtra said");
        assert_eq!(restored.document_name(), "Bhagavad Gita");
        assert_eq!(restored.page(), Some(1));
        assert_eq!(restored.identity(), "17");
    }

    #[test]
    fn test_numeric_page_payload() {
        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert(TEXT_KEY.to_string(), "verse".to_string().into());
        payload.insert(META_SOURCE.to_string(), "Ramayana".to_string().into());
        payload.insert(META_PAGE.to_string(), 12.0f64.into());

        let restored = VectorStore::from_payload(payload, None);
        assert_eq!(restored.page(), Some(12));
        assert_eq!(restored.identity(), "verse");
    }
}
