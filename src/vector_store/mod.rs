// Vector store abstraction
// Every backend implements VectorStoreHandler; only the factory chooses between them


pub mod azure;
pub mod factory;
pub mod flat;
pub mod lancedb;
pub mod qdrant;
pub mod service;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::Result;

pub use factory::{HandlerSource, VectorDbProvider, VectorStoreFactory};
pub use service::{QueryExample, VectorStoreService};

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// Unit of retrievable content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Storage identifier; handlers assign one when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    /// Provenance such as the example's `sql_query` or the source path
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    #[inline]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            metadata: Map::new(),
        }
    }

    #[inline]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[inline]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// String-valued metadata entry, if present
    #[inline]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// A retrieved document and its relevance to the query (higher is better)
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// Capability contract implemented by each storage backend.
///
/// A handler is bound to one index and one embedding model. Writes are
/// at-least-once and not rolled back on failure.
#[async_trait]
pub trait VectorStoreHandler: Send + Sync {
    /// Name of the bound index/collection
    fn index_name(&self) -> &str;

    /// Initialize a new, empty index. Behaviour on an existing index is
    /// backend-specific: the flat store replaces it, the others fail with
    /// [`crate::RagError::IndexState`].
    async fn create_index(&self) -> Result<()>;

    /// True iff the index is present and queryable
    async fn index_exists(&self) -> Result<bool>;

    /// Embed and upsert `documents`
    async fn store_documents(&self, documents: &[Document]) -> Result<()>;

    /// Permanently remove the index and its vectors
    async fn delete_index(&self) -> Result<()>;

    /// Top-`k` documents scoring at least `score_threshold`, most relevant first
    async fn retrieve_documents(
        &self,
        query: &str,
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredDocument>>;
}

/// Drop candidates below `score_threshold`, order by descending score and
/// keep at most `k`
pub(crate) fn rank_and_filter(
    mut candidates: Vec<ScoredDocument>,
    k: usize,
    score_threshold: f32,
) -> Vec<ScoredDocument> {
    candidates.retain(|c| c.score >= score_threshold);
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    candidates.truncate(k);
    candidates
}

/// Cosine similarity in [-1, 1]; 0.0 for mismatched lengths or zero vectors
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

/// Parse a metadata payload that a backend stored as a JSON string
pub(crate) fn metadata_from_json(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
