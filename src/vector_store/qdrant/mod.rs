// Qdrant collections over the REST API


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{Document, ScoredDocument, VectorStoreHandler, rank_and_filter};
use crate::config::PointIdStrategy;
use crate::embeddings::Embedder;
use crate::http::{RestClient, RestResponse};
use crate::{RagError, Result};

pub const UPSERT_BATCH_SIZE: usize = 64;

#[derive(Debug, Serialize)]
struct Point<'a> {
    id: Value,
    vector: &'a [f32],
    payload: Payload<'a>,
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    content: &'a str,
    metadata: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<StoredPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct StoredPayload {
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    result: bool,
}

/// Handler for the `qdrant_cloud` provider
pub struct QdrantHandler {
    client: RestClient,
    index_name: String,
    embedder: Arc<dyn Embedder>,
    point_ids: PointIdStrategy,
}

impl QdrantHandler {
    #[inline]
    pub fn new(
        url: &str,
        api_key: &str,
        index_name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
        point_ids: PointIdStrategy,
    ) -> Result<Self> {
        let client = RestClient::parse(url)?.with_header("api-key", api_key);

        Ok(Self {
            client,
            index_name: index_name.into(),
            embedder,
            point_ids,
        })
    }

    fn collection_path(&self) -> String {
        format!("collections/{}", self.index_name)
    }

    fn unexpected(&self, action: &str, response: &RestResponse) -> RagError {
        RagError::BackendUnavailable(format!(
            "Qdrant {} for collection '{}' failed (HTTP {}): {}",
            action, self.index_name, response.status, response.body
        ))
    }

    /// Point id for the `position`-th document of one store call
    fn point_id(&self, position: usize, document: &Document) -> Value {
        match self.point_ids {
            PointIdStrategy::Sequential => json!(position),
            PointIdStrategy::Uuid => {
                let id = document
                    .id
                    .as_deref()
                    .and_then(|id| Uuid::parse_str(id).ok())
                    .unwrap_or_else(Uuid::new_v4);
                json!(id.to_string())
            }
        }
    }
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl VectorStoreHandler for QdrantHandler {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn create_index(&self) -> Result<()> {
        let body = json!({
            "vectors": {
                "size": self.embedder.dimension(),
                "distance": "Cosine"
            }
        });

        let response = self.client.put_json(&self.collection_path(), &body).await?;
        match response.status {
            200..=299 => {
                info!(
                    "Created Qdrant collection '{}' ({} dimensions, cosine)",
                    self.index_name,
                    self.embedder.dimension()
                );
                Ok(())
            }
            409 => Err(RagError::IndexState(format!(
                "Qdrant collection '{}' already exists",
                self.index_name
            ))),
            _ => Err(self.unexpected("create", &response)),
        }
    }

    async fn index_exists(&self) -> Result<bool> {
        let response = self.client.get(&self.collection_path()).await?;
        match response.status {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(self.unexpected("lookup", &response)),
        }
    }

    async fn store_documents(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            debug!("No documents to store");
            return Ok(());
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;

        let path = format!("{}/points?wait=true", self.collection_path());
        let mut written = 0;

        for (batch_index, batch) in documents.chunks(UPSERT_BATCH_SIZE).enumerate() {
            let offset = batch_index * UPSERT_BATCH_SIZE;
            let points: Vec<Point<'_>> = batch
                .iter()
                .enumerate()
                .map(|(i, document)| Point {
                    id: self.point_id(offset + i, document),
                    vector: &vectors[offset + i],
                    payload: Payload {
                        content: &document.content,
                        metadata: &document.metadata,
                    },
                })
                .collect();

            let outcome = self
                .client
                .put_json(&path, &json!({ "points": points }))
                .await;

            let failure = match outcome {
                Ok(response) if response.is_success() => None,
                Ok(response) => Some(format!("HTTP {}: {}", response.status, response.body)),
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = failure {
                error!(
                    "Upsert into '{}' failed after {} of {} points: {}",
                    self.index_name,
                    written,
                    documents.len(),
                    reason
                );
                return Err(RagError::PartialWrite(format!(
                    "Wrote {} of {} points to Qdrant collection '{}' before failure: {}",
                    written,
                    documents.len(),
                    self.index_name,
                    reason
                )));
            }

            written += batch.len();
            debug!("Upserted {}/{} points", written, documents.len());
        }

        info!(
            "Stored {} documents in Qdrant collection '{}'",
            written, self.index_name
        );
        Ok(())
    }

    async fn delete_index(&self) -> Result<()> {
        let response = self.client.delete(&self.collection_path()).await?;

        if response.status == 404 {
            return Err(RagError::IndexState(format!(
                "Cannot delete Qdrant collection '{}': it does not exist",
                self.index_name
            )));
        }
        if !response.is_success() {
            return Err(self.unexpected("delete", &response));
        }

        let parsed: DeleteResponse = response.json().map_err(|e| {
            RagError::BackendUnavailable(format!("Invalid Qdrant delete response: {}", e))
        })?;
        if !parsed.result {
            return Err(RagError::IndexState(format!(
                "Cannot delete Qdrant collection '{}': it does not exist",
                self.index_name
            )));
        }

        info!("Deleted Qdrant collection '{}'", self.index_name);
        Ok(())
    }

    async fn retrieve_documents(
        &self,
        query: &str,
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredDocument>> {
        let vector = self.embedder.embed_query(query).await?;
        let body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
            "score_threshold": score_threshold
        });

        let path = format!("{}/points/search", self.collection_path());
        let response = self.client.post_json(&path, &body).await?;

        if response.status == 404 {
            return Err(RagError::IndexState(format!(
                "Qdrant collection '{}' does not exist",
                self.index_name
            )));
        }
        if !response.is_success() {
            return Err(self.unexpected("search", &response));
        }

        let parsed: SearchResponse = response.json().map_err(|e| {
            RagError::BackendUnavailable(format!("Invalid Qdrant search response: {}", e))
        })?;

        let candidates = parsed
            .result
            .into_iter()
            .map(|hit| {
                let payload = hit.payload.unwrap_or_default();
                ScoredDocument {
                    document: Document {
                        id: Some(id_to_string(&hit.id)),
                        content: payload.content,
                        metadata: payload.metadata,
                    },
                    score: hit.score,
                }
            })
            .collect();

        // Server-side thresholding is not relied on
        Ok(rank_and_filter(candidates, k, score_threshold))
    }
}
