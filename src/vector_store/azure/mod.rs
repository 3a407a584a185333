// Azure AI Search indexes over the REST API


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{Document, ScoredDocument, VectorStoreHandler, metadata_from_json, rank_and_filter};
use crate::embeddings::Embedder;
use crate::http::{RestClient, RestResponse};
use crate::{RagError, Result};

pub const INDEX_BATCH_SIZE: usize = 100;
const VECTOR_FIELD: &str = "content_vector";
const VECTOR_PROFILE: &str = "default-vector-profile";
const HNSW_CONFIG: &str = "default-hnsw";

#[derive(Debug, Serialize)]
struct IndexAction<'a> {
    #[serde(rename = "@search.action")]
    action: &'static str,
    id: String,
    content: &'a str,
    metadata: String,
    content_vector: &'a [f32],
}

#[derive(Debug, Deserialize)]
struct IndexingResponse {
    #[serde(default)]
    value: Vec<IndexingResult>,
}

#[derive(Debug, Deserialize)]
struct IndexingResult {
    key: String,
    status: bool,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "@search.score")]
    score: f32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: Option<String>,
}

/// Handler for the `azure_search` provider
pub struct AzureSearchHandler {
    client: RestClient,
    api_version: String,
    index_name: String,
    embedder: Arc<dyn Embedder>,
}

impl AzureSearchHandler {
    /// The client retries transient failures up to `retry_attempts` times
    #[inline]
    pub fn new(
        endpoint: &str,
        api_key: &str,
        api_version: &str,
        retry_attempts: u32,
        index_name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let client = RestClient::parse(endpoint)?
            .with_header("api-key", api_key)
            .with_retry_attempts(retry_attempts);

        Ok(Self {
            client,
            api_version: api_version.to_string(),
            index_name: index_name.into(),
            embedder,
        })
    }

    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.client = self.client.with_backoff(backoff);
        self
    }

    fn path(&self, suffix: &str) -> String {
        format!("{}?api-version={}", suffix, self.api_version)
    }

    fn index_path(&self) -> String {
        self.path(&format!("indexes/{}", self.index_name))
    }

    fn unexpected(&self, action: &str, response: &RestResponse) -> RagError {
        RagError::BackendUnavailable(format!(
            "Azure Search {} for index '{}' failed (HTTP {}): {}",
            action, self.index_name, response.status, response.body
        ))
    }

    fn index_definition(&self) -> Value {
        json!({
            "name": self.index_name,
            "fields": [
                {"name": "id", "type": "Edm.String", "key": true, "filterable": true},
                {"name": "content", "type": "Edm.String", "searchable": true},
                {"name": "metadata", "type": "Edm.String", "searchable": false},
                {
                    "name": VECTOR_FIELD,
                    "type": "Collection(Edm.Single)",
                    "searchable": true,
                    "dimensions": self.embedder.dimension(),
                    "vectorSearchProfile": VECTOR_PROFILE
                }
            ],
            "vectorSearch": {
                "algorithms": [
                    {"name": HNSW_CONFIG, "kind": "hnsw", "hnswParameters": {"metric": "cosine"}}
                ],
                "profiles": [
                    {"name": VECTOR_PROFILE, "algorithm": HNSW_CONFIG}
                ]
            }
        })
    }

    /// Upload one batch. Rejected documents surface as [`RagError::PartialWrite`]
    async fn upload_batch(&self, actions: &[IndexAction<'_>]) -> Result<()> {
        let path = self.path(&format!("indexes/{}/docs/index", self.index_name));
        let response = self
            .client
            .post_json(&path, &json!({ "value": actions }))
            .await?;

        if response.status != 200 && response.status != 207 {
            return Err(self.unexpected("upload", &response));
        }

        let parsed: IndexingResponse = response.json().map_err(|e| {
            RagError::BackendUnavailable(format!("Invalid Azure Search indexing response: {}", e))
        })?;

        let failed: Vec<String> = parsed
            .value
            .into_iter()
            .filter(|result| !result.status)
            .map(|result| match result.error_message {
                Some(message) => format!("{} ({})", result.key, message),
                None => result.key,
            })
            .collect();

        if !failed.is_empty() {
            error!(
                "Azure Search rejected {} documents in '{}'",
                failed.len(),
                self.index_name
            );
            return Err(RagError::PartialWrite(format!(
                "Azure Search index '{}' rejected documents: {}",
                self.index_name,
                failed.join(", ")
            )));
        }

        if response.status == 207 {
            error!(
                "Azure Search returned 207 for '{}' without failed keys",
                self.index_name
            );
            return Err(RagError::PartialWrite(format!(
                "Azure Search index '{}' reported a partial write without naming the rejected documents",
                self.index_name
            )));
        }

        Ok(())
    }
}

/// Cosine similarity from `@search.score`, which Azure reports as
/// `1 / (1 + cosine distance)` for cosine HNSW profiles
fn cosine_from_search_score(score: f32) -> f32 {
    if score <= 0.0 {
        return -1.0;
    }
    (2.0 - 1.0 / score).max(-1.0)
}

#[async_trait]
impl VectorStoreHandler for AzureSearchHandler {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn create_index(&self) -> Result<()> {
        let response = self
            .client
            .post_json(&self.path("indexes"), &self.index_definition())
            .await?;

        match response.status {
            200..=299 => {
                info!(
                    "Created Azure Search index '{}' ({} dimensions, HNSW cosine)",
                    self.index_name,
                    self.embedder.dimension()
                );
                Ok(())
            }
            409 => Err(RagError::IndexState(format!(
                "Azure Search index '{}' already exists",
                self.index_name
            ))),
            _ => Err(self.unexpected("create", &response)),
        }
    }

    async fn index_exists(&self) -> Result<bool> {
        let response = self.client.get(&self.index_path()).await?;
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

        let actions: Vec<IndexAction<'_>> = documents
            .iter()
            .zip(vectors.iter())
            .map(|(document, vector)| IndexAction {
                action: "mergeOrUpload",
                id: document
                    .id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                content: &document.content,
                metadata: Value::Object(document.metadata.clone()).to_string(),
                content_vector: vector,
            })
            .collect();

        let mut written = 0;
        for batch in actions.chunks(INDEX_BATCH_SIZE) {
            match self.upload_batch(batch).await {
                Ok(()) => {}
                Err(rejected @ RagError::PartialWrite(_)) => return Err(rejected),
                Err(e) => {
                    return Err(RagError::PartialWrite(format!(
                        "Wrote {} of {} documents to Azure Search index '{}' before failure: {}",
                        written,
                        documents.len(),
                        self.index_name,
                        e
                    )));
                }
            }

            written += batch.len();
            debug!("Indexed {}/{} documents", written, documents.len());
        }

        info!(
            "Stored {} documents in Azure Search index '{}'",
            written, self.index_name
        );
        Ok(())
    }

    async fn delete_index(&self) -> Result<()> {
        if !self.index_exists().await? {
            return Err(RagError::IndexState(format!(
                "Cannot delete Azure Search index '{}': it does not exist",
                self.index_name
            )));
        }

        let response = self.client.delete(&self.index_path()).await?;
        if !response.is_success() {
            return Err(self.unexpected("delete", &response));
        }

        info!("Deleted Azure Search index '{}'", self.index_name);
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
            "select": "id,content,metadata",
            "top": k,
            "vectorQueries": [{
                "kind": "vector",
                "vector": vector,
                "fields": VECTOR_FIELD,
                "k": k
            }]
        });

        let path = self.path(&format!("indexes/{}/docs/search", self.index_name));
        let response = self.client.post_json(&path, &body).await?;

        if response.status == 404 {
            return Err(RagError::IndexState(format!(
                "Azure Search index '{}' does not exist",
                self.index_name
            )));
        }
        if !response.is_success() {
            return Err(self.unexpected("search", &response));
        }

        let parsed: SearchResponse = response.json().map_err(|e| {
            RagError::BackendUnavailable(format!("Invalid Azure Search response: {}", e))
        })?;

        let candidates = parsed
            .value
            .into_iter()
            .map(|hit| ScoredDocument {
                document: Document {
                    id: hit.id,
                    content: hit.content,
                    metadata: hit
                        .metadata
                        .as_deref()
                        .map(metadata_from_json)
                        .unwrap_or_default(),
                },
                score: cosine_from_search_score(hit.score),
            })
            .collect();

        Ok(rank_and_filter(candidates, k, score_threshold))
    }
}
