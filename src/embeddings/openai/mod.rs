
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Embedder, check_dimensions};
use crate::config::{ConfigError, EmbeddingConfig};
use crate::http::RestClient;
use crate::{RagError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Client for the OpenAI `/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: RestClient,
    model: String,
    dimension: usize,
    batch_size: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingSetting {
                setting: "embeddings.api_key",
                provider: "openai embeddings",
            })?;

        let client = RestClient::new(config.endpoint_url()?)
            .with_timeout(Duration::from_secs(config.timeout_seconds))
            .with_retry_attempts(DEFAULT_RETRY_ATTEMPTS)
            .with_header("Authorization", &format!("Bearer {}", api_key));

        Ok(Self {
            client,
            model: config.model.clone(),
            dimension: config.dimension as usize,
            batch_size: config.batch_size as usize,
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.client = self.client.with_retry_attempts(attempts);
        self
    }

    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.client = self.client.with_backoff(backoff);
        self
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self.client.post_json("embeddings", &request).await?;

        if !response.is_success() {
            let message = response
                .json::<ErrorResponse>()
                .map_or_else(|_| response.body.clone(), |e| e.error.message);
            return Err(RagError::Embedding(format!(
                "OpenAI embeddings request failed (HTTP {}): {}",
                response.status, message
            )));
        }

        let mut parsed: EmbeddingResponse = response.json().map_err(|e| {
            RagError::Embedding(format!("Failed to parse embedding response: {}", e))
        })?;

        if parsed.data.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        check_dimensions(&vectors, self.dimension, &self.model)?;
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Embedding query (length: {})", text.len());
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("Empty embedding response".to_string()))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} documents with {}", texts.len(), self.model);

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size.max(1)) {
            vectors.extend(self.embed_batch(chunk).await?);
        }
        Ok(vectors)
    }
}
