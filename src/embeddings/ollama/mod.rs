
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Embedder, check_dimensions};
use crate::config::EmbeddingConfig;
use crate::http::RestClient;
use crate::{RagError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Client for a local Ollama server's `/api/embed` endpoint
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: RestClient,
    model: String,
    dimension: usize,
    batch_size: usize,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = RestClient::new(config.endpoint_url()?)
            .with_timeout(Duration::from_secs(config.timeout_seconds))
            .with_retry_attempts(DEFAULT_RETRY_ATTEMPTS);

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
        let request = BatchEmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self.client.post_json("api/embed", &request).await?;

        if !response.is_success() {
            let message = response
                .json::<ErrorResponse>()
                .map_or_else(|_| response.body.clone(), |e| e.error);
            return Err(RagError::Embedding(format!(
                "Ollama embed request failed (HTTP {}): {}",
                response.status, message
            )));
        }

        let parsed: BatchEmbedResponse = response.json().map_err(|e| {
            RagError::Embedding(format!("Failed to parse batch embedding response: {}", e))
        })?;

        if parsed.embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }

        check_dimensions(&parsed.embeddings, self.dimension, &self.model)?;
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("Empty embedding response".to_string()))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());

        // Process in batches to avoid overwhelming the server
        for chunk in texts.chunks(self.batch_size.max(1)) {
            results.extend(self.embed_batch(chunk).await?);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }
}
