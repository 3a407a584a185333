// Embeddings module
// The embedding model is an external capability shared by every handler

pub mod ollama;
pub mod openai;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::{RagError, Result};

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// Text embedding capability consumed by the vector store handlers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, used in log lines
    fn model(&self) -> &str;

    /// Length of every vector this embedder returns
    fn dimension(&self) -> usize;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, returning vectors in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Construct the embedder selected by `config`
#[inline]
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    config.validate()?;

    match config.provider {
        EmbeddingProvider::OpenAi => Ok(Arc::new(OpenAiClient::new(config)?)),
        EmbeddingProvider::Ollama => Ok(Arc::new(OllamaClient::new(config)?)),
    }
}

/// Reject vectors whose length differs from the configured dimension
pub(crate) fn check_dimensions(vectors: &[Vec<f32>], expected: usize, model: &str) -> Result<()> {
    if let Some(vector) = vectors.iter().find(|v| v.len() != expected) {
        return Err(RagError::Embedding(format!(
            "Model '{}' returned a {}-dimensional vector, expected {}",
            model,
            vector.len(),
            expected
        )));
    }
    Ok(())
}
