// Shared fixtures for the integration tests

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use nl2sql_rag::Result;
use nl2sql_rag::config::{Config, RetrievalConfig, VectorStoreConfig};
use nl2sql_rag::embeddings::Embedder;
use nl2sql_rag::vector_store::VectorStoreFactory;
use std::path::Path;
use std::sync::Arc;

pub const DIMENSION: usize = 512;

/// Character-trigram bag hashed into a fixed number of buckets. Identical
/// texts score 1.0 under cosine similarity and shared words push scores up.
#[derive(Debug, Clone, Copy)]
pub struct TrigramEmbedder {
    dimension: usize,
}

impl TrigramEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        for window in chars.windows(3) {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for c in window {
                hash ^= u64::from(*c);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for TrigramEmbedder {
    fn model(&self) -> &str {
        "trigram-test"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

pub fn embedder() -> Arc<dyn Embedder> {
    Arc::new(TrigramEmbedder::new(DIMENSION))
}

/// Configuration rooted in `root` using the flat on-disk backend
pub fn flat_config(root: &Path) -> Config {
    let mut config = Config::with_base_dir(root.join("config"));
    config.vector_store.faiss.path = Some(root.join("vector_index"));
    config.ingestion.project_root = Some(root.to_path_buf());
    config.retrieval = RetrievalConfig {
        schema_score_threshold: 0.1,
        examples_score_threshold: 0.1,
        ..RetrievalConfig::default()
    };
    config
}

pub fn factory_for(store: VectorStoreConfig) -> VectorStoreFactory {
    VectorStoreFactory::new(store, embedder()).expect("factory should build")
}

pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(path, contents).expect("write fixture");
}
