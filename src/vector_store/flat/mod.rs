// File-backed flat index with exact cosine search
// Each index is `<index>.index` (vectors) plus `<index>.docstore.json`, rewritten in full on every store

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Document, ScoredDocument, VectorStoreHandler, cosine_similarity, rank_and_filter};
use crate::embeddings::Embedder;
use crate::{RagError, Result};

const MAGIC: &[u8; 4] = b"FLAT";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const INDEX_EXTENSION: &str = "index";
const DOCSTORE_EXTENSION: &str = "docstore.json";

/// In-memory copy of one flat index
#[derive(Debug, Clone, Default, PartialEq)]
struct FlatIndex {
    dimension: usize,
    /// Row-major, `dimension` values per document
    vectors: Vec<f32>,
    documents: Vec<Document>,
}

impl FlatIndex {
    fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            documents: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.documents.len()
    }

    fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn rows(&self) -> impl Iterator<Item = (&[f32], &Document)> {
        self.vectors
            .chunks_exact(self.dimension.max(1))
            .zip(self.documents.iter())
    }
}

/// Serialize the vector half of an index
fn encode_vectors(index: &FlatIndex) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_LEN + index.vectors.len() * 4);
    buffer.extend_from_slice(MAGIC);
    buffer.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buffer.extend_from_slice(&(index.dimension as u32).to_le_bytes());
    buffer.extend_from_slice(&(index.len() as u64).to_le_bytes());
    for value in &index.vectors {
        buffer.extend_from_slice(&value.to_le_bytes());
    }
    buffer
}

/// Parse an `.index` file into `(dimension, row count, vectors)`
fn decode_vectors(bytes: &[u8]) -> Result<(usize, usize, Vec<f32>)> {
    let corrupt = |reason: &str| RagError::Database(format!("Corrupt flat index file: {}", reason));

    if bytes.len() < HEADER_LEN {
        return Err(corrupt("truncated header"));
    }
    if &bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic bytes"));
    }

    let word = |start: usize| -> [u8; 4] {
        let mut out = [0_u8; 4];
        out.copy_from_slice(&bytes[start..start + 4]);
        out
    };

    let version = u32::from_le_bytes(word(4));
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported version {}", version)));
    }

    let dimension = u32::from_le_bytes(word(8)) as usize;
    let mut count_bytes = [0_u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let payload = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dimension)
        .and_then(|values| values.checked_mul(4))
        .ok_or_else(|| corrupt("row count overflow"))?;
    if payload.len() != expected {
        return Err(corrupt(&format!(
            "expected {} bytes of vectors, found {}",
            expected,
            payload.len()
        )));
    }

    let vectors = payload
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok((dimension, count, vectors))
}

/// Handler for the `faiss_local` provider
pub struct FlatIndexHandler {
    index_name: String,
    directory: PathBuf,
    embedder: Arc<dyn Embedder>,
    state: RwLock<FlatIndex>,
}

impl FlatIndexHandler {
    /// Bind to `index_name` under `directory`, loading a previously persisted
    /// index when both files are present.
    #[inline]
    pub async fn open(
        directory: impl Into<PathBuf>,
        index_name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let directory = directory.into();
        let index_name = index_name.into();
        let dimension = embedder.dimension();

        let handler = Self {
            index_name,
            directory,
            embedder,
            state: RwLock::new(FlatIndex::empty(dimension)),
        };

        if handler.files_exist().await? {
            let loaded = handler.load().await?;
            info!(
                "Loaded flat index '{}' with {} documents from {}",
                handler.index_name,
                loaded.len(),
                handler.directory.display()
            );
            *handler.state.write().await = loaded;
        } else {
            debug!(
                "No persisted flat index '{}' in {}, starting empty",
                handler.index_name,
                handler.directory.display()
            );
        }

        Ok(handler)
    }

    #[inline]
    pub fn index_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.index_name, INDEX_EXTENSION))
    }

    #[inline]
    pub fn docstore_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.index_name, DOCSTORE_EXTENSION))
    }

    /// Number of documents currently held in memory
    #[inline]
    pub async fn document_count(&self) -> usize {
        self.state.read().await.len()
    }

    async fn files_exist(&self) -> Result<bool> {
        let index = tokio::fs::try_exists(self.index_path()).await?;
        let docstore = tokio::fs::try_exists(self.docstore_path()).await?;
        Ok(index && docstore)
    }

    async fn load(&self) -> Result<FlatIndex> {
        let bytes = tokio::fs::read(self.index_path()).await?;
        let (dimension, count, vectors) = decode_vectors(&bytes)?;

        let expected = self.embedder.dimension();
        if dimension != expected {
            return Err(RagError::IndexState(format!(
                "Flat index '{}' stores {}-dimensional vectors but model '{}' produces {}",
                self.index_name,
                dimension,
                self.embedder.model(),
                expected
            )));
        }

        let raw = tokio::fs::read_to_string(self.docstore_path()).await?;
        let documents: Vec<Document> = serde_json::from_str(&raw).map_err(|e| {
            RagError::Database(format!(
                "Corrupt docstore {}: {}",
                self.docstore_path().display(),
                e
            ))
        })?;

        if documents.len() != count {
            return Err(RagError::Database(format!(
                "Flat index '{}' has {} vectors but {} documents",
                self.index_name,
                count,
                documents.len()
            )));
        }

        Ok(FlatIndex {
            dimension,
            vectors,
            documents,
        })
    }

    /// Write a full snapshot of both files
    async fn persist(&self, index: &FlatIndex) -> Result<()> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let docstore = serde_json::to_vec(&index.documents)
            .map_err(|e| RagError::Other(anyhow::Error::new(e).context("Failed to encode docstore")))?;

        write_replace(&self.index_path(), &encode_vectors(index)).await?;
        write_replace(&self.docstore_path(), &docstore).await?;

        debug!(
            "Persisted flat index '{}' ({} documents)",
            self.index_name,
            index.len()
        );
        Ok(())
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_replace(path: &Path, contents: &[u8]) -> Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, contents).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl VectorStoreHandler for FlatIndexHandler {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Replaces any in-memory contents; files appear on the first store
    async fn create_index(&self) -> Result<()> {
        let mut state = self.state.write().await;
        *state = FlatIndex::empty(self.embedder.dimension());
        info!("Initialized empty flat index '{}'", self.index_name);
        Ok(())
    }

    async fn index_exists(&self) -> Result<bool> {
        self.files_exist().await
    }

    async fn store_documents(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            debug!("No documents to store in '{}'", self.index_name);
            return Ok(());
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;

        let mut state = self.state.write().await;
        if let Some(bad) = embeddings.iter().find(|v| v.len() != state.dimension) {
            return Err(RagError::IndexState(format!(
                "Flat index '{}' expects {}-dimensional vectors, got {}",
                self.index_name,
                state.dimension,
                bad.len()
            )));
        }

        // Memory only changes once the snapshot is on disk
        let mut next = state.clone();
        for (document, vector) in documents.iter().zip(embeddings) {
            let mut document = document.clone();
            if document.id.is_none() {
                document.id = Some(Uuid::new_v4().to_string());
            }
            next.vectors.extend(vector);
            next.documents.push(document);
        }

        self.persist(&next).await?;
        *state = next;
        info!(
            "Stored {} documents in flat index '{}' ({} total)",
            documents.len(),
            self.index_name,
            state.len()
        );
        Ok(())
    }

    async fn delete_index(&self) -> Result<()> {
        let removed_index = remove_if_present(&self.index_path()).await?;
        let removed_docstore = remove_if_present(&self.docstore_path()).await?;

        if !removed_index && !removed_docstore {
            info!(
                "Flat index '{}' has no files in {}, nothing to delete",
                self.index_name,
                self.directory.display()
            );
        } else {
            info!("Deleted flat index '{}'", self.index_name);
        }

        *self.state.write().await = FlatIndex::empty(self.embedder.dimension());
        Ok(())
    }

    async fn retrieve_documents(
        &self,
        query: &str,
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredDocument>> {
        let query_vector = self.embedder.embed_query(query).await?;
        let state = self.state.read().await;

        if state.is_empty() {
            warn!("Flat index '{}' is empty", self.index_name);
            return Ok(Vec::new());
        }

        let candidates = state
            .rows()
            .map(|(vector, document)| ScoredDocument {
                document: document.clone(),
                score: cosine_similarity(&query_vector, vector),
            })
            .collect();

        let results = rank_and_filter(candidates, k, score_threshold);
        debug!(
            "Flat index '{}' returned {} of {} documents",
            self.index_name,
            results.len(),
            state.len()
        );
        Ok(results)
    }
}
