
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::factory::HandlerSource;
use super::{DEFAULT_SCORE_THRESHOLD, Document, ScoredDocument, VectorStoreHandler};
use crate::{RagError, Result};

/// Historical question paired with the SQL that answered it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryExample {
    pub input: String,
    pub sql_query: String,
}

impl QueryExample {
    /// The question is embedded; the SQL travels in metadata
    #[inline]
    pub fn into_document(self) -> Document {
        Document::new(self.input).with_metadata("sql_query", self.sql_query)
    }
}

/// Read a JSON array of `{input, sql_query}` objects
#[inline]
pub async fn load_examples(path: &Path) -> Result<Vec<QueryExample>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let examples: Vec<QueryExample> = serde_json::from_str(&raw).map_err(|e| {
        RagError::Other(anyhow::Error::new(e).context(format!(
            "Failed to parse query examples from {}",
            path.display()
        )))
    })?;
    debug!("Loaded {} query examples from {}", examples.len(), path.display());
    Ok(examples)
}

/// Give a document a fresh identifier, mirrored into its metadata
fn assign_id(mut document: Document) -> Document {
    let id = Uuid::new_v4().to_string();
    document.metadata.insert("id".to_string(), id.clone().into());
    document.id = Some(id);
    document
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Ingestion-time facade over one handler
pub struct VectorStoreService {
    handler: Box<dyn VectorStoreHandler>,
    project_root: PathBuf,
}

impl VectorStoreService {
    #[inline]
    pub fn new(handler: Box<dyn VectorStoreHandler>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            handler,
            project_root: project_root.into(),
        }
    }

    /// Bind a service to `index_name` on whatever backend `source` selects
    #[inline]
    pub async fn from_factory<S: HandlerSource + ?Sized>(
        source: &S,
        index_name: &str,
        project_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let handler = source.handler_for(index_name).await?;
        Ok(Self::new(handler, project_root))
    }

    #[inline]
    pub fn handler(&self) -> &dyn VectorStoreHandler {
        self.handler.as_ref()
    }

    /// Relative directories are resolved against the project root
    #[inline]
    pub fn resolve_source_dir(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.project_root.join(dir)
        }
    }

    /// Every non-hidden UTF-8 file under `dir`, in sorted path order
    #[inline]
    pub async fn load_documents(&self, dir: &Path) -> Result<Vec<Document>> {
        let root = self.resolve_source_dir(dir);
        if !tokio::fs::try_exists(&root).await? {
            return Err(RagError::Config(format!(
                "Document directory {} does not exist",
                root.display()
            )));
        }

        let mut files = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if is_hidden(&path) {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();

        let mut documents = Vec::with_capacity(files.len());
        for path in files {
            let bytes = tokio::fs::read(&path).await?;
            let content = match String::from_utf8(bytes) {
                Ok(content) => content,
                Err(_) => {
                    warn!("Skipping non-UTF-8 file {}", path.display());
                    continue;
                }
            };
            if content.trim().is_empty() {
                debug!("Skipping empty file {}", path.display());
                continue;
            }

            let source = path
                .strip_prefix(&root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            documents.push(assign_id(
                Document::new(content).with_metadata("source", source),
            ));
        }

        info!(
            "Loaded {} documents from {}",
            documents.len(),
            root.display()
        );
        Ok(documents)
    }

    async fn ensure_index(&self) -> Result<()> {
        if !self.handler.index_exists().await? {
            info!("Index '{}' not found, creating it", self.handler.index_name());
            self.handler.create_index().await?;
        }
        Ok(())
    }

    async fn store(&self, documents: Vec<Document>) -> Result<usize> {
        if documents.is_empty() {
            warn!(
                "Nothing to store in index '{}'",
                self.handler.index_name()
            );
            return Ok(0);
        }

        self.ensure_index().await?;
        self.handler.store_documents(&documents).await?;
        Ok(documents.len())
    }

    /// Load `dir` and write its documents, returning how many were stored
    #[inline]
    pub async fn store_documents(&self, dir: &Path) -> Result<usize> {
        let documents = self.load_documents(dir).await?;
        self.store(documents).await
    }

    #[inline]
    pub async fn store_examples(&self, examples: Vec<QueryExample>) -> Result<usize> {
        let documents = examples
            .into_iter()
            .map(|example| assign_id(example.into_document()))
            .collect();
        self.store(documents).await
    }

    #[inline]
    pub async fn delete_index(&self) -> Result<()> {
        self.handler.delete_index().await
    }

    /// Top-`k` matches using the default relevance threshold
    #[inline]
    pub async fn retrieve_documents(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        self.handler
            .retrieve_documents(query, k, DEFAULT_SCORE_THRESHOLD)
            .await
    }
}
