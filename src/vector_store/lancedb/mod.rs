
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Document, ScoredDocument, VectorStoreHandler, metadata_from_json, rank_and_filter};
use crate::embeddings::Embedder;
use crate::{RagError, Result};

/// Absolute, lexically normalized form of `path`. Relative paths resolve
/// against the working directory; a `file://` URI cannot carry them.
fn database_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

/// Handler for the `lancedb_local` provider: one LanceDB table per index
pub struct LanceDbHandler {
    connection: Connection,
    index_name: String,
    embedder: Arc<dyn Embedder>,
}

impl LanceDbHandler {
    /// Connect to the database directory at `path`, creating it if needed
    #[inline]
    pub async fn open(
        path: impl Into<PathBuf>,
        index_name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let db_path = database_path(&path.into())?;
        debug!("Initializing LanceDB at path: {:?}", db_path);

        tokio::fs::create_dir_all(&db_path).await.map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        Ok(Self {
            connection,
            index_name: index_name.into(),
            embedder,
        })
    }

    fn create_schema(&self, vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
        ]))
    }

    async fn table_exists(&self) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))?;
        Ok(table_names.contains(&self.index_name))
    }

    async fn open_existing_table(&self) -> Result<Table> {
        if !self.table_exists().await? {
            return Err(RagError::IndexState(format!(
                "LanceDB table '{}' does not exist",
                self.index_name
            )));
        }

        self.connection
            .open_table(&self.index_name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))
    }

    /// Vector dimension recorded in the table schema
    async fn stored_dimension(&self, table: &Table) -> Result<usize> {
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => Some(*size as usize),
                _ => None,
            })
            .ok_or_else(|| {
                RagError::Database(format!(
                    "Table '{}' has no fixed-size vector column",
                    self.index_name
                ))
            })
    }

    fn create_record_batch(
        &self,
        documents: &[Document],
        vectors: &[Vec<f32>],
        vector_dim: usize,
    ) -> Result<RecordBatch> {
        let len = documents.len();
        let mut ids = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut metadata = Vec::with_capacity(len);

        for document in documents {
            ids.push(
                document
                    .id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            );
            contents.push(document.content.as_str());
            metadata.push(serde_json::Value::Object(document.metadata.clone()).to_string());
        }

        let flat_values: Vec<f32> = vectors.iter().flatten().copied().collect();
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            vector_dim as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(metadata)),
        ];

        RecordBatch::try_new(self.create_schema(vector_dim), arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    fn parse_search_batch(&self, batch: &RecordBatch) -> Result<Vec<ScoredDocument>> {
        let string_column = |name: &str| -> Result<&StringArray> {
            batch
                .column_by_name(name)
                .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
        };

        let ids = string_column("id")?;
        let contents = string_column("content")?;
        let metadata = string_column("metadata")?;
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut results = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let distance = distances.map_or(1.0, |d| if d.is_null(row) { 1.0 } else { d.value(row) });

            results.push(ScoredDocument {
                document: Document {
                    id: Some(ids.value(row).to_string()),
                    content: contents.value(row).to_string(),
                    metadata: metadata_from_json(metadata.value(row)),
                },
                // Cosine distance to similarity (higher is better)
                score: 1.0 - distance,
            });
        }

        Ok(results)
    }
}

#[async_trait]
impl VectorStoreHandler for LanceDbHandler {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn create_index(&self) -> Result<()> {
        if self.table_exists().await? {
            return Err(RagError::IndexState(format!(
                "LanceDB table '{}' already exists",
                self.index_name
            )));
        }

        let dimension = self.embedder.dimension();
        self.connection
            .create_empty_table(&self.index_name, self.create_schema(dimension))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create table: {}", e)))?;

        info!(
            "Created LanceDB table '{}' with {} dimensions",
            self.index_name, dimension
        );
        Ok(())
    }

    async fn index_exists(&self) -> Result<bool> {
        self.table_exists().await
    }

    async fn store_documents(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            debug!("No documents to store");
            return Ok(());
        }

        let table = self.open_existing_table().await?;
        let stored_dim = self.stored_dimension(&table).await?;
        let model_dim = self.embedder.dimension();
        if stored_dim != model_dim {
            return Err(RagError::IndexState(format!(
                "Table '{}' stores {}-dimensional vectors but model '{}' produces {}",
                self.index_name,
                stored_dim,
                self.embedder.model(),
                model_dim
            )));
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != stored_dim) {
            return Err(RagError::IndexState(format!(
                "Table '{}' expects {}-dimensional vectors, got {}",
                self.index_name,
                stored_dim,
                bad.len()
            )));
        }

        let record_batch = self.create_record_batch(documents, &vectors, stored_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge.execute(Box::new(reader)).await.map_err(|e| {
            RagError::PartialWrite(format!(
                "Embedded {} documents but failed to write them to '{}': {}",
                documents.len(),
                self.index_name,
                e
            ))
        })?;

        info!(
            "Stored {} documents in LanceDB table '{}'",
            documents.len(),
            self.index_name
        );
        Ok(())
    }

    async fn delete_index(&self) -> Result<()> {
        if !self.table_exists().await? {
            return Err(RagError::IndexState(format!(
                "Cannot delete LanceDB table '{}': it does not exist",
                self.index_name
            )));
        }

        self.connection
            .drop_table(&self.index_name)
            .await
            .map_err(|e| RagError::Database(format!("Failed to drop table: {}", e)))?;

        info!("Dropped LanceDB table '{}'", self.index_name);
        Ok(())
    }

    async fn retrieve_documents(
        &self,
        query: &str,
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredDocument>> {
        let table = self.open_existing_table().await?;
        let query_vector = self.embedder.embed_query(query).await?;

        let mut stream = table
            .vector_search(query_vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        let mut candidates = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            candidates.extend(self.parse_search_batch(&batch)?);
        }

        debug!(
            "LanceDB table '{}' returned {} candidates",
            self.index_name,
            candidates.len()
        );
        Ok(rank_and_filter(candidates, k, score_threshold))
    }
}
