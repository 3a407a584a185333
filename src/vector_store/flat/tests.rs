use super::*;
use crate::embeddings::testing::{HashingEmbedder, StaticEmbedder};
use tempfile::TempDir;

const DIMENSION: usize = 512;

async fn open_handler(dir: &TempDir) -> FlatIndexHandler {
    FlatIndexHandler::open(
        dir.path(),
        "db_schema",
        Arc::new(HashingEmbedder::new(DIMENSION)),
    )
    .await
    .expect("handler should open")
}

fn schema_documents() -> Vec<Document> {
    vec![
        Document::new("Table: customer (id, name)"),
        Document::new("Table: invoice (id, customer_id, total)"),
        Document::new("Table: product (sku, price)"),
    ]
}

#[test]
fn vector_file_roundtrip_preserves_rows() {
    let index = FlatIndex {
        dimension: 2,
        vectors: vec![1.0, 0.5, -0.25, 3.0],
        documents: vec![Document::new("a"), Document::new("b")],
    };

    let (dimension, count, vectors) =
        decode_vectors(&encode_vectors(&index)).expect("should decode");
    assert_eq!(dimension, 2);
    assert_eq!(count, 2);
    assert_eq!(vectors, index.vectors);
}

#[test]
fn decode_rejects_corrupt_files() {
    assert!(decode_vectors(b"FL").is_err());
    assert!(decode_vectors(b"NOPE\x01\x00\x00\x00\x02\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00").is_err());

    let mut truncated = encode_vectors(&FlatIndex {
        dimension: 2,
        vectors: vec![1.0, 2.0],
        documents: vec![Document::new("a")],
    });
    truncated.pop();
    assert!(matches!(
        decode_vectors(&truncated),
        Err(RagError::Database(_))
    ));
}

#[tokio::test]
async fn index_exists_only_after_first_store() {
    let dir = TempDir::new().expect("temp dir");
    let handler = open_handler(&dir).await;

    assert!(!handler.index_exists().await.expect("exists check"));

    handler.create_index().await.expect("create should succeed");
    // Creation is implicit in the first write for the flat store
    assert!(!handler.index_exists().await.expect("exists check"));

    handler
        .store_documents(&schema_documents())
        .await
        .expect("store should succeed");
    assert!(handler.index_exists().await.expect("exists check"));
    assert!(handler.index_path().exists());
    assert!(handler.docstore_path().exists());
}

#[tokio::test]
async fn store_assigns_ids_and_keeps_existing_ones() {
    let dir = TempDir::new().expect("temp dir");
    let handler = open_handler(&dir).await;

    let documents = vec![
        Document::new("Table: customer (id, name)").with_id("fixed-id"),
        Document::new("Table: invoice (id, total)"),
    ];
    handler
        .store_documents(&documents)
        .await
        .expect("store should succeed");

    let raw = std::fs::read_to_string(handler.docstore_path()).expect("docstore readable");
    let stored: Vec<Document> = serde_json::from_str(&raw).expect("docstore parses");
    assert_eq!(stored[0].id.as_deref(), Some("fixed-id"));
    let generated = stored[1].id.as_deref().expect("id assigned");
    assert!(Uuid::parse_str(generated).is_ok());
}

#[tokio::test]
async fn retrieval_respects_k_threshold_and_order() {
    let dir = TempDir::new().expect("temp dir");
    let handler = open_handler(&dir).await;
    handler
        .store_documents(&schema_documents())
        .await
        .expect("store should succeed");

    let results = handler
        .retrieve_documents("customer table", 2, 0.0)
        .await
        .expect("retrieval should succeed");

    assert!(results.len() <= 2);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(results[0].document.content, "Table: customer (id, name)");

    let strict = handler
        .retrieve_documents("customer table", 3, 0.99)
        .await
        .expect("retrieval should succeed");
    assert!(strict.iter().all(|r| r.score >= 0.99));
}

#[tokio::test]
async fn exact_content_query_ranks_document_first() {
    let dir = TempDir::new().expect("temp dir");
    let handler = open_handler(&dir).await;
    handler
        .store_documents(&schema_documents())
        .await
        .expect("store should succeed");

    let results = handler
        .retrieve_documents("Table: product (sku, price)", 1, 0.5)
        .await
        .expect("retrieval should succeed");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.content, "Table: product (sku, price)");
    assert!((results[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn persisted_index_reloads_and_appends() {
    let dir = TempDir::new().expect("temp dir");
    {
        let handler = open_handler(&dir).await;
        handler
            .store_documents(&schema_documents()[..2])
            .await
            .expect("store should succeed");
    }

    let reopened = open_handler(&dir).await;
    assert_eq!(reopened.document_count().await, 2);

    reopened
        .store_documents(&schema_documents()[2..])
        .await
        .expect("append should succeed");

    let again = open_handler(&dir).await;
    assert_eq!(again.document_count().await, 3);
}

#[tokio::test]
async fn create_index_discards_in_memory_rows() {
    let dir = TempDir::new().expect("temp dir");
    let handler = open_handler(&dir).await;
    handler
        .store_documents(&schema_documents())
        .await
        .expect("store should succeed");

    handler.create_index().await.expect("create should succeed");
    assert_eq!(handler.document_count().await, 0);
    let results = handler
        .retrieve_documents("customer", 5, 0.0)
        .await
        .expect("retrieval should succeed");
    assert!(results.is_empty());
}

#[tokio::test]
async fn dimension_mismatch_fails_at_open() {
    let dir = TempDir::new().expect("temp dir");
    open_handler(&dir)
        .await
        .store_documents(&schema_documents())
        .await
        .expect("store should succeed");

    let result = FlatIndexHandler::open(
        dir.path(),
        "db_schema",
        Arc::new(HashingEmbedder::new(DIMENSION * 2)),
    )
    .await;
    assert!(matches!(result, Err(RagError::IndexState(_))));
}

#[tokio::test]
async fn wrong_length_embeddings_are_rejected() {
    let dir = TempDir::new().expect("temp dir");
    // Embedder advertises 3 dimensions but returns 2
    let embedder = StaticEmbedder::new(3).with("short", vec![1.0, 0.0]);
    let handler = FlatIndexHandler::open(dir.path(), "broken", Arc::new(embedder))
        .await
        .expect("handler should open");

    let result = handler.store_documents(&[Document::new("short")]).await;
    assert!(matches!(result, Err(RagError::IndexState(_))));
    assert!(!handler.index_exists().await.expect("exists check"));
}

#[tokio::test]
async fn delete_removes_files_and_is_noop_when_missing() {
    let dir = TempDir::new().expect("temp dir");
    let handler = open_handler(&dir).await;

    handler
        .delete_index()
        .await
        .expect("deleting a missing index is a no-op");

    handler
        .store_documents(&schema_documents())
        .await
        .expect("store should succeed");
    handler.delete_index().await.expect("delete should succeed");

    assert!(!handler.index_exists().await.expect("exists check"));
    assert!(!handler.index_path().exists());
    assert_eq!(handler.document_count().await, 0);
}

#[tokio::test]
async fn empty_store_writes_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let handler = open_handler(&dir).await;
    handler
        .store_documents(&[])
        .await
        .expect("empty store should succeed");
    assert!(!handler.index_exists().await.expect("exists check"));
}

#[tokio::test]
async fn failed_snapshot_leaves_memory_unchanged() {
    let dir = TempDir::new().expect("temp dir");
    let handler = open_handler(&dir).await;
    handler
        .store_documents(&schema_documents()[..1])
        .await
        .expect("first store should succeed");

    // A directory where the temp file should go makes the snapshot write fail
    let mut blocker = handler.index_path().into_os_string();
    blocker.push(".tmp");
    std::fs::create_dir(PathBuf::from(blocker)).expect("create blocker");

    assert!(
        handler
            .store_documents(&schema_documents()[1..])
            .await
            .is_err()
    );
    assert_eq!(handler.document_count().await, 1);

    let results = handler
        .retrieve_documents("Table: invoice (id, customer_id, total)", 5, 0.0)
        .await
        .expect("retrieve should succeed");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.content, "Table: customer (id, name)");
}
