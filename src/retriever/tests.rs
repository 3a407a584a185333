use super::*;
use crate::RagError;
use crate::vector_store::{Document, VectorStoreHandler};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct CannedHandler {
    index_name: String,
    delay: Duration,
    results: Vec<ScoredDocument>,
    failure: Option<String>,
}

#[async_trait]
impl VectorStoreHandler for CannedHandler {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn create_index(&self) -> crate::Result<()> {
        Ok(())
    }

    async fn index_exists(&self) -> crate::Result<bool> {
        Ok(true)
    }

    async fn store_documents(&self, _documents: &[Document]) -> crate::Result<()> {
        Ok(())
    }

    async fn delete_index(&self) -> crate::Result<()> {
        Ok(())
    }

    async fn retrieve_documents(
        &self,
        _query: &str,
        k: usize,
        score_threshold: f32,
    ) -> crate::Result<Vec<ScoredDocument>> {
        tokio::time::sleep(self.delay).await;
        if let Some(message) = &self.failure {
            return Err(RagError::BackendUnavailable(message.clone()));
        }
        Ok(crate::vector_store::rank_and_filter(
            self.results.clone(),
            k,
            score_threshold,
        ))
    }
}

#[derive(Default)]
struct CannedSource {
    handlers: HashMap<String, CannedHandler>,
}

impl CannedSource {
    fn with(mut self, handler: CannedHandler) -> Self {
        self.handlers.insert(handler.index_name.clone(), handler);
        self
    }
}

#[async_trait]
impl HandlerSource for CannedSource {
    async fn handler_for(
        &self,
        index_name: &str,
    ) -> crate::Result<Box<dyn VectorStoreHandler>> {
        self.handlers
            .get(index_name)
            .cloned()
            .map(|h| Box::new(h) as Box<dyn VectorStoreHandler>)
            .ok_or_else(|| RagError::IndexState(format!("no index {}", index_name)))
    }
}

fn scored(document: Document, score: f32) -> ScoredDocument {
    ScoredDocument { document, score }
}

fn schema_handler(delay_ms: u64) -> CannedHandler {
    CannedHandler {
        index_name: "db_schema".to_string(),
        delay: Duration::from_millis(delay_ms),
        results: vec![
            scored(Document::new("Table: customer (id, name)"), 0.9),
            scored(Document::new("Table: invoice (id, total)"), 0.7),
        ],
        failure: None,
    }
}

fn examples_handler(delay_ms: u64) -> CannedHandler {
    CannedHandler {
        index_name: "query_examples".to_string(),
        delay: Duration::from_millis(delay_ms),
        results: vec![scored(
            Document::new("List all customers").with_metadata("sql_query", "SELECT * FROM customer;"),
            0.8,
        )],
        failure: None,
    }
}

fn retriever(schema: CannedHandler, examples: CannedHandler) -> Retriever<CannedSource> {
    let source = CannedSource::default().with(schema).with(examples);
    Retriever::new(source, RetrievalConfig::default())
}

#[test]
fn prompt_text_layout() {
    let context = RetrievedContext {
        schema: vec![scored(Document::new("Table: customer (id, name)"), 0.9)],
        examples: vec![
            scored(
                Document::new("List all customers")
                    .with_metadata("sql_query", "SELECT * FROM customer;"),
                0.8,
            ),
            scored(Document::new("Question without SQL"), 0.6),
        ],
    };

    assert_eq!(
        context.to_prompt_text(),
        "Following are the relevant schema information I found:\n\
         Table: customer (id, name)\n\n\
         \n\
         Following are example questions with their SQL queries:\n\
         Question: List all customers\n\
         SQL: SELECT * FROM customer;\n\
         \n\
         Question: Question without SQL\n\
         \n"
    );
}

#[test]
fn empty_context_keeps_headers() {
    let text = RetrievedContext::default().to_prompt_text();
    assert_eq!(text, format!("{}\n{}", SCHEMA_HEADER, EXAMPLES_HEADER));
}

#[tokio::test]
async fn merge_order_is_independent_of_completion_order() {
    let schema_slow = retriever(schema_handler(80), examples_handler(5))
        .get_relevant_context("show me customers")
        .await
        .expect("retrieval should succeed");
    let examples_slow = retriever(schema_handler(5), examples_handler(80))
        .get_relevant_context("show me customers")
        .await
        .expect("retrieval should succeed");

    assert_eq!(schema_slow, examples_slow);
    assert!(schema_slow.starts_with(SCHEMA_HEADER));
    let schema_at = schema_slow.find("Table: customer").expect("schema present");
    let example_at = schema_slow.find("SELECT * FROM customer;").expect("example present");
    assert!(schema_at < example_at);
}

#[tokio::test]
async fn lookups_run_concurrently() {
    let retriever = retriever(schema_handler(200), examples_handler(200));

    let started = Instant::now();
    retriever
        .retrieve("show me customers")
        .await
        .expect("retrieval should succeed");

    assert!(
        started.elapsed() < Duration::from_millis(380),
        "took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn per_index_k_and_threshold_are_applied() {
    let source = CannedSource::default()
        .with(schema_handler(0))
        .with(examples_handler(0));
    let settings = RetrievalConfig {
        schema_k: 1,
        schema_score_threshold: 0.5,
        examples_k: 3,
        examples_score_threshold: 0.85,
        ..RetrievalConfig::default()
    };

    let context = Retriever::new(source, settings)
        .retrieve("show me customers")
        .await
        .expect("retrieval should succeed");

    assert_eq!(context.schema.len(), 1);
    assert_eq!(context.schema[0].document.content, "Table: customer (id, name)");
    assert!(context.examples.is_empty());
}

#[tokio::test]
async fn failure_in_either_branch_propagates() {
    let mut failing_examples = examples_handler(5);
    failing_examples.failure = Some("examples backend down".to_string());

    let error = retriever(schema_handler(50), failing_examples)
        .get_relevant_context("show me customers")
        .await
        .expect_err("examples failure must surface");
    assert!(matches!(error, RagError::BackendUnavailable(_)));
    assert!(error.to_string().contains("examples backend down"));

    let mut failing_schema = schema_handler(5);
    failing_schema.failure = Some("schema backend down".to_string());
    let error = retriever(failing_schema, examples_handler(50))
        .retrieve("show me customers")
        .await
        .expect_err("schema failure must surface");
    assert!(error.to_string().contains("schema backend down"));
}

#[tokio::test]
async fn missing_index_surfaces_from_source() {
    let source = CannedSource::default().with(schema_handler(0));
    let result = Retriever::new(source, RetrievalConfig::default())
        .retrieve("show me customers")
        .await;
    assert!(matches!(result, Err(RagError::IndexState(_))));
}
