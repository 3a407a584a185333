// Query-time lookup of schema snippets and example queries
// Both indices are searched concurrently; schema information is always listed first

#[cfg(test)]
mod tests;

use std::fmt::Write as _;
use tracing::{debug, info};

use crate::Result;
use crate::config::RetrievalConfig;
use crate::vector_store::{HandlerSource, ScoredDocument};

pub const SCHEMA_HEADER: &str = "Following are the relevant schema information I found:\n";
pub const EXAMPLES_HEADER: &str = "Following are example questions with their SQL queries:\n";

/// Results of both lookups for one question
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub schema: Vec<ScoredDocument>,
    pub examples: Vec<ScoredDocument>,
}

impl RetrievedContext {
    #[inline]
    pub fn schema_text(&self) -> String {
        let mut text = SCHEMA_HEADER.to_string();
        for result in &self.schema {
            text.push_str(&result.document.content);
            text.push_str("\n\n");
        }
        text
    }

    #[inline]
    pub fn examples_text(&self) -> String {
        let mut text = EXAMPLES_HEADER.to_string();
        for result in &self.examples {
            let _ = writeln!(text, "Question: {}", result.document.content);
            if let Some(sql) = result.document.metadata_str("sql_query") {
                let _ = writeln!(text, "SQL: {}", sql);
            }
            text.push('\n');
        }
        text
    }

    /// Schema block, a newline, then the example block
    #[inline]
    pub fn to_prompt_text(&self) -> String {
        format!("{}\n{}", self.schema_text(), self.examples_text())
    }
}

/// Dual-index retriever consumed by the SQL agent
pub struct Retriever<S> {
    source: S,
    settings: RetrievalConfig,
}

impl<S: HandlerSource> Retriever<S> {
    #[inline]
    pub fn new(source: S, settings: RetrievalConfig) -> Self {
        Self { source, settings }
    }

    #[inline]
    pub fn settings(&self) -> &RetrievalConfig {
        &self.settings
    }

    async fn lookup(
        &self,
        index_name: &str,
        question: &str,
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredDocument>> {
        // A fresh handler per query keeps concurrent questions isolated
        let handler = self.source.handler_for(index_name).await?;
        let results = handler
            .retrieve_documents(question, k, score_threshold)
            .await?;
        debug!("Index '{}' returned {} documents", index_name, results.len());
        Ok(results)
    }

    /// Query both indices concurrently; the first failure is returned and
    /// no partial context is produced
    #[inline]
    pub async fn retrieve(&self, question: &str) -> Result<RetrievedContext> {
        let settings = &self.settings;

        let (schema, examples) = tokio::try_join!(
            self.lookup(
                &settings.schema_index,
                question,
                settings.schema_k,
                settings.schema_score_threshold,
            ),
            self.lookup(
                &settings.examples_index,
                question,
                settings.examples_k,
                settings.examples_score_threshold,
            ),
        )?;

        info!(
            "Retrieved {} schema documents and {} examples",
            schema.len(),
            examples.len()
        );
        Ok(RetrievedContext { schema, examples })
    }

    /// Merged context text ready to be placed in the agent's prompt
    #[inline]
    pub async fn get_relevant_context(&self, question: &str) -> Result<String> {
        Ok(self.retrieve(question).await?.to_prompt_text())
    }
}
