use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{Config, get_config_dir};
use crate::retriever::Retriever;
use crate::vector_store::service::load_examples;
use crate::vector_store::{VectorStoreFactory, VectorStoreService};

/// Load configuration from `config_dir` (or the default directory) and apply
/// environment overrides
#[inline]
pub fn load_config(config_dir: Option<PathBuf>) -> Result<Config> {
    let dir = match config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };
    Config::load_with_env(&dir)
        .with_context(|| format!("Failed to load configuration from {}", dir.display()))
}

/// Print the effective configuration with secrets masked
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(&config.redacted())
        .context("Failed to render configuration")?;

    println!("Configuration file: {}", config.config_file_path().display());
    if !config.config_file_path().exists() {
        println!("(file not found, showing defaults and environment overrides)");
    }
    println!();
    println!("{}", rendered);
    Ok(())
}

async fn open_service(
    config: &Config,
    factory: &VectorStoreFactory,
    index_name: &str,
    recreate: bool,
) -> Result<VectorStoreService> {
    let service = VectorStoreService::from_factory(factory, index_name, config.project_root())
        .await
        .with_context(|| format!("Failed to open index '{}'", index_name))?;

    if recreate && service.handler().index_exists().await? {
        info!("Recreating index '{}'", index_name);
        service
            .delete_index()
            .await
            .with_context(|| format!("Failed to delete index '{}'", index_name))?;
    }

    Ok(service)
}

/// Embed every file under `dirs` into the schema index
#[inline]
pub async fn ingest_schema(
    config: &Config,
    factory: &VectorStoreFactory,
    dirs: &[PathBuf],
    index: Option<&str>,
    recreate: bool,
) -> Result<usize> {
    if dirs.is_empty() {
        bail!("At least one schema directory is required");
    }

    let index_name = index.unwrap_or(&config.retrieval.schema_index);
    let service = open_service(config, factory, index_name, recreate).await?;

    let mut total = 0;
    for dir in dirs {
        let stored = service
            .store_documents(dir)
            .await
            .with_context(|| format!("Failed to ingest {}", dir.display()))?;
        println!(
            "Stored {} documents from {} into '{}'",
            stored,
            dir.display(),
            index_name
        );
        total += stored;
    }

    if total == 0 {
        warn!("No schema documents were found");
    }
    Ok(total)
}

/// Embed the `{input, sql_query}` pairs in `file` into the examples index
#[inline]
pub async fn ingest_examples(
    config: &Config,
    factory: &VectorStoreFactory,
    file: &Path,
    index: Option<&str>,
    recreate: bool,
) -> Result<usize> {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        config.project_root().join(file)
    };
    let examples = load_examples(&path)
        .await
        .with_context(|| format!("Failed to load examples from {}", path.display()))?;

    let index_name = index.unwrap_or(&config.retrieval.examples_index);
    let service = open_service(config, factory, index_name, recreate).await?;
    let stored = service.store_examples(examples).await?;

    println!("Stored {} examples into '{}'", stored, index_name);
    Ok(stored)
}

#[inline]
pub async fn delete_index(factory: &VectorStoreFactory, index_name: &str) -> Result<()> {
    let handler = factory.get_vector_store(index_name).await?;
    handler
        .delete_index()
        .await
        .with_context(|| format!("Failed to delete index '{}'", index_name))?;

    println!("Deleted index '{}'", index_name);
    Ok(())
}

/// Report whether both configured indices exist
#[inline]
pub async fn show_status(config: &Config, factory: &VectorStoreFactory) -> Result<()> {
    println!("Vector store: {}", factory.provider());
    println!(
        "Embedding model: {} ({} dimensions)",
        config.embeddings.model, config.embeddings.dimension
    );

    for index_name in [&config.retrieval.schema_index, &config.retrieval.examples_index] {
        let handler = factory.get_vector_store(index_name).await?;
        match handler.index_exists().await {
            Ok(true) => println!("  {}: present", index_name),
            Ok(false) => println!("  {}: missing", index_name),
            Err(e) => println!("  {}: unavailable ({})", index_name, e),
        }
    }

    Ok(())
}

/// Retrieve and print the merged context for `question`
#[inline]
pub async fn query(config: &Config, factory: VectorStoreFactory, question: &str) -> Result<String> {
    let retriever = Retriever::new(factory, config.retrieval.clone());
    let context = retriever
        .get_relevant_context(question)
        .await
        .context("Retrieval failed")?;

    println!("{}", context);
    Ok(context)
}
