
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use super::VectorStoreHandler;
use super::azure::AzureSearchHandler;
use super::flat::FlatIndexHandler;
use super::lancedb::LanceDbHandler;
use super::qdrant::QdrantHandler;
use crate::config::{Config, ConfigError, VectorStoreConfig};
use crate::embeddings::{Embedder, create_embedder};
use crate::Result;

/// Closed set of supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorDbProvider {
    FaissLocal,
    LanceDbLocal,
    QdrantCloud,
    AzureSearch,
}

impl VectorDbProvider {
    pub const ALL: [Self; 4] = [
        Self::FaissLocal,
        Self::LanceDbLocal,
        Self::QdrantCloud,
        Self::AzureSearch,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FaissLocal => "faiss_local",
            Self::LanceDbLocal => "lancedb_local",
            Self::QdrantCloud => "qdrant_cloud",
            Self::AzureSearch => "azure_search",
        }
    }
}

impl fmt::Display for VectorDbProvider {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorDbProvider {
    type Err = ConfigError;

    #[inline]
    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownProvider {
                value: value.to_string(),
                valid: Self::ALL.iter().map(|p| p.as_str()).collect(),
            })
    }
}

/// Anything that can hand out a handler bound to a named index
#[async_trait]
pub trait HandlerSource: Send + Sync {
    async fn handler_for(&self, index_name: &str) -> Result<Box<dyn VectorStoreHandler>>;
}

/// The only place that decides which backend serves an index
#[derive(Clone)]
pub struct VectorStoreFactory {
    config: VectorStoreConfig,
    provider: VectorDbProvider,
    embedder: Arc<dyn Embedder>,
}

impl fmt::Debug for VectorStoreFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorStoreFactory")
            .field("provider", &self.provider)
            .field("embedding_model", &self.embedder.model())
            .finish_non_exhaustive()
    }
}

fn required<'a>(
    value: Option<&'a str>,
    setting: &'static str,
    provider: VectorDbProvider,
) -> std::result::Result<&'a str, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingSetting {
            setting,
            provider: provider.as_str(),
        })
}

fn required_path(
    value: Option<&PathBuf>,
    setting: &'static str,
    provider: VectorDbProvider,
) -> std::result::Result<PathBuf, ConfigError> {
    value
        .filter(|p| !p.as_os_str().is_empty())
        .cloned()
        .ok_or(ConfigError::MissingSetting {
            setting,
            provider: provider.as_str(),
        })
}

impl VectorStoreFactory {
    /// Fails fast on an unrecognized provider or malformed settings
    #[inline]
    pub fn new(config: VectorStoreConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        let provider = config.provider.parse::<VectorDbProvider>()?;

        Ok(Self {
            config,
            provider,
            embedder,
        })
    }

    /// Build the factory and its embedder from a full configuration
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embeddings)?;
        Self::new(config.vector_store.clone(), embedder)
    }

    #[inline]
    pub fn provider(&self) -> VectorDbProvider {
        self.provider
    }

    #[inline]
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    /// Check the settings the selected backend needs, without connecting
    #[inline]
    pub fn validate_settings(&self) -> Result<()> {
        let provider = self.provider;
        let config = &self.config;

        match provider {
            VectorDbProvider::FaissLocal => {
                required_path(config.faiss.path.as_ref(), "vector_store.faiss.path", provider)?;
            }
            VectorDbProvider::LanceDbLocal => {
                required_path(
                    config.lancedb.path.as_ref(),
                    "vector_store.lancedb.path",
                    provider,
                )?;
            }
            VectorDbProvider::QdrantCloud => {
                required(config.qdrant.url.as_deref(), "vector_store.qdrant.url", provider)?;
                required(
                    config.qdrant.api_key.as_deref(),
                    "vector_store.qdrant.api_key",
                    provider,
                )?;
            }
            VectorDbProvider::AzureSearch => {
                required(
                    config.azure.endpoint.as_deref(),
                    "vector_store.azure.endpoint",
                    provider,
                )?;
                required(
                    config.azure.api_key.as_deref(),
                    "vector_store.azure.api_key",
                    provider,
                )?;
            }
        }

        Ok(())
    }

    /// Construct a fresh handler for `index_name` on the configured backend
    #[inline]
    pub async fn get_vector_store(&self, index_name: &str) -> Result<Box<dyn VectorStoreHandler>> {
        if index_name.trim().is_empty() {
            return Err(ConfigError::InvalidIndexName(index_name.to_string()).into());
        }

        debug!(
            "Creating {} handler for index '{}'",
            self.provider, index_name
        );

        let provider = self.provider;
        let config = &self.config;
        let embedder = self.embedder();

        let handler: Box<dyn VectorStoreHandler> = match provider {
            VectorDbProvider::FaissLocal => {
                let path =
                    required_path(config.faiss.path.as_ref(), "vector_store.faiss.path", provider)?;
                Box::new(FlatIndexHandler::open(path, index_name, embedder).await?)
            }
            VectorDbProvider::LanceDbLocal => {
                let path = required_path(
                    config.lancedb.path.as_ref(),
                    "vector_store.lancedb.path",
                    provider,
                )?;
                Box::new(LanceDbHandler::open(path, index_name, embedder).await?)
            }
            VectorDbProvider::QdrantCloud => {
                let url = required(config.qdrant.url.as_deref(), "vector_store.qdrant.url", provider)?;
                let api_key = required(
                    config.qdrant.api_key.as_deref(),
                    "vector_store.qdrant.api_key",
                    provider,
                )?;
                Box::new(QdrantHandler::new(
                    url,
                    api_key,
                    index_name,
                    embedder,
                    config.qdrant.point_ids,
                )?)
            }
            VectorDbProvider::AzureSearch => {
                let endpoint = required(
                    config.azure.endpoint.as_deref(),
                    "vector_store.azure.endpoint",
                    provider,
                )?;
                let api_key = required(
                    config.azure.api_key.as_deref(),
                    "vector_store.azure.api_key",
                    provider,
                )?;
                Box::new(AzureSearchHandler::new(
                    endpoint,
                    api_key,
                    &config.azure.api_version,
                    config.azure.retry_attempts,
                    index_name,
                    embedder,
                )?)
            }
        };

        Ok(handler)
    }
}

#[async_trait]
impl HandlerSource for VectorStoreFactory {
    async fn handler_for(&self, index_name: &str) -> Result<Box<dyn VectorStoreHandler>> {
        self.get_vector_store(index_name).await
    }
}
