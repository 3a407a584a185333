
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Output size of `text-embedding-3-large`
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 3072;
pub const DEFAULT_AZURE_API_VERSION: &str = "2023-11-01";
pub const DEFAULT_AZURE_RETRY_ATTEMPTS: u32 = 4;
const REDACTED: &str = "********";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Backend selector, resolved by the vector store factory
    pub provider: String,
    pub faiss: FaissConfig,
    pub lancedb: LanceDbConfig,
    pub qdrant: QdrantConfig,
    pub azure: AzureSearchConfig,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: "faiss_local".to_string(),
            faiss: FaissConfig::default(),
            lancedb: LanceDbConfig::default(),
            qdrant: QdrantConfig::default(),
            azure: AzureSearchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FaissConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LanceDbConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QdrantConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub point_ids: PointIdStrategy,
}

/// How point ids are assigned when upserting into a Qdrant collection.
///
/// `Sequential` numbers points `0..n` on every call, so re-ingesting overwrites
/// the points written by the previous call instead of appending.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PointIdStrategy {
    #[default]
    Sequential,
    Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AzureSearchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_version: String,
    pub retry_attempts: u32,
}

impl Default for AzureSearchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            retry_attempts: DEFAULT_AZURE_RETRY_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum EmbeddingProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "ollama")]
    Ollama,
}

impl EmbeddingProvider {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    #[inline]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }
}

impl fmt::Display for EmbeddingProvider {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ConfigError;

    #[inline]
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::InvalidEmbeddingProvider(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimension: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub batch_size: u32,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAi,
            model: "text-embedding-3-large".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            api_key: None,
            base_url: None,
            batch_size: 16,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub schema_index: String,
    pub schema_k: usize,
    pub schema_score_threshold: f32,
    pub examples_index: String,
    pub examples_k: usize,
    pub examples_score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            schema_index: "db_schema".to_string(),
            schema_k: 5,
            schema_score_threshold: 0.5,
            examples_index: "query_examples".to_string(),
            examples_k: 3,
            examples_score_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestionConfig {
    /// Directory that relative document directories are resolved against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid k: {0} (must be between 1 and 100)")]
    InvalidK(usize),
    #[error("Invalid score threshold: {0} (must be between 0.0 and 1.0)")]
    InvalidScoreThreshold(f32),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid batch size: {0} (must be between 1 and 2048)")]
    InvalidBatchSize(u32),
    #[error("Invalid timeout: {0} seconds (must be between 1 and 600)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid index name: '{0}' (cannot be empty)")]
    InvalidIndexName(String),
    #[error("Invalid embedding provider: {0}. Valid options are [\"openai\", \"ollama\"]")]
    InvalidEmbeddingProvider(String),
    #[error("Invalid value for environment variable {key}: {value}")]
    InvalidEnvValue { key: String, value: String },
    #[error("Invalid vector store provider: {value}. Valid options are {valid:?}")]
    UnknownProvider {
        value: String,
        valid: Vec<&'static str>,
    },
    #[error("Setting '{setting}' is required for the {provider} vector store")]
    MissingSetting {
        setting: &'static str,
        provider: &'static str,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Config {
    /// Defaults rooted at `base_dir`
    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Parse `config.toml` under `config_dir` without validating it
    fn read<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self::with_base_dir(config_dir));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();
        Ok(config)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config = Self::read(config_dir)?;
        config
            .validate()
            .with_context(|| "Configuration validation failed")?;
        Ok(config)
    }

    /// Load from `config_dir` and apply environment overrides before validating
    #[inline]
    pub fn load_with_env<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        Self::load_with_overrides(config_dir, |key| std::env::var(key).ok())
    }

    /// Load from `config_dir`, apply overrides from `lookup`, then validate the
    /// merged result
    #[inline]
    pub fn load_with_overrides<P, F>(config_dir: P, lookup: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::read(config_dir)?;
        config
            .apply_overrides(lookup)
            .context("Failed to apply environment overrides")?;
        config
            .validate()
            .context("Configuration validation failed after environment overrides")?;
        Ok(config)
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Root that relative ingestion directories are resolved against
    #[inline]
    pub fn project_root(&self) -> PathBuf {
        self.ingestion
            .project_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Apply overrides from `lookup` keyed by environment variable name.
    /// Empty values are treated as unset.
    #[inline]
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(provider) = get("VECTOR_DB_PROVIDER") {
            self.vector_store.provider = provider;
        }
        if let Some(path) = get("FAISS_LOCAL_VECTOR_DB_PATH") {
            self.vector_store.faiss.path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("LANCEDB_LOCAL_VECTOR_DB_PATH") {
            self.vector_store.lancedb.path = Some(PathBuf::from(path));
        }
        if let Some(url) = get("QDRANT_CLOUD_URL") {
            self.vector_store.qdrant.url = Some(url);
        }
        if let Some(key) = get("QDRANT_CLOUD_API_KEY") {
            self.vector_store.qdrant.api_key = Some(key);
        }
        if let Some(endpoint) = get("AZURE_VECTOR_STORE_URL") {
            self.vector_store.azure.endpoint = Some(endpoint);
        }
        if let Some(key) = get("AZURE_VECTOR_STORE_PASSWORD") {
            self.vector_store.azure.api_key = Some(key);
        }
        if let Some(provider) = get("EMBEDDING_PROVIDER") {
            self.embeddings.provider = provider.parse()?;
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.embeddings.api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_EMBEDDING_MODEL_NAME") {
            self.embeddings.model = model;
        }
        if let Some(dimension) = get("EMBEDDING_DIMENSION") {
            self.embeddings.dimension =
                dimension
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnvValue {
                        key: "EMBEDDING_DIMENSION".to_string(),
                        value: dimension.clone(),
                    })?;
        }
        if let Some(index) = get("DB_SCHEMA_VECTOR_INDEX_NAME") {
            self.retrieval.schema_index = index;
        }
        if let Some(index) = get("QUERY_EXAMPLES_VECTOR_INDEX_NAME") {
            self.retrieval.examples_index = index;
        }
        if let Some(root) = get("PROJECT_ROOT") {
            self.ingestion.project_root = Some(PathBuf::from(root));
        }

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embeddings.validate()?;
        self.retrieval.validate()?;
        self.vector_store.validate()?;
        Ok(())
    }

    /// Copy of this configuration with every secret masked
    #[inline]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        let mask = |secret: &mut Option<String>| {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        };
        mask(&mut config.vector_store.qdrant.api_key);
        mask(&mut config.vector_store.azure.api_key);
        mask(&mut config.embeddings.api_key);
        config
    }
}

impl VectorStoreConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.qdrant.url {
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }

        if let Some(endpoint) = &self.azure.endpoint {
            Url::parse(endpoint).map_err(|_| ConfigError::InvalidUrl(endpoint.clone()))?;
        }

        if !(1..=10).contains(&self.azure.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(
                self.azure.retry_attempts,
            ));
        }

        Ok(())
    }
}

impl EmbeddingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(1..=8192).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        if self.batch_size == 0 || self.batch_size > 2048 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        self.endpoint_url()?;

        Ok(())
    }

    /// Configured base URL, or the provider's public default
    #[inline]
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url_str = self
            .base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string());
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

impl RetrievalConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        for index in [&self.schema_index, &self.examples_index] {
            if index.trim().is_empty() {
                return Err(ConfigError::InvalidIndexName(index.clone()));
            }
        }

        for k in [self.schema_k, self.examples_k] {
            if !(1..=100).contains(&k) {
                return Err(ConfigError::InvalidK(k));
            }
        }

        for threshold in [self.schema_score_threshold, self.examples_score_threshold] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::InvalidScoreThreshold(threshold));
            }
        }

        Ok(())
    }
}
