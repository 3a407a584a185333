// Configuration management module
// TOML configuration file, environment overrides and validation

pub mod settings;


pub use settings::{
    AzureSearchConfig, Config, ConfigError, EmbeddingConfig, EmbeddingProvider, FaissConfig,
    IngestionConfig, LanceDbConfig, PointIdStrategy, QdrantConfig, RetrievalConfig,
    VectorStoreConfig,
};

/// Get the default configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".nl2sql-rag"))
        .ok_or(ConfigError::DirectoryError)
}
