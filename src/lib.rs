use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Index state error: {0}")]
    IndexState(String),

    #[error("Partial write: {0}")]
    PartialWrite(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<config::ConfigError> for RagError {
    #[inline]
    fn from(error: config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

impl From<http::RestError> for RagError {
    #[inline]
    fn from(error: http::RestError) -> Self {
        match error {
            http::RestError::InvalidUrl(url) => Self::Config(format!("Invalid URL: {}", url)),
            http::RestError::Serialize(e) => Self::Other(e.into()),
            other => Self::BackendUnavailable(other.to_string()),
        }
    }
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod http;
pub mod retriever;
pub mod vector_store;
