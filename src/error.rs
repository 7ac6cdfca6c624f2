//! Error types for crawlr
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in crawlr
#[derive(Debug, Error)]
pub enum CrawlrError {
    /// Settings rejected by validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Connection pool could not be built or used
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection pool was already closed
    #[error("Connection pool closed")]
    ConnectionClosed,

    /// Worker pool no longer accepts work
    #[error("Worker pool shut down")]
    PoolShutdown,

    /// A worker routine reported a failure
    #[error("Worker error: {0}")]
    Worker(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for crawlr operations
pub type Result<T> = std::result::Result<T, CrawlrError>;
