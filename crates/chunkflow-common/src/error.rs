//! Error types shared across the chunkflow workspace

use thiserror::Error;

/// Result type alias for chunkflow operations
pub type Result<T> = std::result::Result<T, ChunkflowError>;

/// Workspace-wide error type
#[derive(Error, Debug)]
pub enum ChunkflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed payload: {0}")]
    Payload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
