//! Staging job error types

use thiserror::Error;

/// Errors aborting a staging attempt.
///
/// All of these are fatal for the job; the external job service retries the
/// whole attempt, and an idempotent re-run is acceptable because staging
/// writes are append-only.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Staging table {0} does not exist; the job never creates schema")]
    StagingTableMissing(String),

    #[error("Unsupported column type for '{column}': {data_type}")]
    UnsupportedColumn { column: String, data_type: String },

    #[error("Parquet decode error: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Status publish failed: {0}")]
    Publish(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
