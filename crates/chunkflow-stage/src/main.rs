//! Chunkflow Stage - staging job entry point
//!
//! Runs under the external batch service, once per chunk. Exits non-zero on
//! any failure so the service retries the attempt from the top.

use anyhow::Result;
use chunkflow_common::logging::{init_logging, LogConfig, LogLevel};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use chunkflow_stage::loader::PgStagingWriter;
use chunkflow_stage::pipeline::{stage_chunk, StageRequest};
use chunkflow_stage::publisher::HttpStatusPublisher;
use chunkflow_stage::storage::{parse_object_url, S3ObjectStore, StorageConfig};

#[derive(Parser, Debug)]
#[command(name = "chunkflow-stage")]
#[command(author, version, about = "Stage one replica chunk into warehouse staging tables")]
struct Cli {
    /// Id of the chunk to stage
    #[arg(long, env = "CHUNK_ID")]
    chunk_id: i64,

    /// Object URL of the chunk prefix (s3://bucket/prefix)
    #[arg(long, env = "STAGE_FOLDER")]
    folder: String,

    /// Warehouse schema holding the staging tables
    #[arg(long, env = "DATASET_ID")]
    dataset_id: String,

    /// Bus publish URL for the staged status event
    #[arg(long, env = "STATUS_PUBLISH_URL")]
    status_url: String,

    /// Warehouse connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Publish request timeout in seconds
    #[arg(long, default_value_t = 30)]
    publish_timeout: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging based on verbose flag; environment takes precedence.
    let mut log_config =
        LogConfig::from_env().unwrap_or_else(|_| LogConfig::with_prefix("chunkflow-stage"));
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }

    init_logging(&log_config)?;

    info!(
        chunk_id = cli.chunk_id,
        folder = %cli.folder,
        dataset_id = %cli.dataset_id,
        "Starting staging job"
    );

    let (bucket, prefix) = parse_object_url(&cli.folder)?;

    let storage_config = StorageConfig::from_env()?;
    let store = S3ObjectStore::new(storage_config, bucket);

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&cli.database_url)
        .await?;
    let writer = PgStagingWriter::new(pool, cli.dataset_id.clone());

    let publisher = HttpStatusPublisher::new(cli.status_url.clone(), cli.publish_timeout)?;

    let request = StageRequest {
        chunk_id: cli.chunk_id,
        prefix,
    };

    let summary = stage_chunk(&store, &writer, &publisher, &request).await?;

    info!(
        chunk_id = cli.chunk_id,
        tables_loaded = summary.tables_loaded,
        tables_skipped = summary.tables_skipped,
        rows_staged = summary.rows_staged,
        "Staging job complete"
    );

    Ok(())
}
