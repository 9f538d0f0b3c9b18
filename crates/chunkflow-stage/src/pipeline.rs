//! The staging pipeline: manifest in, staged tables and one status event out.

use tracing::info;

use chunkflow_common::types::{staging_table_name, StatusEvent};

use crate::error::StageError;
use crate::loader::{decode_parquet, StagingWriter};
use crate::manifest::fetch_manifest;
use crate::publisher::StatusPublisher;
use crate::storage::{object_key, ObjectStore};

/// One staging attempt's identity.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub chunk_id: i64,
    /// Object prefix holding the chunk's manifest and data files.
    pub prefix: String,
}

/// What a completed attempt did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub tables_loaded: usize,
    pub tables_skipped: usize,
    pub rows_staged: u64,
}

/// Stage one chunk.
///
/// Tables are processed in name order; entries with a zero row count are
/// skipped without touching storage or the warehouse. After every load
/// succeeds, exactly one `staged` status event is published - and if that
/// publish fails the whole attempt fails, because data nobody was told
/// about does not count as staged.
pub async fn stage_chunk(
    store: &dyn ObjectStore,
    writer: &dyn StagingWriter,
    publisher: &dyn StatusPublisher,
    request: &StageRequest,
) -> Result<StageSummary, StageError> {
    let manifest = fetch_manifest(store, &request.prefix, request.chunk_id).await?;

    info!(
        chunk_id = request.chunk_id,
        tables = manifest.table_data.len(),
        "Staging chunk"
    );

    let mut summary = StageSummary::default();

    for (table, entry) in &manifest.table_data {
        if entry.row_count == 0 {
            info!(table = %table, "Skipping empty table");
            summary.tables_skipped += 1;
            continue;
        }

        let key = object_key(&request.prefix, &entry.file_name(table));
        let data = store.get(&key).await?;
        let batches = decode_parquet(data)?;

        let staging_table = staging_table_name(table);
        let rows = writer.append(&staging_table, &batches).await?;

        info!(table = %table, rows, "Loaded table into staging");

        summary.tables_loaded += 1;
        summary.rows_staged += rows;
    }

    publisher
        .publish(&StatusEvent::staged(request.chunk_id))
        .await?;

    info!(
        chunk_id = request.chunk_id,
        tables_loaded = summary.tables_loaded,
        tables_skipped = summary.tables_skipped,
        rows_staged = summary.rows_staged,
        "Chunk staged"
    );

    Ok(summary)
}
