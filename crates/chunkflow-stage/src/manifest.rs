//! Manifest retrieval and validation.

use tracing::info;

use chunkflow_common::types::{manifest_object_name, ChunkManifest};

use crate::error::StageError;
use crate::storage::{object_key, ObjectStore};

/// Fetch and validate the manifest for `chunk_id` under `prefix`.
///
/// Anything wrong here aborts the whole staging attempt: an unreadable or
/// malformed manifest means nothing can be loaded, and the attempt is
/// retried from scratch by the job service.
pub async fn fetch_manifest(
    store: &dyn ObjectStore,
    prefix: &str,
    chunk_id: i64,
) -> Result<ChunkManifest, StageError> {
    let key = object_key(prefix, &manifest_object_name(chunk_id));
    info!(chunk_id, key = %key, "Reading chunk manifest");

    let raw = store.get(&key).await?;

    let manifest: ChunkManifest = serde_json::from_slice(&raw)
        .map_err(|e| StageError::Manifest(format!("Chunk {} manifest unparsable: {}", chunk_id, e)))?;

    if manifest.table_data.is_empty() {
        return Err(StageError::Manifest(format!(
            "Chunk {} manifest is missing 'table_data' or it is empty",
            chunk_id
        )));
    }

    Ok(manifest)
}
