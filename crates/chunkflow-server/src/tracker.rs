//! Chunk tracker: status events applied to the registry.
//!
//! The bus delivers status events at least once and in no particular order
//! across chunks. This layer validates the message shape, dispatches to the
//! registry, and swallows every registry failure after logging it: there is
//! no dead-letter escalation, so systemic failures surface through logs, and
//! a malformed message is dropped immediately because no redelivery will fix
//! it.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use thiserror::Error;

use chunkflow_common::types::{ChunkStatus, PushEnvelope, StatusOperation};

use crate::db::chunks::{self, ChunkFields};

/// Status-event validation failures. Each is terminal for the message.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Status event is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Missing 'operation' key in status event")]
    MissingOperation,

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("No 'values' key found in status event")]
    MissingValues,

    #[error("'values' must be a non-empty object")]
    EmptyValues,

    #[error("Missing 'apdb_replica_chunk' in status event")]
    MissingChunkId,

    #[error("Invalid field value: {0}")]
    InvalidField(String),
}

/// A validated status event ready for the registry.
#[derive(Debug, Clone)]
pub struct TrackedEvent {
    pub operation: StatusOperation,
    pub chunk_id: i64,
    pub fields: ChunkFields,
}

/// Validate a raw status-event payload.
///
/// The checks mirror the wire contract: `operation` present and supported,
/// `values` a non-empty object with at least one recognized field, and the
/// chunk id present and integral.
pub fn parse_status_event(payload: &[u8]) -> Result<TrackedEvent, TrackError> {
    let data: JsonValue =
        serde_json::from_slice(payload).map_err(|e| TrackError::InvalidJson(e.to_string()))?;

    let operation = data
        .get("operation")
        .and_then(JsonValue::as_str)
        .ok_or(TrackError::MissingOperation)?;
    let operation = match operation {
        "insert" => StatusOperation::Insert,
        "update" => StatusOperation::Update,
        other => return Err(TrackError::UnsupportedOperation(other.to_string())),
    };

    let values = data
        .get("values")
        .ok_or(TrackError::MissingValues)?
        .as_object()
        .ok_or(TrackError::EmptyValues)?;
    if values.is_empty() {
        return Err(TrackError::EmptyValues);
    }

    let chunk_id = data
        .get("apdb_replica_chunk")
        .and_then(JsonValue::as_i64)
        .ok_or(TrackError::MissingChunkId)?;

    let mut fields = ChunkFields::default();
    for (key, value) in values {
        match key.as_str() {
            "status" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| TrackError::InvalidField("'status' must be a string".into()))?;
                let status: ChunkStatus = raw
                    .parse()
                    .map_err(|_| TrackError::InvalidField(format!("Unknown status '{}'", raw)))?;
                fields.status = Some(status);
            },
            "source_location" => {
                let raw = value.as_str().ok_or_else(|| {
                    TrackError::InvalidField("'source_location' must be a string".into())
                })?;
                fields.source_location = Some(raw.to_string());
            },
            other => {
                tracing::warn!(chunk_id, field = other, "Ignoring unrecognized event field");
            },
        }
    }

    if fields == ChunkFields::default() {
        return Err(TrackError::EmptyValues);
    }

    Ok(TrackedEvent {
        operation,
        chunk_id,
        fields,
    })
}

/// Process one push delivery. Never fails: every outcome is logged and the
/// delivery is acknowledged regardless.
pub async fn handle_status_message(pool: &PgPool, raw: &[u8]) {
    let payload = match PushEnvelope::from_slice(raw).and_then(|e| e.decode_data()) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw = %String::from_utf8_lossy(raw),
                "Dropping undecodable status delivery"
            );
            return;
        },
    };

    let event = match parse_status_event(&payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                error = %e,
                payload = %String::from_utf8_lossy(&payload),
                "Dropping malformed status event"
            );
            return;
        },
    };

    apply_status_event(pool, &event).await;
}

/// Dispatch a validated event to the registry, logging and swallowing
/// failures.
pub async fn apply_status_event(pool: &PgPool, event: &TrackedEvent) {
    let result = match event.operation {
        StatusOperation::Insert => chunks::insert_chunk(pool, event.chunk_id, &event.fields)
            .await
            .map(|_| 1u64),
        StatusOperation::Update => {
            match chunks::update_chunk(pool, event.chunk_id, &event.fields).await {
                Ok(0) => {
                    tracing::warn!(
                        chunk_id = event.chunk_id,
                        "Update for unknown chunk; no rows affected"
                    );
                    Ok(0)
                },
                other => other,
            }
        },
    };

    match result {
        Ok(rows) => {
            tracing::info!(
                chunk_id = event.chunk_id,
                operation = %event.operation,
                rows,
                "Applied status event"
            );
        },
        Err(e) => {
            tracing::error!(
                chunk_id = event.chunk_id,
                operation = %event.operation,
                error = %e,
                "Registry operation failed for status event"
            );
        },
    }
}
