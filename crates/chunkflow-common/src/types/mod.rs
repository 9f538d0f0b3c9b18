//! Domain types shared by the server and the staging job
//!
//! The wire shapes here are fixed contracts with external collaborators: the
//! message bus delivers [`PushEnvelope`]-wrapped payloads, the upstream
//! replication source writes [`ChunkManifest`] files next to its data, and
//! chunk state changes travel as [`StatusEvent`] messages.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::ChunkflowError;

// ============================================================================
// Chunk lifecycle
// ============================================================================

/// Lifecycle state of a replica chunk.
///
/// Chunks only ever move forward: `pending` -> `staged` -> `promoted`.
/// `failed` is advisory; a failed chunk may still be staged by a later retry,
/// but a staged or promoted chunk never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Staged,
    Promoted,
    Failed,
}

impl ChunkStatus {
    /// Lowercase form used in both the registry column and event payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Staged => "staged",
            ChunkStatus::Promoted => "promoted",
            ChunkStatus::Failed => "failed",
        }
    }

    fn rank(self) -> u8 {
        match self {
            ChunkStatus::Pending => 0,
            ChunkStatus::Failed => 1,
            ChunkStatus::Staged => 2,
            ChunkStatus::Promoted => 3,
        }
    }

    /// Whether moving from `self` to `next` advances the lifecycle.
    pub fn is_forward_transition(self, next: ChunkStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl std::str::FromStr for ChunkStatus {
    type Err = ChunkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ChunkStatus::Pending),
            "staged" => Ok(ChunkStatus::Staged),
            "promoted" => Ok(ChunkStatus::Promoted),
            "failed" => Ok(ChunkStatus::Failed),
            _ => Err(ChunkflowError::Payload(format!("Unknown chunk status: {}", s))),
        }
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Status events
// ============================================================================

/// Registry operation carried by a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusOperation {
    Insert,
    Update,
}

impl std::fmt::Display for StatusOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusOperation::Insert => write!(f, "insert"),
            StatusOperation::Update => write!(f, "update"),
        }
    }
}

/// A chunk status change message.
///
/// Producers (the staging job, the upstream replication source) publish
/// these to the message bus; the tracker applies them to the registry.
/// `values` carries the fields to set and may include keys beyond the ones
/// the registry recognizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub operation: StatusOperation,
    pub apdb_replica_chunk: i64,
    pub values: JsonMap<String, JsonValue>,
}

impl StatusEvent {
    /// The event the staging job publishes after all table loads finish.
    pub fn staged(chunk_id: i64) -> Self {
        let mut values = JsonMap::new();
        values.insert(
            "status".to_string(),
            JsonValue::String(ChunkStatus::Staged.as_str().to_string()),
        );
        Self {
            operation: StatusOperation::Update,
            apdb_replica_chunk: chunk_id,
            values,
        }
    }
}

// ============================================================================
// Chunk manifests
// ============================================================================

/// Per-chunk manifest enumerating the tables to load.
///
/// Written by the upstream replication source next to the chunk's data
/// files. A manifest without a populated `table_data` section is invalid and
/// aborts the staging attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkManifest {
    #[serde(default)]
    pub table_data: BTreeMap<String, TableEntry>,
}

/// One table's entry in a chunk manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub row_count: u64,

    /// Data file name within the chunk prefix; defaults to
    /// `<table>.parquet` when the manifest does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl TableEntry {
    /// Resolve the data file name for `table`.
    pub fn file_name(&self, table: &str) -> String {
        self.file
            .clone()
            .unwrap_or_else(|| format!("{}.parquet", table))
    }
}

/// Object name of the manifest for `chunk_id`, relative to the chunk prefix.
pub fn manifest_object_name(chunk_id: i64) -> String {
    format!("chunk_{}.manifest.json", chunk_id)
}

/// Staging variant of a production table name.
///
/// The marker convention is fixed: staging tables are the production name
/// wrapped as `_<table>_staging`. The staging job writes only to these and
/// the promoter copies out of them.
pub fn staging_table_name(table: &str) -> String {
    format!("_{}_staging", table)
}

// ============================================================================
// New-chunk notifications
// ============================================================================

/// Notification that a new chunk's files have landed in object storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChunkNotification {
    pub bucket: String,
    pub name: String,
    pub dataset: String,
}

impl NewChunkNotification {
    /// Full object-storage URL of the chunk prefix.
    pub fn input_path(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.name)
    }

    /// Chunk reference used in job names: the last path segment of `name`.
    pub fn chunk_ref(&self) -> &str {
        self.name
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.name)
    }
}

// ============================================================================
// Bus push envelopes
// ============================================================================

/// Push-delivery wrapper the message bus POSTs to event endpoints.
///
/// The interesting payload is base64 inside `message.data`; everything else
/// is bus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
}

/// Inner message of a [`PushEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    pub data: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl PushEnvelope {
    /// Parse a raw request body into an envelope.
    pub fn from_slice(raw: &[u8]) -> Result<Self, ChunkflowError> {
        serde_json::from_slice(raw)
            .map_err(|e| ChunkflowError::Payload(format!("Invalid push envelope: {}", e)))
    }

    /// Decode the base64 payload carried in `message.data`.
    pub fn decode_data(&self) -> Result<Vec<u8>, ChunkflowError> {
        BASE64
            .decode(&self.message.data)
            .map_err(|e| ChunkflowError::Payload(format!("Invalid base64 payload: {}", e)))
    }

    /// Wrap a payload the way the bus would deliver it. Mostly for tests and
    /// local tooling.
    pub fn wrap(payload: &[u8]) -> Self {
        Self {
            message: PushMessage {
                data: BASE64.encode(payload),
                message_id: None,
            },
        }
    }
}
