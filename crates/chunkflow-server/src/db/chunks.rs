//! Chunk registry operations.
//!
//! One row per replica chunk, keyed by the upstream-assigned
//! `apdb_replica_chunk` id. The registry is the single source of truth for
//! the promotion ordering invariant: a chunk may be promoted only when every
//! chunk with a smaller id is already promoted.
//!
//! # Key Operations
//!
//! - `insert_chunk()` - create a record; duplicate ids are rejected
//! - `update_chunk()` - merge fields into an existing record; absent ids are
//!   a no-op so status events may arrive before their insert
//! - `get_promotable_chunks()` - the contiguous staged run after the
//!   promoted watermark; empty means nothing to do, not an error
//! - `mark_chunks_promoted()` - all-or-nothing promotion bookkeeping

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use chunkflow_common::types::ChunkStatus;

use super::{DbError, DbResult};

/// Fields a status event may set on a chunk record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFields {
    pub status: Option<ChunkStatus>,
    pub source_location: Option<String>,
}

/// Create a chunk record.
///
/// A second insert for the same id fails with [`DbError::Duplicate`]: under
/// concurrent inserts the primary-key constraint guarantees exactly one
/// winner, and the loser surfaces a bug signal instead of silently merging.
/// Inserting directly as `staged` stamps `staged_at`.
pub async fn insert_chunk(pool: &PgPool, chunk_id: i64, fields: &ChunkFields) -> DbResult<()> {
    let status = fields.status.unwrap_or(ChunkStatus::Pending);
    let staged_at = (status == ChunkStatus::Staged).then(Utc::now);

    let result = sqlx::query(
        r#"
        INSERT INTO chunks (apdb_replica_chunk, status, staged_at, source_location)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(chunk_id)
    .bind(status.as_str())
    .bind(staged_at)
    .bind(&fields.source_location)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            Err(DbError::duplicate("Chunk", &chunk_id.to_string()))
        },
        Err(e) => Err(e.into()),
    }
}

/// Merge fields into an existing chunk record.
///
/// Returns the number of rows affected: `0` when the id is unknown (the
/// caller logs a warning; an update racing ahead of its insert is tolerated,
/// not an error). The merge is forward-only and runs under a row lock so
/// concurrent updates serialize on the registry's own isolation.
pub async fn update_chunk(pool: &PgPool, chunk_id: i64, fields: &ChunkFields) -> DbResult<u64> {
    let mut tx = pool.begin().await?;

    let row: Option<(String, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = sqlx::query_as(
        r#"
        SELECT status, staged_at, promoted_at
        FROM chunks
        WHERE apdb_replica_chunk = $1
        FOR UPDATE
        "#,
    )
    .bind(chunk_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((current_status, staged_at, promoted_at)) = row else {
        return Ok(0);
    };

    let current: ChunkStatus = current_status.parse().map_err(|_| {
        DbError::Invalid(format!(
            "Chunk {} has unrecognized status '{}'",
            chunk_id, current_status
        ))
    })?;

    let merged = merge_fields(
        chunk_id,
        current,
        staged_at,
        promoted_at,
        fields,
        Utc::now(),
    );

    sqlx::query(
        r#"
        UPDATE chunks
        SET status = $2,
            staged_at = $3,
            promoted_at = $4,
            source_location = COALESCE($5, source_location),
            updated_at = now()
        WHERE apdb_replica_chunk = $1
        "#,
    )
    .bind(chunk_id)
    .bind(merged.status.as_str())
    .bind(merged.staged_at)
    .bind(merged.promoted_at)
    .bind(&fields.source_location)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(1)
}

/// Compute the ordered set of promotable chunk ids.
///
/// The empty vector is the "nothing to promote" signal; callers treat it as
/// a successful no-op rather than an error.
pub async fn get_promotable_chunks(pool: &PgPool) -> DbResult<Vec<i64>> {
    let last_promoted: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(apdb_replica_chunk) FROM chunks WHERE status = 'promoted'",
    )
    .fetch_one(pool)
    .await?;

    let staged: Vec<i64> = sqlx::query_scalar(
        "SELECT apdb_replica_chunk FROM chunks WHERE status = 'staged' ORDER BY apdb_replica_chunk",
    )
    .fetch_all(pool)
    .await?;

    Ok(promotable_prefix(last_promoted, &staged))
}

/// Mark the given chunks promoted, stamping `promoted_at` once.
///
/// Runs in a single transaction and requires every id to currently be
/// `staged`: promoting a subset would leave a gap in the promoted prefix, so
/// a partial match aborts with no changes applied.
pub async fn mark_chunks_promoted(pool: &PgPool, chunk_ids: &[i64]) -> DbResult<u64> {
    if chunk_ids.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE chunks
        SET status = 'promoted',
            promoted_at = COALESCE(promoted_at, now()),
            updated_at = now()
        WHERE apdb_replica_chunk = ANY($1)
          AND status = 'staged'
        "#,
    )
    .bind(chunk_ids)
    .execute(&mut *tx)
    .await?;

    let updated = result.rows_affected();
    if updated != chunk_ids.len() as u64 {
        return Err(DbError::Invalid(format!(
            "Expected to promote {} chunks but only {} were staged; no changes applied",
            chunk_ids.len(),
            updated
        )));
    }

    tx.commit().await?;

    Ok(updated)
}

/// The maximal contiguous run of staged ids immediately following the
/// promoted watermark.
///
/// `staged` must be sorted ascending. With no promoted chunk yet, the run
/// starts at the smallest staged id. Staged ids at or below the watermark
/// (stale leftovers of manual cleanup) are skipped, never re-promoted.
pub fn promotable_prefix(last_promoted: Option<i64>, staged: &[i64]) -> Vec<i64> {
    let mut run = Vec::new();
    let mut expected = last_promoted.map(|id| id + 1);

    for &id in staged {
        match expected {
            Some(next) if id < next => continue,
            Some(next) if id == next => {
                run.push(id);
                expected = Some(id + 1);
            },
            Some(_) => break,
            None => {
                run.push(id);
                expected = Some(id + 1);
            },
        }
    }

    run
}

#[derive(Debug, PartialEq)]
struct MergedState {
    status: ChunkStatus,
    staged_at: Option<DateTime<Utc>>,
    promoted_at: Option<DateTime<Utc>>,
}

/// Pure merge of a field update onto the current row state.
///
/// Status moves only forward; a regression request is logged and ignored
/// while the rest of the update still applies. `staged_at` and `promoted_at`
/// are set at most once.
fn merge_fields(
    chunk_id: i64,
    current: ChunkStatus,
    staged_at: Option<DateTime<Utc>>,
    promoted_at: Option<DateTime<Utc>>,
    fields: &ChunkFields,
    now: DateTime<Utc>,
) -> MergedState {
    let status = match fields.status {
        Some(requested) if current.is_forward_transition(requested) => requested,
        Some(requested) if requested != current => {
            tracing::warn!(
                chunk_id,
                current = %current,
                requested = %requested,
                "Ignoring status regression"
            );
            current
        },
        _ => current,
    };

    let staged_at = staged_at.or((status == ChunkStatus::Staged).then_some(now));
    let promoted_at = promoted_at.or((status == ChunkStatus::Promoted).then_some(now));

    MergedState {
        status,
        staged_at,
        promoted_at,
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_stops_at_gap() {
        // Chunks 1..=3 staged, 4 missing, 5 staged.
        assert_eq!(promotable_prefix(None, &[1, 2, 3, 5]), vec![1, 2, 3]);
    }

    #[test]
    fn test_prefix_starts_after_watermark() {
        assert_eq!(promotable_prefix(Some(3), &[4, 5, 6]), vec![4, 5, 6]);
        // Chunk right after the watermark missing: nothing is promotable,
        // even though later chunks are staged.
        assert_eq!(promotable_prefix(Some(3), &[5, 6]), Vec::<i64>::new());
    }

    #[test]
    fn test_prefix_empty_inputs() {
        assert_eq!(promotable_prefix(None, &[]), Vec::<i64>::new());
        assert_eq!(promotable_prefix(Some(10), &[]), Vec::<i64>::new());
    }

    #[test]
    fn test_prefix_skips_stale_staged_ids() {
        // A staged id at or below the watermark is dead weight, not a
        // reason to stall the run that follows it.
        assert_eq!(promotable_prefix(Some(4), &[2, 4, 5, 6]), vec![5, 6]);
    }

    #[test]
    fn test_prefix_out_of_order_staging() {
        // Chunks 5 and 6 staged in reverse order still promote together.
        assert_eq!(promotable_prefix(None, &[5, 6]), vec![5, 6]);
        // After promoting both, a lone staged 7 is immediately promotable.
        assert_eq!(promotable_prefix(Some(6), &[7]), vec![7]);
    }

    #[test]
    fn test_merge_forward_transition() {
        let now = Utc::now();
        let merged = merge_fields(
            1,
            ChunkStatus::Pending,
            None,
            None,
            &ChunkFields {
                status: Some(ChunkStatus::Staged),
                source_location: None,
            },
            now,
        );

        assert_eq!(merged.status, ChunkStatus::Staged);
        assert_eq!(merged.staged_at, Some(now));
        assert_eq!(merged.promoted_at, None);
    }

    #[test]
    fn test_merge_ignores_regression() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::minutes(5);
        let merged = merge_fields(
            1,
            ChunkStatus::Promoted,
            Some(earlier),
            Some(earlier),
            &ChunkFields {
                status: Some(ChunkStatus::Staged),
                source_location: None,
            },
            now,
        );

        assert_eq!(merged.status, ChunkStatus::Promoted);
        // Timestamps are set exactly once; the duplicate staged event must
        // not refresh them.
        assert_eq!(merged.staged_at, Some(earlier));
        assert_eq!(merged.promoted_at, Some(earlier));
    }

    #[test]
    fn test_merge_without_status_keeps_current() {
        let now = Utc::now();
        let merged = merge_fields(
            1,
            ChunkStatus::Staged,
            Some(now),
            None,
            &ChunkFields {
                status: None,
                source_location: Some("s3://landing/chunks/1".to_string()),
            },
            now,
        );

        assert_eq!(merged.status, ChunkStatus::Staged);
        assert_eq!(merged.staged_at, Some(now));
    }

    #[test]
    fn test_merge_failed_then_staged_retry() {
        let now = Utc::now();
        let merged = merge_fields(
            1,
            ChunkStatus::Failed,
            None,
            None,
            &ChunkFields {
                status: Some(ChunkStatus::Staged),
                source_location: None,
            },
            now,
        );

        assert_eq!(merged.status, ChunkStatus::Staged);
        assert_eq!(merged.staged_at, Some(now));
    }
}
