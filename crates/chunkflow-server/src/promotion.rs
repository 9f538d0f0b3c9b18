//! Promotion coordinator: staged chunks move into production, in order.
//!
//! A promotion pass computes the contiguous run of staged chunks after the
//! promoted watermark, hands the ordered id list to the promoter untouched,
//! and then records the new watermark. The pass is guarded by a Postgres
//! advisory lock so two concurrent invocations cannot both promote the same
//! prefix; the loser reports a no-op instead of waiting.
//!
//! Promoter success followed by a bookkeeping failure leaves promoted rows
//! with a stale watermark. That inconsistency is recoverable: the promoter
//! clears staged rows in the same transaction as the copy, so re-running the
//! pass re-promotes nothing and only advances the watermark.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sqlx::{Connection, PgPool};
use thiserror::Error;

use chunkflow_common::types::staging_table_name;

use crate::config::PromotionConfig;
use crate::db::chunks;
use crate::db::DbError;
use crate::AppState;

/// Advisory lock key for the promotion pass. Arbitrary but stable; every
/// coordinator instance sharing the registry must use the same value.
const PROMOTION_LOCK_KEY: i64 = 0x6368_666c_6f77;

/// Promotion failure surfaced to the HTTP caller.
#[derive(Error, Debug)]
pub enum PromotionError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Promoter failed: {0}")]
    Promoter(String),
}

/// Outcome of one promotion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionReport {
    /// This many chunks were promoted.
    Promoted(u64),
    /// No promotable chunks; a successful no-op.
    NothingToDo,
    /// Another pass holds the promotion lock.
    Busy,
}

/// Seam to the component that copies staged rows into production tables.
///
/// The coordinator passes the promotable ids ascending and complete; an
/// implementation must not reorder or subset them.
#[async_trait]
pub trait ChunkPromoter: Send + Sync {
    async fn promote_chunks(&self, chunk_ids: &[i64]) -> Result<(), PromotionError>;
}

/// Run one serialized promotion pass.
pub async fn run_promotion(
    pool: &PgPool,
    promoter: &dyn ChunkPromoter,
) -> Result<PromotionReport, PromotionError> {
    // The advisory lock is session-scoped, so it must be taken and released
    // on one pinned connection.
    let mut lock_conn = pool.acquire().await?;

    let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
        .bind(PROMOTION_LOCK_KEY)
        .fetch_one(&mut *lock_conn)
        .await?;

    if !locked {
        tracing::info!("Promotion pass already in progress; skipping");
        return Ok(PromotionReport::Busy);
    }

    let outcome = promote_locked(pool, promoter).await;

    let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(PROMOTION_LOCK_KEY)
        .execute(&mut *lock_conn)
        .await;

    if let Err(e) = unlock {
        // A pooled connection must not return still holding the lock.
        tracing::error!(error = %e, "Failed to release promotion lock; closing connection");
        let _ = lock_conn.detach().close().await;
    }

    outcome
}

async fn promote_locked(
    pool: &PgPool,
    promoter: &dyn ChunkPromoter,
) -> Result<PromotionReport, PromotionError> {
    let chunk_ids = chunks::get_promotable_chunks(pool).await?;

    let (Some(first), Some(last)) = (chunk_ids.first(), chunk_ids.last()) else {
        return Ok(PromotionReport::NothingToDo);
    };

    tracing::info!(
        count = chunk_ids.len(),
        first = *first,
        last = *last,
        "Promoting staged chunks"
    );

    promoter.promote_chunks(&chunk_ids).await?;

    let promoted = chunks::mark_chunks_promoted(pool, &chunk_ids).await?;

    tracing::info!(promoted, "Promotion pass complete");

    Ok(PromotionReport::Promoted(promoted))
}

/// SQL promoter copying staged rows into production tables.
///
/// Every configured table is handled in one transaction: copy the rows
/// belonging to the promotable chunks out of the staging variant, then clear
/// them. The `SELECT DISTINCT` collapses duplicate rows left behind by
/// retried staging jobs, which append without deduplication.
pub struct SqlChunkPromoter {
    pool: PgPool,
    schema: String,
    tables: Vec<String>,
}

impl SqlChunkPromoter {
    pub fn new(pool: PgPool, config: &PromotionConfig) -> Self {
        Self {
            pool,
            schema: config.schema.clone(),
            tables: config.tables.clone(),
        }
    }
}

#[async_trait]
impl ChunkPromoter for SqlChunkPromoter {
    async fn promote_chunks(&self, chunk_ids: &[i64]) -> Result<(), PromotionError> {
        let mut tx = self.pool.begin().await?;

        for table in &self.tables {
            let production = qualified(&self.schema, table);
            let staging = qualified(&self.schema, &staging_table_name(table));

            let copied = sqlx::query(&format!(
                "INSERT INTO {} SELECT DISTINCT * FROM {} WHERE apdb_replica_chunk = ANY($1)",
                production, staging
            ))
            .bind(chunk_ids)
            .execute(&mut *tx)
            .await?;

            let cleared = sqlx::query(&format!(
                "DELETE FROM {} WHERE apdb_replica_chunk = ANY($1)",
                staging
            ))
            .bind(chunk_ids)
            .execute(&mut *tx)
            .await?;

            tracing::debug!(
                table = %table,
                rows_copied = copied.rows_affected(),
                rows_cleared = cleared.rows_affected(),
                "Copied staged rows into production"
            );
        }

        tx.commit().await?;

        Ok(())
    }
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `POST /promote` handler.
///
/// Contract: `200` for success or nothing-to-do, `500` for unexpected
/// failure, always `{ok, mode/message/error, chunks_promoted}`.
pub async fn promote_handler(State(state): State<AppState>) -> Response {
    match run_promotion(&state.db, state.promoter.as_ref()).await {
        Ok(PromotionReport::Promoted(count)) => (
            StatusCode::OK,
            Json(json!({"ok": true, "mode": "execute", "chunks_promoted": count})),
        )
            .into_response(),
        Ok(PromotionReport::NothingToDo) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "message": "No promotable chunks found",
                "chunks_promoted": 0
            })),
        )
            .into_response(),
        Ok(PromotionReport::Busy) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "message": "Promotion already in progress",
                "chunks_promoted": 0
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Promotion pass failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": e.to_string(), "chunks_promoted": 0})),
            )
                .into_response()
        },
    }
}
