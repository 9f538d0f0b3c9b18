//! Chunkflow Server Library
//!
//! HTTP server owning the chunk lifecycle: event intake, the chunk registry,
//! and ordered promotion.
//!
//! # Overview
//!
//! Replica chunks flow through three externally-triggered paths, all hosted
//! here:
//!
//! - **Staging Trigger** (`POST /events/new-chunk`): a bus push delivery
//!   announcing freshly landed chunk files; the trigger launches one staging
//!   job per notification through the external job-execution service.
//! - **Chunk Tracker** (`POST /events/chunk-status`): status events from the
//!   staging job and the upstream replication source, applied idempotently
//!   to the chunk registry.
//! - **Promotion Coordinator** (`POST /promote`): computes the contiguous
//!   run of staged chunks after the promoted watermark and moves their
//!   staged rows into production, in order, never skipping.
//!
//! Event endpoints speak the bus's ack protocol through status codes: `204`
//! acknowledges a delivery (including malformed ones, which can never
//! succeed on retry), `503` asks the bus to redeliver after a transient
//! failure.
//!
//! ## Framework Stack
//!
//! - **Axum**: HTTP routing and handlers
//! - **SQLx**: PostgreSQL registry access
//! - **Reqwest**: job-launch API client

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod events;
pub mod launcher;
pub mod middleware;
pub mod promotion;
pub mod tracker;
pub mod trigger;

use axum::routing::{get, post};
use axum::Router;

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Chunk registry connection pool
    pub db: sqlx::PgPool,
    /// Client for the external job-execution service
    pub launcher: Arc<dyn launcher::JobLauncher>,
    /// Promoter moving staged rows into production tables
    pub promoter: Arc<dyn promotion::ChunkPromoter>,
    /// Fixed parameters merged into every staging-job launch
    pub launch: config::LauncherConfig,
}

/// Build the application router.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(events::health_check))
        .route("/promote", post(promotion::promote_handler))
        .route("/events/new-chunk", post(events::receive_new_chunk))
        .route("/events/chunk-status", post(events::receive_chunk_status))
        .with_state(state)
        .layer(tower_http::compression::CompressionLayer::new())
        .layer(middleware::tracing_layer())
}
