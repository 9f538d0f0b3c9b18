//! Event intake endpoints.
//!
//! The message bus pushes deliveries here as HTTP POSTs. The response code
//! is the ack protocol: `204` acknowledges the delivery, `503` asks for a
//! redelivery after a transient failure. Bodies are taken as raw bytes so a
//! malformed delivery can be logged and acknowledged instead of bouncing off
//! an extractor with the wrong status.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::db;
use crate::tracker;
use crate::trigger::{self, Delivery};
use crate::AppState;

/// `POST /events/new-chunk`: staging trigger intake.
pub async fn receive_new_chunk(State(state): State<AppState>, body: Bytes) -> StatusCode {
    match trigger::handle_notification(state.launcher.as_ref(), &state.launch, &body).await {
        Delivery::Ack => StatusCode::NO_CONTENT,
        Delivery::Retry => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// `POST /events/chunk-status`: chunk tracker intake.
///
/// Always acknowledges: validation failures and registry errors alike are
/// logged and swallowed inside the tracker.
pub async fn receive_chunk_status(State(state): State<AppState>, body: Bytes) -> StatusCode {
    tracker::handle_status_message(&state.db, &body).await;
    StatusCode::NO_CONTENT
}

/// `GET /health`: registry connectivity probe.
pub async fn health_check(State(state): State<AppState>) -> Result<Response, StatusCode> {
    match db::health_check(&state.db).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}
