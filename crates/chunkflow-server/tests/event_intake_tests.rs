//! Event intake tests driving the router end to end.
//!
//! The registry pool is lazy and points nowhere: deliveries that are dropped
//! during validation must never touch the database, and deliveries that do
//! reach the registry must swallow the connection failure and still ack.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chunkflow_common::types::PushEnvelope;
use chunkflow_server::config::{LauncherConfig, PromotionConfig};
use chunkflow_server::launcher::HttpJobLauncher;
use chunkflow_server::promotion::SqlChunkPromoter;
use chunkflow_server::{app_router, AppState};

fn lazy_pool() -> sqlx::PgPool {
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(1))
        .connect_lazy("postgresql://nobody@127.0.0.1:1/unreachable")
        .unwrap()
}

fn state_for(launch_url: String) -> AppState {
    let launcher_config = LauncherConfig {
        launch_url,
        template_path: "registry/stage-chunk:latest".to_string(),
        service_account: "stage-runner".to_string(),
        temp_location: "s3://scratch/tmp".to_string(),
        request_timeout_secs: 5,
    };

    let pool = lazy_pool();
    let promotion = PromotionConfig {
        schema: "public".to_string(),
        tables: vec![],
    };

    AppState {
        db: pool.clone(),
        launcher: Arc::new(HttpJobLauncher::new(&launcher_config).unwrap()),
        promoter: Arc::new(SqlChunkPromoter::new(pool, &promotion)),
        launch: launcher_config,
    }
}

fn notification_body() -> Vec<u8> {
    let payload = br#"{"bucket":"landing","name":"chunks/42","dataset":"ppdb"}"#;
    serde_json::to_vec(&PushEnvelope::wrap(payload)).unwrap()
}

async fn post(app: axum::Router, uri: &str, body: Vec<u8>) -> StatusCode {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    response.status()
}

#[tokio::test]
async fn test_new_chunk_launches_job_and_acks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/jobs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"job": {"id": "j-1"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = app_router(state_for(format!("{}/api/v1/jobs", server.uri())));
    let status = post(app, "/events/new-chunk", notification_body()).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_new_chunk_transient_failure_requests_redelivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let app = app_router(state_for(format!("{}/api/v1/jobs", server.uri())));
    let status = post(app, "/events/new-chunk", notification_body()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_malformed_new_chunk_is_acked_without_launch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = app_router(state_for(format!("{}/api/v1/jobs", server.uri())));
    let status = post(app, "/events/new-chunk", b"definitely not json".to_vec()).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_malformed_status_event_is_acked() {
    let app = app_router(state_for("http://127.0.0.1:9/unused".to_string()));

    // Envelope decodes but the event is missing its chunk id; the tracker
    // drops it before any registry call.
    let payload = br#"{"operation": "update", "values": {"status": "staged"}}"#;
    let body = serde_json::to_vec(&PushEnvelope::wrap(payload)).unwrap();

    let status = post(app, "/events/chunk-status", body).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_status_event_registry_failure_is_swallowed() {
    let app = app_router(state_for("http://127.0.0.1:9/unused".to_string()));

    // Well-formed event; the unreachable registry fails the insert, which
    // the tracker logs and swallows.
    let payload = br#"{
        "operation": "insert",
        "apdb_replica_chunk": 7,
        "values": {"status": "pending"}
    }"#;
    let body = serde_json::to_vec(&PushEnvelope::wrap(payload)).unwrap();

    let status = post(app, "/events/chunk-status", body).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
