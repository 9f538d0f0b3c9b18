//! Chunkflow Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chunkflow_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tracing::info;

use chunkflow_server::config::Config;
use chunkflow_server::launcher::HttpJobLauncher;
use chunkflow_server::promotion::SqlChunkPromoter;
use chunkflow_server::{app_router, db, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; environment variables take precedence.
    let log_config = LogConfig::from_env()
        .unwrap_or_else(|_| LogConfig::with_prefix("chunkflow-server"));

    init_logging(&log_config)?;

    info!("Starting Chunkflow Server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Initialize the registry connection pool
    let db_pool = db::create_pool(&config.database).await?;
    info!("Database connection pool established");

    // Run migrations
    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    // Wire up the external collaborators
    let launcher = Arc::new(HttpJobLauncher::new(&config.launcher)?);
    let promoter = Arc::new(SqlChunkPromoter::new(db_pool.clone(), &config.promotion));

    let state = AppState {
        db: db_pool,
        launcher,
        promoter,
        launch: config.launcher.clone(),
    };

    let app = app_router(state);

    // Create socket address
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give in-flight deliveries time to complete
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
