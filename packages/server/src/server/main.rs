// Main entry point for the research API server

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voc_pipeline::{PostgresStore, StuckTaskSweeper};
use voc_server::{kernel::ServerDeps, server::build_app, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,voc_server=debug,voc_pipeline=debug,tower_http=debug,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Voice-of-Customer research API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Schema setup runs inside the store
    let store = Arc::new(
        PostgresStore::from_pool(pool.clone())
            .await
            .context("Failed to run migrations")?,
    );
    tracing::info!("Migrations complete");

    let deps = ServerDeps::new(store.clone(), &config)?;

    // Background services share one shutdown token
    let shutdown = CancellationToken::new();

    let dispatcher = Arc::new(deps.pipeline.dispatcher(deps.dispatcher.clone()));
    let dispatcher_handle = tokio::spawn(dispatcher.clone().run(shutdown.clone()));

    let sweeper = StuckTaskSweeper::new(store, dispatcher, deps.sweeper.clone());
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    // Build application
    let app = build_app(deps.pipeline, pool);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    let _ = dispatcher_handle.await;
    let _ = sweeper_handle.await;
    tracing::info!("Shutdown complete");

    Ok(())
}
