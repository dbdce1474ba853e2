//! Application setup and server configuration.

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use voc_pipeline::ResearchPipeline;

use crate::server::routes::{
    get_job_handler, health_handler, job_steps_handler, job_tasks_handler, submit_job_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: ResearchPipeline,
    pub db_pool: PgPool,
}

/// Build the Axum application router
pub fn build_app(pipeline: ResearchPipeline, db_pool: PgPool) -> Router {
    let app_state = AppState { pipeline, db_pool };

    // CORS configuration - allow any origin for development
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/jobs", post(submit_job_handler))
        .route("/jobs/:id", get(get_job_handler))
        .route("/jobs/:id/tasks", get(job_tasks_handler))
        .route("/jobs/:id/steps", get(job_steps_handler))
        .route("/health", get(health_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
