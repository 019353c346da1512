//! API layer - routes, handlers, and middleware

pub mod content_negotiation;
pub mod handlers;
pub mod middleware;
pub mod response_formatter;
pub mod routes;
pub mod url;

use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_request_body_size;
    let cors_origins = state.config.server.cors_origins.clone();
    let base_path = state.config.server.base_path.trim_end_matches('/').to_string();

    let opensearch_router = routes::opensearch::opensearch_routes();
    let router = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Root endpoint
        .route("/", get(root))
        // Favicon handler (returns 204 to prevent 404 logs)
        .route("/favicon.ico", get(favicon))
        // Metrics endpoint
        .merge(routes::metrics::metrics_routes());

    let router = if base_path.is_empty() {
        router.merge(opensearch_router)
    } else {
        router.nest(&base_path, opensearch_router)
    };

    router
        .with_state(state)
        // Add middleware (applied in reverse order)
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn(middleware::metrics_middleware))
        .layer(middleware::compression())
        .layer(middleware::cors(&cors_origins))
        .layer(DefaultBodyLimit::max(max_body_size))
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "opensearch-server"
    }))
}

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "server": "OpenSearch Gateway",
            "version": env!("CARGO_PKG_VERSION"),
            "searchUrl": format!("{}/request", state.config.server.base_path.trim_end_matches('/')),
            "status": "running"
        })),
    )
}

async fn favicon() -> impl IntoResponse {
    // 204 keeps browser favicon probes out of the 404 logs
    StatusCode::NO_CONTENT
}
