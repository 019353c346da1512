//! OpenSearch API Routes
//!
//! Mounted under the configured base path.

use crate::api::handlers::search;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn opensearch_routes() -> Router<AppState> {
    Router::new()
        .route("/request", get(search::search_handler))
        .route("/request/", get(search::search_handler))
}
