//! Metrics collection for the OpenSearch gateway
//!
//! This module defines and manages Prometheus metrics for monitoring the
//! gateway: HTTP traffic, backend calls and the paging machinery.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
};

lazy_static! {
    // HTTP Request Metrics

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "opensearch_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS_TOTAL");

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "opensearch_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");

    /// In-flight HTTP requests
    pub static ref HTTP_REQUESTS_IN_FLIGHT: IntGaugeVec = register_int_gauge_vec!(
        "opensearch_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
        &["method", "path"]
    )
    .expect("Failed to register HTTP_REQUESTS_IN_FLIGHT");

    /// HTTP request body size in bytes
    pub static ref HTTP_REQUEST_SIZE_BYTES: HistogramVec = register_histogram_vec!(
        "opensearch_http_request_size_bytes",
        "HTTP request body size in bytes",
        &["method", "path"],
        vec![100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0]
    )
    .expect("Failed to register HTTP_REQUEST_SIZE_BYTES");

    /// HTTP response size in bytes
    pub static ref HTTP_RESPONSE_SIZE_BYTES: HistogramVec = register_histogram_vec!(
        "opensearch_http_response_size_bytes",
        "HTTP response size in bytes",
        &["method", "path", "status"],
        vec![100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0]
    )
    .expect("Failed to register HTTP_RESPONSE_SIZE_BYTES");

    // Search Metrics

    /// Entries returned per search response
    pub static ref SEARCH_RESULTS: HistogramVec = register_histogram_vec!(
        "opensearch_search_results",
        "Number of entries returned by search",
        &["handler"],
        vec![0.0, 1.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    )
    .expect("Failed to register SEARCH_RESULTS");

    /// How each page was fetched
    pub static ref PAGING_STRATEGY_TOTAL: IntCounterVec = register_int_counter_vec!(
        "opensearch_paging_strategy_total",
        "Pages served by paging strategy",
        &["strategy"]
    )
    .expect("Failed to register PAGING_STRATEGY_TOTAL");

    /// Session cursors reused, by step direction
    pub static ref SESSION_CURSOR_REUSE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "opensearch_session_cursor_reuse_total",
        "Session cursors reused for adjacent pages",
        &["direction"]
    )
    .expect("Failed to register SESSION_CURSOR_REUSE_TOTAL");

    /// Sessions holding paging state
    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "opensearch_sessions_active",
        "Number of sessions with stored paging state"
    )
    .expect("Failed to register SESSIONS_ACTIVE");

    // Deep-pagination Cache Metrics

    /// Cache lookups by entry state
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "opensearch_cache_lookups_total",
        "Deep-pagination cache lookups by state",
        &["state"]
    )
    .expect("Failed to register CACHE_LOOKUPS_TOTAL");

    /// Cache generations by outcome
    pub static ref CACHE_GENERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "opensearch_cache_generations_total",
        "Deep-pagination cache generations by outcome",
        &["outcome"]
    )
    .expect("Failed to register CACHE_GENERATIONS_TOTAL");

    /// Time to materialize a full result set
    pub static ref CACHE_GENERATION_DURATION_SECONDS: Histogram = register_histogram!(
        "opensearch_cache_generation_duration_seconds",
        "Deep-pagination cache generation duration in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]
    )
    .expect("Failed to register CACHE_GENERATION_DURATION_SECONDS");

    /// Entries held (generating or ready)
    pub static ref CACHE_ENTRIES: IntGauge = register_int_gauge!(
        "opensearch_cache_entries",
        "Number of deep-pagination cache entries"
    )
    .expect("Failed to register CACHE_ENTRIES");

    // Backend Metrics

    /// Backend calls by backend, operation and outcome
    pub static ref BACKEND_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "opensearch_backend_requests_total",
        "Total number of search backend requests",
        &["backend", "operation", "outcome"]
    )
    .expect("Failed to register BACKEND_REQUESTS_TOTAL");

    /// Backend call duration
    pub static ref BACKEND_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "opensearch_backend_request_duration_seconds",
        "Search backend request duration in seconds",
        &["backend", "operation"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register BACKEND_REQUEST_DURATION_SECONDS");
}

/// Helper to sanitize path for metrics labels (limit cardinality)
///
/// Known routes keep their path; the search route is reported without a
/// trailing slash; everything else collapses to `other`.
pub fn sanitize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/metrics" | "/favicon.ico" => path.to_string(),
        _ => {
            let trimmed = path.trim_end_matches('/');
            if trimmed.ends_with("/request") && trimmed.split('/').count() <= 4 {
                trimmed.to_string()
            } else {
                "other".to_string()
            }
        }
    }
}
