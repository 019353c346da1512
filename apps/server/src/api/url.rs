//! URL helpers for building absolute links.

use axum::http::HeaderMap;

/// Build the OpenSearch base URL (`{scheme}://{host}{base_path}`) using
/// forwarding headers when present, so links stay valid behind a reverse
/// proxy.
pub fn base_url_from_headers(headers: &HeaderMap, base_path: &str) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .or_else(|| headers.get("x-forwarded-scheme"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");

    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");

    format!("{}://{}{}", scheme, host, base_path.trim_end_matches('/'))
}
