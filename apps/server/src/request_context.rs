//! Per-request context injected by middleware.

/// Identifiers of the request being served, available to handlers as an
/// extension.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Request id the client sent, when it differs from ours.
    pub correlation_id: Option<String>,
}
