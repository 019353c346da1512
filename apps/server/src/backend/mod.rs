//! Search backends
//!
//! Everything the search service needs from a document store sits behind
//! [`SearchBackend`]: paged search, exact count, unbounded scan, and single
//! document lookup. Implementations:
//! - [`elasticsearch::ElasticsearchBackend`] - primary document-search engine
//! - [`solr::SolrBackend`] - inverted-index server used by ESGF collections
//! - [`memory::MemoryBackend`] - in-process documents, used by tests

pub mod elasticsearch;
pub mod memory;
pub mod query;
pub mod solr;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Instant;

use crate::Result;

pub use query::{BackendQuery, BoundingBox, Clause, SearchTarget, SortField, SortKey, SortOrder};

/// A single document returned by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    /// Sort-key tuple, present when the backend supports cursor paging.
    pub sort: Option<SortKey>,
    pub source: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalRelation {
    /// Exact count.
    Eq,
    /// Lower bound; the true count is at least `value`.
    Gte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalHits {
    pub value: u64,
    pub relation: TotalRelation,
}

impl TotalHits {
    pub fn exact(value: u64) -> Self {
        Self {
            value,
            relation: TotalRelation::Eq,
        }
    }

    pub fn at_least(value: u64) -> Self {
        Self {
            value,
            relation: TotalRelation::Gte,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.relation == TotalRelation::Eq
    }
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub total: TotalHits,
    pub hits: Vec<Hit>,
}

/// Document store used by the search service.
///
/// All calls are awaited individually by the caller and must be bounded in
/// time by the implementation (client timeouts).
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short backend name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Largest `from + size` served without a cursor, or `None` if unbounded.
    fn random_access_ceiling(&self) -> Option<u64>;

    /// Execute a paged query.
    ///
    /// # Errors
    /// * `Error::ResultWindowTooLarge` - offset paging beyond the random-access ceiling
    /// * `Error::BackendUnavailable` / `Error::Timeout` - transport failures
    /// * `Error::Backend` - the backend rejected the query
    async fn search(&self, query: &BackendQuery) -> Result<SearchResponse>;

    /// Exact number of documents matching the query (paging is ignored).
    async fn count(&self, query: &BackendQuery) -> Result<u64>;

    /// Stream every matching document in stable sort order, bypassing
    /// offset limits. `chunk_size` is a hint for the backend's batch size.
    fn scan(&self, query: BackendQuery, chunk_size: usize) -> BoxStream<'static, Result<Hit>>;

    /// Fetch a single document's source fields by id.
    ///
    /// Returns `Ok(None)` if no document with that id exists.
    async fn get(&self, target: SearchTarget, id: &str) -> Result<Option<JsonValue>>;
}

/// Record duration and outcome of a backend call.
pub(crate) fn observe_call<T>(
    backend: &str,
    operation: &str,
    started: Instant,
    result: &Result<T>,
) {
    let outcome = match result {
        Ok(_) => "success",
        Err(crate::Error::Timeout(_)) => "timeout",
        Err(crate::Error::BackendUnavailable(_)) => "unavailable",
        Err(crate::Error::ResultWindowTooLarge(_)) => "window_too_large",
        Err(_) => "error",
    };

    crate::metrics::BACKEND_REQUESTS_TOTAL
        .with_label_values(&[backend, operation, outcome])
        .inc();
    crate::metrics::BACKEND_REQUEST_DURATION_SECONDS
        .with_label_values(&[backend, operation])
        .observe(started.elapsed().as_secs_f64());
}

/// Map a transport-level HTTP client error onto the error taxonomy.
pub(crate) fn map_transport_error(backend: &str, operation: &str, e: reqwest::Error) -> crate::Error {
    if e.is_timeout() {
        crate::Error::Timeout(format!("{} {} timed out: {}", backend, operation, e))
    } else if e.is_connect() || e.is_request() {
        crate::Error::BackendUnavailable(format!("{} {} failed: {}", backend, operation, e))
    } else if e.is_decode() {
        crate::Error::Backend(format!(
            "{} {} returned an unreadable response: {}",
            backend, operation, e
        ))
    } else {
        crate::Error::BackendUnavailable(format!("{} {} failed: {}", backend, operation, e))
    }
}
