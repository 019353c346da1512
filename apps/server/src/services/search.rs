//! Search service - OpenSearch request orchestration
//!
//! Resolves the collection a request is scoped to, builds its query and picks
//! how the requested page is fetched:
//! - total within the random-access ceiling: offset paging
//! - beyond it: a continuation token from a `next` link, a session cursor for
//!   an adjacent page, offset paging while the window still fits, and the
//!   deep-pagination cache for everything else
//!
//! A page the cache cannot serve yet is answered approximately from the last
//! window the backend allows.

use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use crate::backend::{BackendQuery, Hit, SearchBackend, SearchTarget, SortKey, TotalHits};
use crate::collections::{BackendKind, CollectionKind, CollectionRegistry, COLLECTION_FACETS};
use crate::config::{Config, PagingConfig};
use crate::facets::{ElasticsearchDialect, FacetSet, ParentCollection, QueryDialect, SolrDialect};
use crate::metrics::{PAGING_STRATEGY_TOTAL, SEARCH_RESULTS, SESSION_CURSOR_REUSE_TOTAL};
use crate::paging::{
    cache_key, session, CacheLookup, CursorToken, DeepPaginationCache, SearchRequest,
    SessionPagingState, SessionStore,
};
use crate::{Error, Result};

/// How a page was fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Offset and limit.
    Direct,
    /// Continuation token from a `next` link.
    Token,
    /// Cursor remembered by the session for an adjacent page.
    Session,
    /// Slice of a materialized result set.
    Cache,
    /// Last allowed window while the cache is unavailable.
    Degraded,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Token => "token",
            Self::Session => "session",
            Self::Cache => "cache",
            Self::Degraded => "degraded",
        }
    }
}

/// What a request searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Collection documents; no `parentIdentifier`.
    Collections,
    /// Granules of one collection.
    Collection {
        kind: CollectionKind,
        parent: ParentCollection,
    },
}

impl Scope {
    pub fn facet_set(&self) -> &'static FacetSet {
        match self {
            Self::Collections => &COLLECTION_FACETS,
            Self::Collection { kind, .. } => kind.facet_set(),
        }
    }

    pub fn parent(&self) -> Option<&ParentCollection> {
        match self {
            Self::Collections => None,
            Self::Collection { parent, .. } => Some(parent),
        }
    }

    /// Metrics and log label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Collections => "collections",
            Self::Collection { kind, .. } => kind.as_str(),
        }
    }

    fn backend_kind(&self) -> BackendKind {
        match self {
            Self::Collections => BackendKind::Elasticsearch,
            Self::Collection { kind, .. } => kind.backend(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub scope: Scope,
    pub total: TotalHits,
    /// Hits in display order.
    pub hits: Vec<Hit>,
    pub strategy: Strategy,
    /// The total exceeds the random-access ceiling; only forward cursor links
    /// can be offered.
    pub cursor_mode: bool,
}

struct Fetched {
    hits: Vec<Hit>,
    strategy: Strategy,
    cursor: Option<SortKey>,
    reverse: bool,
    /// Total reported alongside the page, when the backend returned one.
    total: Option<TotalHits>,
}

impl Fetched {
    fn new(hits: Vec<Hit>, strategy: Strategy) -> Self {
        Self {
            hits,
            strategy,
            cursor: None,
            reverse: false,
            total: None,
        }
    }
}

/// Call once more if the first attempt failed with a transient error.
async fn with_retry<T, F, Fut>(operation: &'static str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match call().await {
        Err(e) if e.is_retryable() => {
            tracing::warn!(operation, error = %e, "Backend call failed, retrying once");
            call().await
        }
        result => result,
    }
}

pub struct SearchService {
    registry: CollectionRegistry,
    elasticsearch: Arc<dyn SearchBackend>,
    solr: Option<Arc<dyn SearchBackend>>,
    es_dialect: ElasticsearchDialect,
    cache: DeepPaginationCache,
    sessions: Arc<SessionStore>,
    paging: PagingConfig,
}

impl SearchService {
    pub fn new(
        config: &Config,
        elasticsearch: Arc<dyn SearchBackend>,
        solr: Option<Arc<dyn SearchBackend>>,
        cache: DeepPaginationCache,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            registry: CollectionRegistry::new(&config.collections),
            elasticsearch,
            solr,
            es_dialect: ElasticsearchDialect::new(config.elasticsearch.application_id.clone()),
            cache,
            sessions,
            paging: config.paging.clone(),
        }
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    /// Execute a search and record the session's paging state.
    ///
    /// # Errors
    /// * `InvalidParameter` - malformed cursor, bounding box or date
    /// * `NotFound` - unknown `parentIdentifier` or no handler for its path
    /// * backend errors that persisted through one retry
    pub async fn search(
        &self,
        request: &SearchRequest,
        session_id: Option<&str>,
    ) -> Result<SearchOutcome> {
        let explicit_cursor = request
            .cursor
            .as_deref()
            .map(CursorToken::decode)
            .transpose()?;

        let scope = self.resolve_scope(request).await?;
        let (backend, dialect) = self.backend_for(&scope)?;
        let query = scope.facet_set().build(request, dialect, scope.parent())?;

        let ceiling = self.ceiling(backend.as_ref());
        let counted = self.count(backend.as_ref(), &query, ceiling).await?;
        let over_ceiling = |total: &TotalHits| ceiling.is_some_and(|c| total.value > c);

        let state = session_id.and_then(|id| self.sessions.load(id));
        let page_size = request.page_size;
        let window_end = request.offset() + u64::from(page_size);

        let fetched = if !over_ceiling(&counted) {
            self.fetch_offset(&backend, &query, request, ceiling).await?
        } else if let Some(key) = explicit_cursor {
            self.fetch_cursor(backend.as_ref(), &query, key, false, page_size, Strategy::Token)
                .await?
        } else if let (Some(key), reverse) = session::resolve(state.as_ref(), request) {
            let direction = match state
                .as_ref()
                .map(|s| request.offset().cmp(&s.last_offset))
            {
                Some(Ordering::Less) => "previous",
                Some(Ordering::Equal) => "repeat",
                _ => "next",
            };
            SESSION_CURSOR_REUSE_TOTAL
                .with_label_values(&[direction])
                .inc();
            self.fetch_cursor(backend.as_ref(), &query, key, reverse, page_size, Strategy::Session)
                .await?
        } else if ceiling.is_some_and(|c| window_end <= c) {
            self.fetch_offset(&backend, &query, request, ceiling).await?
        } else {
            self.fetch_cached(&backend, &query, request, ceiling).await?
        };

        let total = match fetched.total {
            Some(reported) if !counted.is_exact() => reported,
            _ => counted,
        };

        if let Some(id) = session_id {
            if fetched.strategy != Strategy::Degraded {
                self.sessions.save(
                    id,
                    SessionPagingState::record(
                        request,
                        &fetched.hits,
                        fetched.cursor.clone(),
                        fetched.reverse,
                    ),
                );
            }
        }

        PAGING_STRATEGY_TOTAL
            .with_label_values(&[fetched.strategy.as_str()])
            .inc();
        SEARCH_RESULTS
            .with_label_values(&[scope.label()])
            .observe(fetched.hits.len() as f64);

        tracing::debug!(
            scope = scope.label(),
            strategy = fetched.strategy.as_str(),
            total = total.value,
            returned = fetched.hits.len(),
            "Search completed"
        );

        Ok(SearchOutcome {
            cursor_mode: over_ceiling(&total),
            scope,
            total,
            hits: fetched.hits,
            strategy: fetched.strategy,
        })
    }

    async fn resolve_scope(&self, request: &SearchRequest) -> Result<Scope> {
        let Some(identifier) = request.parent_identifier() else {
            return Ok(Scope::Collections);
        };

        let document = with_retry("get", || {
            self.elasticsearch.get(SearchTarget::Collections, identifier)
        })
        .await?
        .ok_or_else(|| Error::NotFound(format!("Unknown parentIdentifier '{}'", identifier)))?;

        let path = document
            .get("path")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                Error::NotFound(format!("Collection '{}' has no root path", identifier))
            })?;

        let matched = self.registry.lookup(path).ok_or_else(|| {
            Error::NotFound(format!(
                "No collection handler for parentIdentifier '{}'",
                identifier
            ))
        })?;

        tracing::debug!(
            parent_identifier = identifier,
            path,
            prefix = %matched.prefix,
            handler = matched.kind.as_str(),
            "Resolved collection handler"
        );

        Ok(Scope::Collection {
            kind: matched.kind,
            parent: ParentCollection {
                identifier: identifier.to_string(),
                path: path.to_string(),
            },
        })
    }

    fn backend_for(&self, scope: &Scope) -> Result<(Arc<dyn SearchBackend>, &dyn QueryDialect)> {
        match scope.backend_kind() {
            BackendKind::Elasticsearch => Ok((self.elasticsearch.clone(), &self.es_dialect)),
            BackendKind::Solr => match &self.solr {
                Some(solr) => Ok((solr.clone(), &SolrDialect)),
                None => Err(Error::BackendUnavailable(format!(
                    "Solr backend is not enabled; cannot search {} collections",
                    scope.label()
                ))),
            },
        }
    }

    /// Effective random-access ceiling; `None` when the backend has none.
    fn ceiling(&self, backend: &dyn SearchBackend) -> Option<u64> {
        backend
            .random_access_ceiling()
            .map(|limit| limit.min(self.paging.random_access_ceiling))
    }

    /// Total hits for the query. A count that times out is taken to exceed
    /// the ceiling.
    async fn count(
        &self,
        backend: &dyn SearchBackend,
        query: &BackendQuery,
        ceiling: Option<u64>,
    ) -> Result<TotalHits> {
        let timeout = self.paging.count_timeout();

        let counted = with_retry("count", || async move {
            match tokio::time::timeout(timeout, backend.count(query)).await {
                Ok(Ok(n)) => Ok(Some(n)),
                Ok(Err(Error::Timeout(_))) | Err(_) => Ok(None),
                Ok(Err(e)) => Err(e),
            }
        })
        .await?;

        Ok(match counted {
            Some(n) => TotalHits::exact(n),
            None => {
                tracing::warn!(
                    backend = backend.name(),
                    timeout_secs = timeout.as_secs(),
                    "Count timed out, assuming a result set beyond the ceiling"
                );
                TotalHits::at_least(ceiling.map_or(0, |c| c + 1))
            }
        })
    }

    async fn fetch_offset(
        &self,
        backend: &Arc<dyn SearchBackend>,
        query: &BackendQuery,
        request: &SearchRequest,
        ceiling: Option<u64>,
    ) -> Result<Fetched> {
        let paged = query.clone().with_page(request.offset(), request.page_size);

        match with_retry("search", || backend.search(&paged)).await {
            Ok(response) => {
                let mut fetched = Fetched::new(response.hits, Strategy::Direct);
                fetched.total = Some(response.total);
                Ok(fetched)
            }
            Err(Error::ResultWindowTooLarge(message)) => {
                tracing::debug!(
                    backend = backend.name(),
                    reason = %message,
                    "Offset beyond the backend window, switching to the cache"
                );
                self.fetch_cached(backend, query, request, ceiling).await
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_cursor(
        &self,
        backend: &dyn SearchBackend,
        query: &BackendQuery,
        key: SortKey,
        reverse: bool,
        size: u32,
        strategy: Strategy,
    ) -> Result<Fetched> {
        let paged = query.clone().with_cursor(key.clone(), reverse, size);
        let response = with_retry("search", || backend.search(&paged)).await?;

        let mut hits = response.hits;
        if reverse {
            hits.reverse();
        }

        Ok(Fetched {
            hits,
            strategy,
            cursor: Some(key),
            reverse,
            total: None,
        })
    }

    async fn fetch_cached(
        &self,
        backend: &Arc<dyn SearchBackend>,
        query: &BackendQuery,
        request: &SearchRequest,
        ceiling: Option<u64>,
    ) -> Result<Fetched> {
        let key = cache_key(&request.normalized_params());
        let lookup = self
            .cache
            .get_page(
                &key,
                backend.clone(),
                query.clone(),
                request.offset() as usize,
                request.page_size as usize,
            )
            .await;

        match lookup {
            Ok(CacheLookup::Ready(hits)) => return Ok(Fetched::new(hits, Strategy::Cache)),
            Ok(CacheLookup::Pending) => {
                tracing::warn!(
                    cache_key = %key,
                    "Result set still materializing, serving an approximate page"
                );
            }
            Err(e) => {
                tracing::warn!(
                    cache_key = %key,
                    error = %e,
                    "Cache generation failed, serving an approximate page"
                );
            }
        }

        let from = ceiling
            .unwrap_or(0)
            .saturating_sub(u64::from(request.page_size));
        let paged = query.clone().with_page(from, request.page_size);
        let response = with_retry("search", || backend.search(&paged)).await?;

        Ok(Fetched::new(response.hits, Strategy::Degraded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryDocument};
    use serde_json::json;

    fn granule(i: usize) -> MemoryDocument {
        MemoryDocument::new(
            format!("g{i:05}"),
            json!({
                "projects": { "opensearch": { "datasetId": "cci-ozone", "ecv": "OZONE" } },
                "info": { "directory": "/neodc/esacci/ozone", "name": format!("f{i:05}.nc") }
            }),
        )
    }

    fn service(count: usize, ceiling: u64) -> (SearchService, MemoryBackend, Arc<SessionStore>) {
        let mut config = Config::default();
        config.paging.random_access_ceiling = ceiling;
        config.paging.cache_page_size = 10;

        let backend = MemoryBackend::new(
            (0..count).map(granule).collect(),
            vec![MemoryDocument::new(
                "cci-ozone",
                json!({ "collection_id": "cci-ozone", "path": "/neodc/esacci/ozone" }),
            )],
            Some(ceiling),
        );
        let sessions = Arc::new(SessionStore::new(16, std::time::Duration::from_secs(60)));
        let service = SearchService::new(
            &config,
            Arc::new(backend.clone()),
            None,
            DeepPaginationCache::new(&config.paging),
            sessions.clone(),
        );
        (service, backend, sessions)
    }

    fn request(query: &str) -> SearchRequest {
        let items = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        SearchRequest::from_items(items, &PagingConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_under_ceiling_ignores_cursor_token() {
        let (service, backend, _) = service(30, 100);
        let token = CursorToken::encode(&vec![json!("/neodc/esacci/ozone"), json!("f00005.nc")]);
        let outcome = service
            .search(
                &request(&format!("parentIdentifier=cci-ozone&startPage=2&cursor={}", token)),
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.strategy, Strategy::Direct);
        assert!(!outcome.cursor_mode);
        assert_eq!(outcome.hits[0].id, "g00010");
        assert!(backend.last_search().unwrap().search_after.is_none());
    }

    #[tokio::test]
    async fn test_strategies_past_the_ceiling() {
        let (service, backend, _) = service(250, 100);

        let direct = service
            .search(&request("parentIdentifier=cci-ozone&startPage=10"), None)
            .await
            .unwrap();
        assert_eq!(direct.strategy, Strategy::Direct);
        assert!(direct.cursor_mode);

        let cached = service
            .search(&request("parentIdentifier=cci-ozone&startPage=20"), None)
            .await
            .unwrap();
        assert_eq!(cached.strategy, Strategy::Cache);
        assert_eq!(cached.hits[0].id, "g00190");
        assert_eq!(backend.scan_count(), 1);

        let token = CursorToken::encode(cached.hits[9].sort.as_ref().unwrap());
        let followed = service
            .search(
                &request(&format!("parentIdentifier=cci-ozone&startPage=21&cursor={}", token)),
                None,
            )
            .await
            .unwrap();
        assert_eq!(followed.strategy, Strategy::Token);
        assert_eq!(followed.hits[0].id, "g00200");
    }

    #[tokio::test]
    async fn test_degraded_page_is_not_recorded() {
        let (service, backend, sessions) = service(250, 100);
        backend.fail_next_scans(1);

        let outcome = service
            .search(&request("parentIdentifier=cci-ozone&startPage=20"), Some("s1"))
            .await
            .unwrap();
        assert_eq!(outcome.strategy, Strategy::Degraded);
        assert_eq!(outcome.hits[0].id, "g00090");
        assert!(sessions.load("s1").is_none());

        let outcome = service
            .search(&request("parentIdentifier=cci-ozone&startPage=20"), Some("s1"))
            .await
            .unwrap();
        assert_eq!(outcome.strategy, Strategy::Cache);
        assert_eq!(sessions.load("s1").unwrap().last_page_number, 20);
    }

    #[tokio::test]
    async fn test_session_cursor_needs_matching_page_geometry() {
        let (service, _, _) = service(300, 100);

        let first = service
            .search(&request("parentIdentifier=cci-ozone&startPage=11"), Some("s1"))
            .await
            .unwrap();
        assert_eq!(first.hits[0].id, "g00100");

        // Same neighbouring page number, twice the page size.
        let resized = service
            .search(
                &request("parentIdentifier=cci-ozone&startPage=12&maximumRecords=20"),
                Some("s1"),
            )
            .await
            .unwrap();
        assert_ne!(resized.strategy, Strategy::Session);
        assert_eq!(resized.hits.len(), 20);
        assert_eq!(resized.hits[0].id, "g00220");

        // Page 12 of size 20 ended at 240; record 255 is on page 13 but not
        // where that page starts.
        let shifted = service
            .search(
                &request("parentIdentifier=cci-ozone&startRecord=255&maximumRecords=20"),
                Some("s1"),
            )
            .await
            .unwrap();
        assert_ne!(shifted.strategy, Strategy::Session);
        assert_eq!(shifted.hits[0].id, "g00254");

        let next = service
            .search(
                &request("parentIdentifier=cci-ozone&startRecord=275&maximumRecords=20"),
                Some("s1"),
            )
            .await
            .unwrap();
        assert_eq!(next.strategy, Strategy::Session);
        assert_eq!(next.hits[0].id, "g00274");
    }

    #[tokio::test]
    async fn test_unknown_parent_fails_before_counting() {
        let (service, backend, _) = service(5, 100);
        let err = service
            .search(&request("parentIdentifier=nope"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(backend.calls().counts.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
