//! Application state shared by all handlers

use std::sync::Arc;

use crate::backend::elasticsearch::ElasticsearchBackend;
use crate::backend::solr::SolrBackend;
use crate::backend::SearchBackend;
use crate::config::Config;
use crate::paging::{DeepPaginationCache, SessionStore};
use crate::services::SearchService;
use crate::Result;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub search_service: Arc<SearchService>,
    pub sessions: Arc<SessionStore>,
    pub cache: DeepPaginationCache,
}

impl AppState {
    /// Connect the configured backends and build the services.
    pub fn new(config: Config) -> Result<Self> {
        let elasticsearch: Arc<dyn SearchBackend> = Arc::new(ElasticsearchBackend::new(
            config.elasticsearch.clone(),
            config.paging.random_access_ceiling,
        )?);

        let solr: Option<Arc<dyn SearchBackend>> = if config.solr.enabled {
            Some(Arc::new(SolrBackend::new(config.solr.clone())?))
        } else {
            None
        };

        tracing::info!(
            elasticsearch_url = %config.elasticsearch.url,
            granule_index = %config.elasticsearch.granule_index,
            solr_enabled = config.solr.enabled,
            "Search backends configured"
        );

        Ok(Self::with_backends(config, elasticsearch, solr))
    }

    /// State over the given backends.
    pub fn with_backends(
        config: Config,
        elasticsearch: Arc<dyn SearchBackend>,
        solr: Option<Arc<dyn SearchBackend>>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(
            config.session.max_sessions,
            config.session.ttl(),
        ));
        let cache = DeepPaginationCache::new(&config.paging);
        let search_service = Arc::new(SearchService::new(
            &config,
            elasticsearch,
            solr,
            cache.clone(),
            sessions.clone(),
        ));

        tracing::debug!(
            collection_routes = search_service.registry().len(),
            cache_page_size = cache.page_size(),
            "Search service initialized"
        );

        Self {
            config: Arc::new(config),
            search_service,
            sessions,
            cache,
        }
    }
}
