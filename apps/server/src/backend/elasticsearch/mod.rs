//! Elasticsearch backend over the REST API.

pub mod dsl;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;

use super::{
    map_transport_error, observe_call, BackendQuery, Hit, SearchBackend, SearchResponse,
    SearchTarget, TotalHits,
};
use crate::config::ElasticsearchConfig;
use crate::{Error, Result};

const BACKEND_NAME: &str = "elasticsearch";
const SCROLL_KEEP_ALIVE: &str = "2m";

#[derive(Clone)]
pub struct ElasticsearchBackend {
    client: Client,
    config: Arc<ElasticsearchConfig>,
    random_access_ceiling: u64,
}

impl ElasticsearchBackend {
    pub fn new(config: ElasticsearchConfig, random_access_ceiling: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build Elasticsearch client: {}", e)))?;

        Ok(Self {
            client,
            config: Arc::new(config),
            random_access_ceiling,
        })
    }

    fn index(&self, target: SearchTarget) -> &str {
        match target {
            SearchTarget::Granules => &self.config.granule_index,
            SearchTarget::Collections => &self.config.collection_index,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.api_key {
            Some(key) => builder.header("Authorization", format!("ApiKey {}", key)),
            None => builder,
        }
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &JsonValue,
        operation: &str,
    ) -> Result<T> {
        let response = self
            .request(reqwest::Method::POST, url)
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport_error(BACKEND_NAME, operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text, operation));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| map_transport_error(BACKEND_NAME, operation, e))
    }

    async fn scroll_next(&self, scroll_id: &str) -> Result<dsl::SearchResponseBody> {
        let url = self.url("_search/scroll");
        self.post_json(
            &url,
            &json!({ "scroll": SCROLL_KEEP_ALIVE, "scroll_id": scroll_id }),
            "scroll",
        )
        .await
    }

    /// Release a scroll context. Failures are ignored; the context expires
    /// after the keep-alive.
    async fn clear_scroll(&self, scroll_id: &str) {
        let url = self.url("_search/scroll");
        let result = self
            .request(reqwest::Method::DELETE, &url)
            .json(&json!({ "scroll_id": [scroll_id] }))
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "Failed to clear Elasticsearch scroll context");
        }
    }
}

fn map_status(status: StatusCode, body: &str, operation: &str) -> Error {
    if status == StatusCode::BAD_REQUEST && body.contains("Result window is too large") {
        return Error::ResultWindowTooLarge(format!("{} rejected by Elasticsearch", operation));
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Error::BackendUnavailable(format!(
            "Elasticsearch {} failed with status {}",
            operation, status
        ));
    }
    let snippet: String = body.chars().take(300).collect();
    Error::Backend(format!(
        "Elasticsearch {} failed with status {}: {}",
        operation, status, snippet
    ))
}

/// Stream every hit of `query` through the scroll API, in sort order.
fn scroll_stream(
    backend: ElasticsearchBackend,
    query: BackendQuery,
    chunk_size: usize,
) -> impl Stream<Item = Result<Hit>> + Send + 'static {
    try_stream! {
        let started = Instant::now();
        let url = backend.url(&format!(
            "{}/_search?scroll={}",
            backend.index(query.target),
            SCROLL_KEEP_ALIVE
        ));
        let body = dsl::scroll_body(&query, chunk_size);

        let mut page: dsl::SearchResponseBody = backend.post_json(&url, &body, "scan").await?;
        let mut scroll_id = page.scroll_id.take();
        let mut scanned: u64 = 0;

        loop {
            if page.hits.hits.is_empty() {
                break;
            }
            for hit in std::mem::take(&mut page.hits.hits) {
                scanned += 1;
                yield Hit::from(hit);
            }
            let Some(id) = scroll_id.clone() else {
                break;
            };
            let next = backend.scroll_next(&id).await;
            if next.is_err() {
                backend.clear_scroll(&id).await;
            }
            page = next?;
            if let Some(next_id) = page.scroll_id.take() {
                scroll_id = Some(next_id);
            }
        }

        if let Some(id) = scroll_id {
            backend.clear_scroll(&id).await;
        }

        tracing::debug!(
            index = backend.index(query.target),
            documents = scanned,
            duration_ms = started.elapsed().as_millis() as u64,
            "Elasticsearch scan finished"
        );
    }
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn random_access_ceiling(&self) -> Option<u64> {
        Some(self.random_access_ceiling)
    }

    async fn search(&self, query: &BackendQuery) -> Result<SearchResponse> {
        let started = Instant::now();
        let url = self.url(&format!("{}/_search", self.index(query.target)));

        let result = self
            .post_json::<dsl::SearchResponseBody>(&url, &dsl::search_body(query), "search")
            .await
            .map(|body| SearchResponse {
                total: body
                    .hits
                    .total
                    .map(dsl::TotalBody::into_total)
                    .unwrap_or_else(|| TotalHits::exact(0)),
                hits: body.hits.hits.into_iter().map(Hit::from).collect(),
            });

        observe_call(BACKEND_NAME, "search", started, &result);
        result
    }

    async fn count(&self, query: &BackendQuery) -> Result<u64> {
        let started = Instant::now();
        let url = self.url(&format!("{}/_count", self.index(query.target)));

        let result = self
            .post_json::<dsl::CountResponseBody>(&url, &dsl::count_body(query), "count")
            .await
            .map(|body| body.count);

        observe_call(BACKEND_NAME, "count", started, &result);
        result
    }

    fn scan(&self, query: BackendQuery, chunk_size: usize) -> BoxStream<'static, Result<Hit>> {
        Box::pin(scroll_stream(self.clone(), query, chunk_size))
    }

    async fn get(&self, target: SearchTarget, id: &str) -> Result<Option<JsonValue>> {
        let started = Instant::now();
        let url = self.url(&format!(
            "{}/_doc/{}",
            self.index(target),
            urlencoding::encode(id)
        ));

        let result = async {
            let response = self
                .request(reqwest::Method::GET, &url)
                .send()
                .await
                .map_err(|e| map_transport_error(BACKEND_NAME, "get", e))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(map_status(status, &text, "get"));
            }

            let body: dsl::GetResponseBody = response
                .json()
                .await
                .map_err(|e| map_transport_error(BACKEND_NAME, "get", e))?;
            Ok(if body.found { body.source } else { None })
        }
        .await;

        observe_call(BACKEND_NAME, "get", started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let window = map_status(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"root_cause":[{"reason":"Result window is too large, from + size must be less than or equal to: [10000]"}]}}"#,
            "search",
        );
        assert!(matches!(window, Error::ResultWindowTooLarge(_)));

        let unavailable = map_status(StatusCode::SERVICE_UNAVAILABLE, "", "count");
        assert!(unavailable.is_retryable());

        let rejected = map_status(StatusCode::BAD_REQUEST, "parsing_exception", "search");
        assert!(matches!(rejected, Error::Backend(_)));
    }

    #[tokio::test]
    async fn test_failed_scroll_releases_context() {
        use axum::{http::StatusCode as HttpStatus, routing::post, Json, Router};
        use futures::StreamExt;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cleared = Arc::new(AtomicUsize::new(0));
        let cleared_by_server = cleared.clone();
        let app = Router::new()
            .route(
                "/opensearch-files/_search",
                post(|| async {
                    Json(json!({
                        "_scroll_id": "scroll-1",
                        "hits": { "hits": [{ "_id": "a", "_source": {}, "sort": ["/dir", "a.nc"] }] }
                    }))
                }),
            )
            .route(
                "/_search/scroll",
                post(|| async { HttpStatus::INTERNAL_SERVER_ERROR }).delete(move || {
                    let cleared = cleared_by_server.clone();
                    async move {
                        cleared.fetch_add(1, Ordering::SeqCst);
                        Json(json!({ "succeeded": true }))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let config = ElasticsearchConfig {
            url: format!("http://{}", address),
            ..ElasticsearchConfig::default()
        };
        let backend = ElasticsearchBackend::new(config, 10_000).unwrap();
        let results: Vec<Result<Hit>> = backend
            .scan(BackendQuery::new(SearchTarget::Granules), 100)
            .collect()
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().id, "a");
        assert!(matches!(results[1], Err(Error::BackendUnavailable(_))));
        assert_eq!(cleared.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_index_per_target() {
        let backend = ElasticsearchBackend::new(ElasticsearchConfig::default(), 10_000).unwrap();
        assert_eq!(backend.index(SearchTarget::Granules), "opensearch-files");
        assert_eq!(
            backend.index(SearchTarget::Collections),
            "opensearch-collections"
        );
        assert_eq!(
            backend.url("opensearch-files/_search"),
            "http://localhost:9200/opensearch-files/_search"
        );
    }
}
