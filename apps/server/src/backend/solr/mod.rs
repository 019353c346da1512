//! Solr backend over the `select` / `get` request handlers.

pub mod params;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;

use super::{
    map_transport_error, observe_call, BackendQuery, Hit, SearchBackend, SearchResponse,
    SearchTarget, TotalHits,
};
use crate::config::SolrConfig;
use crate::{Error, Result};

const BACKEND_NAME: &str = "solr";

#[derive(Debug, Deserialize)]
struct SelectResponse {
    response: ResultBody,
    #[serde(rename = "nextCursorMark")]
    next_cursor_mark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultBody {
    #[serde(rename = "numFound")]
    num_found: u64,
    #[serde(default)]
    docs: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RealTimeGetResponse {
    doc: Option<JsonValue>,
}

fn doc_to_hit(doc: JsonValue) -> Hit {
    let id = match doc.get(params::UNIQUE_KEY) {
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Hit {
        id,
        sort: None,
        source: doc,
    }
}

#[derive(Clone)]
pub struct SolrBackend {
    client: Client,
    config: Arc<SolrConfig>,
}

impl SolrBackend {
    pub fn new(config: SolrConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build Solr client: {}", e)))?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    fn url(&self, handler: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.url.trim_end_matches('/'),
            self.config.core,
            handler
        )
    }

    async fn select(&self, params: &[(String, String)], operation: &str) -> Result<SelectResponse> {
        let response = self
            .client
            .get(self.url("select"))
            .query(params)
            .send()
            .await
            .map_err(|e| map_transport_error(BACKEND_NAME, operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text, operation));
        }

        response
            .json()
            .await
            .map_err(|e| map_transport_error(BACKEND_NAME, operation, e))
    }
}

fn map_status(status: StatusCode, body: &str, operation: &str) -> Error {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Error::BackendUnavailable(format!(
            "Solr {} failed with status {}",
            operation, status
        ));
    }
    let snippet: String = body.chars().take(300).collect();
    Error::Backend(format!(
        "Solr {} failed with status {}: {}",
        operation, status, snippet
    ))
}

/// Walk the full result set with cursorMark paging until the mark stops moving.
fn cursor_stream(
    backend: SolrBackend,
    query: BackendQuery,
    rows: usize,
) -> impl Stream<Item = Result<Hit>> + Send + 'static {
    try_stream! {
        let mut cursor_mark = "*".to_string();
        loop {
            let params = params::cursor_params(&query, &cursor_mark, rows);
            let batch = backend.select(&params, "scan").await?;

            let next = batch.next_cursor_mark.clone();
            for doc in batch.response.docs {
                yield doc_to_hit(doc);
            }

            match next {
                Some(next) if next != cursor_mark => cursor_mark = next,
                _ => break,
            }
        }
    }
}

#[async_trait]
impl SearchBackend for SolrBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn random_access_ceiling(&self) -> Option<u64> {
        None
    }

    async fn search(&self, query: &BackendQuery) -> Result<SearchResponse> {
        let started = Instant::now();
        let result = self
            .select(&params::select_params(query), "search")
            .await
            .map(|body| SearchResponse {
                total: TotalHits::exact(body.response.num_found),
                hits: body.response.docs.into_iter().map(doc_to_hit).collect(),
            });
        observe_call(BACKEND_NAME, "search", started, &result);
        result
    }

    async fn count(&self, query: &BackendQuery) -> Result<u64> {
        let started = Instant::now();
        let result = self
            .select(&params::count_params(query), "count")
            .await
            .map(|body| body.response.num_found);
        observe_call(BACKEND_NAME, "count", started, &result);
        result
    }

    fn scan(&self, query: BackendQuery, chunk_size: usize) -> BoxStream<'static, Result<Hit>> {
        Box::pin(cursor_stream(self.clone(), query, chunk_size))
    }

    async fn get(&self, _target: SearchTarget, id: &str) -> Result<Option<JsonValue>> {
        let started = Instant::now();

        let result = async {
            let response = self
                .client
                .get(self.url("get"))
                .query(&[("id", id), ("wt", "json")])
                .send()
                .await
                .map_err(|e| map_transport_error(BACKEND_NAME, "get", e))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(map_status(status, &text, "get"));
            }

            let body: RealTimeGetResponse = response
                .json()
                .await
                .map_err(|e| map_transport_error(BACKEND_NAME, "get", e))?;
            Ok(body.doc)
        }
        .await;

        observe_call(BACKEND_NAME, "get", started, &result);
        result
    }
}
