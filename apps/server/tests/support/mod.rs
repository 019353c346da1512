#![allow(dead_code)]

pub mod fixtures;

use anyhow::Context as _;
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    Router,
};
use opensearch_gateway::{
    api::create_router,
    backend::memory::{MemoryBackend, MemoryDocument},
    AppState, Config,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt as _;
use url::Url;

pub use fixtures::*;

/// Window the in-memory document store enforces, as a stock Elasticsearch
/// index does.
pub const BACKEND_CEILING: u64 = 10_000;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub elasticsearch: MemoryBackend,
    pub solr: MemoryBackend,
}

impl TestApp {
    pub fn new(granules: Vec<MemoryDocument>, collections: Vec<MemoryDocument>) -> Self {
        Self::new_with_config(granules, collections, Vec::new(), |_| {})
    }

    pub fn new_with_config(
        granules: Vec<MemoryDocument>,
        collections: Vec<MemoryDocument>,
        datasets: Vec<MemoryDocument>,
        configure: impl FnOnce(&mut Config),
    ) -> Self {
        let mut config = Config::default();
        configure(&mut config);

        let elasticsearch = MemoryBackend::new(granules, collections, Some(BACKEND_CEILING));
        let solr = MemoryBackend::new(datasets, Vec::new(), None);
        let solr_backend = config
            .solr
            .enabled
            .then(|| Arc::new(solr.clone()) as Arc<dyn opensearch_gateway::backend::SearchBackend>);

        let state = AppState::with_backends(config, Arc::new(elasticsearch.clone()), solr_backend);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            elasticsearch,
            solr,
        }
    }

    pub async fn get(&self, path_and_query: &str) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        self.get_with_headers(path_and_query, &[]).await
    }

    pub async fn get_with_headers(
        &self,
        path_and_query: &str,
        extra_headers: &[(&str, &str)],
    ) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        let mut request = Request::builder()
            .uri(path_and_query)
            .header("host", "example.org")
            .body(Body::empty())
            .context("build request")?;

        for (name, value) in extra_headers {
            request.headers_mut().insert(
                name.parse::<HeaderName>().context("parse header name")?,
                value.parse::<HeaderValue>().context("parse header value")?,
            );
        }

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("dispatch request")?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("read response body")?;

        Ok((status, headers, body))
    }

    /// GET expecting a JSON body.
    pub async fn get_json(&self, path_and_query: &str) -> anyhow::Result<(StatusCode, Value)> {
        self.get_json_with_headers(path_and_query, &[]).await
    }

    pub async fn get_json_with_headers(
        &self,
        path_and_query: &str,
        extra_headers: &[(&str, &str)],
    ) -> anyhow::Result<(StatusCode, Value)> {
        let (status, _headers, body) = self.get_with_headers(path_and_query, extra_headers).await?;
        let value = serde_json::from_slice(&body).with_context(|| {
            format!(
                "parse JSON body of {path_and_query}: {}",
                String::from_utf8_lossy(&body)
            )
        })?;
        Ok((status, value))
    }
}

/// A client that keeps the session cookie handed out by the server.
pub struct Browser<'a> {
    app: &'a TestApp,
    cookie: Option<String>,
}

impl<'a> Browser<'a> {
    pub fn new(app: &'a TestApp) -> Self {
        Self { app, cookie: None }
    }

    pub async fn get_json(&mut self, path_and_query: &str) -> anyhow::Result<(StatusCode, Value)> {
        let cookie = self.cookie.clone();
        let headers: Vec<(&str, &str)> = cookie
            .as_deref()
            .map(|c| vec![("cookie", c)])
            .unwrap_or_default();

        let (status, response_headers, body) =
            self.app.get_with_headers(path_and_query, &headers).await?;

        if let Some(set_cookie) = response_headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
        {
            let pair = set_cookie.split(';').next().unwrap_or_default().to_string();
            self.cookie = Some(pair);
        }

        let value = serde_json::from_slice(&body).context("parse JSON body")?;
        Ok((status, value))
    }
}

pub fn features(document: &Value) -> &[Value] {
    document
        .get("features")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// `identifier` property of every feature, in order.
pub fn identifiers(document: &Value) -> Vec<String> {
    features(document)
        .iter()
        .filter_map(|f| f.pointer("/properties/identifier").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

pub fn total_results(document: &Value) -> u64 {
    document
        .get("totalResults")
        .and_then(Value::as_u64)
        .unwrap_or_default()
}

pub fn link(document: &Value, rel: &str) -> Option<String> {
    document
        .get("links")
        .and_then(Value::as_array)?
        .iter()
        .find(|l| l.get("rel").and_then(Value::as_str) == Some(rel))
        .and_then(|l| l.get("href").and_then(Value::as_str))
        .map(str::to_string)
}

pub fn link_rels(document: &Value) -> Vec<String> {
    document
        .get("links")
        .and_then(Value::as_array)
        .map(|links| {
            links
                .iter()
                .filter_map(|l| l.get("rel").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Path and query of an absolute link, ready to replay against the router.
pub fn path_and_query(href: &str) -> anyhow::Result<String> {
    let parsed = Url::parse(href).context("parse link URL")?;
    let mut out = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        out.push('?');
        out.push_str(query);
    }
    Ok(out)
}

pub fn query_param(href: &str, name: &str) -> Option<String> {
    let parsed = Url::parse(href).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
