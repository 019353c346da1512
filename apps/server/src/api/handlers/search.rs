//! Search operation handler
//!
//! `GET {base_path}/request?<facet>=<value>&...&startPage=<n>|startRecord=<n>&maximumRecords=<n>&httpAccept=<mime>`

use axum::{
    extract::{Extension, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::{
    api::{content_negotiation::ResponseFormat, response_formatter, url as api_url},
    config::SessionConfig,
    paging::{SearchRequest, SessionStore},
    request_context::RequestContext,
    services::assembler,
    state::AppState,
    Result,
};

/// Value of the session cookie, if the client sent one.
fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn session_set_cookie(config: &SessionConfig, session_id: &str) -> Option<HeaderValue> {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        config.cookie_name, session_id, config.ttl_seconds
    );
    if config.secure_cookie {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).ok()
}

pub async fn search_handler(
    State(state): State<AppState>,
    context: Option<Extension<RequestContext>>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<Response> {
    let items: Vec<(String, String)> =
        url::form_urlencoded::parse(raw_query.as_deref().unwrap_or_default().as_bytes())
            .into_owned()
            .collect();

    let request = SearchRequest::from_items(items, &state.config.paging)?;
    let format = ResponseFormat::negotiate(
        request.http_accept.as_deref(),
        &headers,
        &state.config.response.default_type,
    )?;

    let session = &state.config.session;
    let existing_session = session_cookie(&headers, &session.cookie_name);
    let session_id = existing_session
        .clone()
        .unwrap_or_else(SessionStore::new_session_id);

    let outcome = match state.search_service.search(&request, Some(&session_id)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let request_id = context.as_ref().map(|Extension(c)| c.request_id.as_str());
            if e.status_code().is_server_error() {
                tracing::error!(request_id, error = %e, "Search failed");
            } else {
                tracing::debug!(request_id, error = %e, "Search rejected");
            }
            return Err(e);
        }
    };

    let span = tracing::Span::current();
    if let Some(parent) = request.parent_identifier() {
        span.record("search.parent_identifier", parent);
    }
    span.record("search.strategy", outcome.strategy.as_str());
    span.record("search.total_results", outcome.total.value);

    let base_url = api_url::base_url_from_headers(&headers, &state.config.server.base_path);
    let document = assembler::document(&request, &outcome, &base_url);
    let body = response_formatter::render(format, &document)?;

    let mut response = (StatusCode::OK, body).into_response();
    let response_headers = response.headers_mut();
    if let Ok(content_type) = HeaderValue::from_str(&format.content_type()) {
        response_headers.insert(header::CONTENT_TYPE, content_type);
    }
    if existing_session.is_none() {
        if let Some(cookie) = session_set_cookie(session, &session_id) {
            response_headers.insert(header::SET_COOKIE, cookie);
        }
    }

    Ok(response)
}
