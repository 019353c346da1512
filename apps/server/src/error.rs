//! Error types for the OpenSearch gateway

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported response type: {requested}")]
    UnsupportedResponseType {
        requested: String,
        supported: Vec<&'static str>,
    },

    /// The backend refused an offset request beyond its random-access window.
    /// Recovered by the search service; never sent to clients.
    #[error("Result window is too large: {0}")]
    ResultWindowTooLarge(String),

    #[error("Search backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Search backend timed out: {0}")]
    Timeout(String),

    #[error("Search backend error: {0}")]
    Backend(String),

    #[error("Cache generation failed: {0}")]
    CacheGeneration(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Bounding box with fewer than four coordinates.
    pub fn invalid_bounding_box(value: &str) -> Self {
        Error::invalid_parameter(
            "bbox",
            format!(
                "expected 'west,south,east,north' with 4 coordinates, got '{}'",
                value
            ),
        )
    }

    pub fn unparseable_date(parameter: &str, value: &str) -> Self {
        Error::invalid_parameter(parameter, format!("could not parse date '{}'", value))
    }

    /// Whether a failed backend call is worth repeating once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_) | Error::Timeout(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UnsupportedResponseType { .. } => StatusCode::NOT_ACCEPTABLE,
            Error::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Backend(_) => StatusCode::BAD_GATEWAY,
            Error::ResultWindowTooLarge(_)
            | Error::CacheGeneration(_)
            | Error::Internal(_)
            | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Error::InvalidParameter { .. } => "invalid-parameter",
            Error::NotFound(_) => "not-found",
            Error::UnsupportedResponseType { .. } => "unsupported-response-type",
            Error::BackendUnavailable(_) => "backend-unavailable",
            Error::Timeout(_) => "backend-timeout",
            Error::Backend(_) => "backend-error",
            _ => "internal-error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Error::ResultWindowTooLarge(_)
            | Error::CacheGeneration(_)
            | Error::Internal(_)
            | Error::Other(_) => {
                tracing::error!("Internal error: {}", self);
                "Internal server error".to_string()
            }
            Error::BackendUnavailable(_) | Error::Timeout(_) | Error::Backend(_) => {
                tracing::warn!(status = status.as_u16(), "Backend failure: {}", self);
                self.to_string()
            }
            _ => self.to_string(),
        };

        let mut body = json!({
            "status": status.as_u16(),
            "error": self.code(),
            "message": message,
        });

        match &self {
            Error::InvalidParameter { parameter, .. } => {
                body["parameter"] = json!(parameter);
            }
            Error::UnsupportedResponseType { supported, .. } => {
                body["supported"] = json!(supported);
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        response
    }
}
