//! Response format negotiation
//!
//! Selection order:
//! 1. `httpAccept` query parameter
//! 2. `Accept` header (first supported media range; wildcards select the default)
//! 3. Configured default
//!
//! An explicit request for an unsupported type is answered with 406.

use axum::http::{header, HeaderMap};

use crate::{Error, Result};

/// Media types accepted in `httpAccept` and `Accept`.
pub const SUPPORTED_TYPES: &[&str] = &[
    "application/geo+json",
    "application/atom+xml",
    "application/json",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    GeoJson,
    Atom,
}

impl ResponseFormat {
    /// Parse a media type, ignoring parameters such as `charset`.
    /// `application/json` is an alias of GeoJSON.
    pub fn parse(s: &str) -> Option<Self> {
        let mime_type = s.split(';').next().unwrap_or(s).trim();

        match mime_type.to_ascii_lowercase().as_str() {
            "application/geo+json" | "application/json" | "geojson" | "json" => {
                Some(Self::GeoJson)
            }
            "application/atom+xml" | "atom" => Some(Self::Atom),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::GeoJson => "application/geo+json",
            Self::Atom => "application/atom+xml",
        }
    }

    pub fn content_type(&self) -> String {
        format!("{}; charset=utf-8", self.mime_type())
    }

    /// Pick the response format for a request.
    ///
    /// # Errors
    /// `UnsupportedResponseType` when `httpAccept` names an unsupported type,
    /// or when the `Accept` header lists no supported type and no wildcard.
    pub fn negotiate(
        http_accept: Option<&str>,
        headers: &HeaderMap,
        default_type: &str,
    ) -> Result<Self> {
        let default = Self::parse(default_type).unwrap_or_default();

        if let Some(requested) = http_accept {
            return Self::parse(requested).ok_or_else(|| unsupported(requested));
        }

        let accept = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let Some(accept) = accept else {
            return Ok(default);
        };

        for range in accept.split(',') {
            let mut parts = range.split(';');
            let media = parts.next().unwrap_or("").trim();
            let refused = parts.any(|p| matches!(p.trim(), "q=0" | "q=0.0" | "q=0.00" | "q=0.000"));
            if refused || media.is_empty() {
                continue;
            }
            if media == "*/*" || media.eq_ignore_ascii_case("application/*") {
                return Ok(default);
            }
            if let Some(format) = Self::parse(media) {
                return Ok(format);
            }
        }

        Err(unsupported(accept))
    }
}

fn unsupported(requested: &str) -> Error {
    Error::UnsupportedResponseType {
        requested: requested.to_string(),
        supported: SUPPORTED_TYPES.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const DEFAULT: &str = "application/geo+json";

    fn accept(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            ResponseFormat::parse("application/geo+json"),
            Some(ResponseFormat::GeoJson)
        );
        assert_eq!(
            ResponseFormat::parse("application/json; charset=utf-8"),
            Some(ResponseFormat::GeoJson)
        );
        assert_eq!(
            ResponseFormat::parse("Application/Atom+XML"),
            Some(ResponseFormat::Atom)
        );
        assert_eq!(ResponseFormat::parse("text/csv"), None);
    }

    #[test]
    fn test_http_accept_wins_over_header() {
        let format = ResponseFormat::negotiate(
            Some("application/atom+xml"),
            &accept("application/geo+json"),
            DEFAULT,
        )
        .unwrap();
        assert_eq!(format, ResponseFormat::Atom);
    }

    #[test]
    fn test_unsupported_http_accept_is_406() {
        let err = ResponseFormat::negotiate(Some("text/csv"), &HeaderMap::new(), DEFAULT)
            .unwrap_err();
        match err {
            Error::UnsupportedResponseType {
                requested,
                supported,
            } => {
                assert_eq!(requested, "text/csv");
                assert!(supported.contains(&"application/atom+xml"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_accept_header() {
        assert_eq!(
            ResponseFormat::negotiate(None, &accept("application/atom+xml"), DEFAULT).unwrap(),
            ResponseFormat::Atom
        );
        assert_eq!(
            ResponseFormat::negotiate(
                None,
                &accept("text/html,application/xhtml+xml,*/*;q=0.8"),
                DEFAULT
            )
            .unwrap(),
            ResponseFormat::GeoJson
        );
        assert_eq!(
            ResponseFormat::negotiate(None, &accept("text/csv, application/atom+xml;q=0.5"), DEFAULT)
                .unwrap(),
            ResponseFormat::Atom
        );
        assert!(ResponseFormat::negotiate(None, &accept("text/csv"), DEFAULT).is_err());
        assert!(
            ResponseFormat::negotiate(None, &accept("application/atom+xml;q=0"), DEFAULT).is_err()
        );
    }

    #[test]
    fn test_default_when_nothing_requested() {
        assert_eq!(
            ResponseFormat::negotiate(None, &HeaderMap::new(), "application/atom+xml").unwrap(),
            ResponseFormat::Atom
        );
    }
}
