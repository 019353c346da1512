//! Sort-key cursors.
//!
//! A cursor is the sort-key tuple the backend attached to a hit. It is handed
//! back verbatim as `search_after`; only the backend that produced it can
//! interpret it. [`CursorToken`] is the form given to clients in `next` links.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::backend::{Hit, SortKey};
use crate::{Error, Result};

/// Sort key of a hit, if the backend supports cursor paging.
pub fn encode(hit: &Hit) -> Option<SortKey> {
    hit.sort.clone().filter(|key| !key.is_empty())
}

/// Whether a cursor taken from `last_page` can serve `requested_page`.
pub fn is_contiguous(requested_page: u64, last_page: u64) -> bool {
    requested_page.abs_diff(last_page) <= 1
}

/// Opaque, URL-safe rendering of a sort key: base64url (no padding) of the
/// JSON tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorToken(String);

impl CursorToken {
    pub fn encode(key: &SortKey) -> Self {
        let raw = serde_json::to_vec(key).unwrap_or_default();
        Self(URL_SAFE_NO_PAD.encode(raw))
    }

    pub fn decode(token: &str) -> Result<SortKey> {
        let invalid = || Error::invalid_parameter("cursor", "malformed continuation token");

        let raw = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| invalid())?;
        let key: SortKey = serde_json::from_slice(&raw).map_err(|_| invalid())?;
        if key.is_empty() {
            return Err(invalid());
        }
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CursorToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contiguity() {
        assert!(is_contiguous(5, 5));
        assert!(is_contiguous(6, 5));
        assert!(is_contiguous(4, 5));
        assert!(!is_contiguous(7, 5));
        assert!(!is_contiguous(10, 5));
        assert!(!is_contiguous(0, 5));
    }

    #[test]
    fn test_encode_hit() {
        let hit = Hit {
            id: "a".into(),
            sort: Some(vec![json!("/neodc/esacci/cloud"), json!("f.nc")]),
            source: json!({}),
        };
        assert_eq!(
            encode(&hit),
            Some(vec![json!("/neodc/esacci/cloud"), json!("f.nc")])
        );

        let unsorted = Hit { sort: None, ..hit };
        assert_eq!(encode(&unsorted), None);
    }

    #[test]
    fn test_token_is_url_safe_and_reversible() {
        let key = vec![json!("/badc/cmip5/data/a?b"), json!("file+1.nc"), json!(42)];
        let token = CursorToken::encode(&key);
        assert!(token
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(CursorToken::decode(token.as_str()).unwrap(), key);
    }

    #[test]
    fn test_malformed_token() {
        for token in ["not base64!", "bm90IGpzb24", "W10"] {
            match CursorToken::decode(token) {
                Err(Error::InvalidParameter { parameter, .. }) => assert_eq!(parameter, "cursor"),
                other => panic!("unexpected result for {}: {:?}", token, other),
            }
        }
    }
}
