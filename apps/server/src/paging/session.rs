//! Per-session continuation state for cursor reuse between adjacent pages.
//!
//! Document-search cursors only walk forward for a given sort. To serve the
//! previous page the session remembers the first key shown on the current
//! page and walks backwards from it with every sort direction flipped.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::cursor;
use super::request::SearchRequest;
use crate::backend::{Hit, SortKey};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPagingState {
    pub last_query_params: BTreeMap<String, Vec<String>>,
    pub last_page_number: u64,
    /// Page size and zero-based offset of the last page. Cursors only
    /// line up with a request that starts exactly one page away.
    pub page_size: u32,
    pub last_offset: u64,
    /// Sort key of the first displayed hit of the last page.
    pub before_key: Option<SortKey>,
    /// Sort key of the last displayed hit of the last page.
    pub after_key: Option<SortKey>,
    /// Cursor the last page was fetched with.
    pub current_key: Option<SortKey>,
    /// The last page was fetched walking backwards.
    pub descending: bool,
}

/// Cursor to fetch `request` with, and whether to walk backwards from it.
/// `(None, false)` whenever the stored state cannot serve the request.
pub fn resolve(state: Option<&SessionPagingState>, request: &SearchRequest) -> (Option<SortKey>, bool) {
    let requested = request.page_number();
    if requested <= 1 {
        return (None, false);
    }
    let Some(state) = state else {
        return (None, false);
    };
    if !cursor::is_contiguous(requested, state.last_page_number) {
        return (None, false);
    }
    if state.page_size != request.page_size
        || state.last_query_params != request.normalized_params()
    {
        return (None, false);
    }

    let size = u64::from(request.page_size);
    let offset = request.offset();
    let (key, reverse) = if offset == state.last_offset + size {
        (state.after_key.clone(), false)
    } else if offset + size == state.last_offset {
        (state.before_key.clone(), true)
    } else if offset == state.last_offset {
        (state.current_key.clone(), state.descending)
    } else {
        return (None, false);
    };

    match key {
        Some(key) => (Some(key), reverse),
        None => (None, false),
    }
}

impl SessionPagingState {
    /// State after displaying `hits` (in display order) for `request`.
    /// `cursor` and `reverse` are what the page was fetched with.
    pub fn record(
        request: &SearchRequest,
        hits: &[Hit],
        cursor: Option<SortKey>,
        reverse: bool,
    ) -> Self {
        Self {
            last_query_params: request.normalized_params(),
            last_page_number: request.page_number(),
            page_size: request.page_size,
            last_offset: request.offset(),
            before_key: hits.first().and_then(cursor::encode),
            after_key: hits.last().and_then(cursor::encode),
            descending: reverse && cursor.is_some(),
            current_key: cursor,
        }
    }
}

struct StoredState {
    state: SessionPagingState,
    stored_at: Instant,
}

/// In-process session states, bounded in count and age.
///
/// Best-effort: concurrent requests on one session may overwrite each other,
/// which only costs a cursor reuse.
pub struct SessionStore {
    entries: Mutex<LruCache<String, StoredState>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(max_sessions: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn load(&self, session_id: &str) -> Option<SessionPagingState> {
        let mut entries = self.entries.lock().ok()?;
        let expired = match entries.get(session_id) {
            Some(stored) if stored.stored_at.elapsed() <= self.ttl => {
                return Some(stored.state.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(session_id);
        }
        None
    }

    pub fn save(&self, session_id: &str, state: SessionPagingState) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.put(
                    session_id.to_string(),
                    StoredState {
                        state,
                        stored_at: Instant::now(),
                    },
                );
            }
            Err(_) => tracing::warn!("Session store lock poisoned; paging state dropped"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
