//! Paging beyond the backend's random-access window
//!
//! - [`request`] - request parameters, page size and offset arithmetic
//! - [`cursor`] - sort-key cursors and the client-facing token
//! - [`session`] - cursor reuse between adjacent pages of one session
//! - [`deep_cache`] - materialized result sets for arbitrary deep pages

pub mod cursor;
pub mod deep_cache;
pub mod request;
pub mod session;

pub use cursor::CursorToken;
pub use deep_cache::{cache_key, CacheLookup, DeepPaginationCache};
pub use request::{Addressing, SearchRequest};
pub use session::{SessionPagingState, SessionStore};
