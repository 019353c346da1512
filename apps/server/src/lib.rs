//! OpenSearch Gateway
//!
//! A faceted discovery API over file-level and dataset-level metadata with:
//! - Facet-driven query building for Elasticsearch and Solr backends
//! - Paging past the backend's random-access window via continuation
//!   cursors, per-session cursor reuse and a materialized result cache
//! - GeoJSON and Atom result documents with navigation links

#![allow(
    clippy::too_many_arguments,      // Paging helpers take the full request context
    clippy::large_enum_variant,      // Cache slots hold either a receiver or a page set
)]

pub mod api;
pub mod backend;
pub mod collections;
pub mod config;
pub mod error;
pub mod facets;
pub mod logging;
pub mod metrics;
pub mod paging;
pub mod request_context;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
