//! Backend-neutral query model.
//!
//! A `BackendQuery` is assembled by a `FacetSet` and rendered into a wire
//! format by each backend (`elasticsearch::dsl`, `solr::params`). Queries are
//! owned values: every request clones a fresh copy of its base template.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Ordered sort-key tuple identifying a document's position in the sorted
/// result order (granules: directory, then file name).
pub type SortKey = Vec<JsonValue>;

/// Index a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTarget {
    Granules,
    Collections,
}

impl SearchTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granules => "granules",
            Self::Collections => "collections",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    /// Field must be present.
    Exists { field: String },
    /// Full-text match; all terms required.
    FullText { text: String },
    /// Exact phrase match on a field.
    Phrase { field: String, value: String },
    /// Phrase match on any of the values.
    AnyPhrase { field: String, values: Vec<String> },
    /// Exact (non-analyzed) equality.
    Term { field: String, value: String },
    /// Document identifier equality.
    IdEquals { id: String },
    /// Field value starts with `value`.
    Prefix { field: String, value: String },
    GeoBoundingBox { field: String, bbox: BoundingBox },
    /// Inclusive range over normalized ISO-8601 instants.
    DateRange {
        field: String,
        gte: Option<String>,
        lte: Option<String>,
    },
}

impl Clause {
    /// Clauses that only restrict the result set and never affect scoring.
    pub fn is_filter(&self) -> bool {
        matches!(self, Self::GeoBoundingBox { .. } | Self::DateRange { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendQuery {
    pub target: SearchTarget,
    pub clauses: Vec<Clause>,
    pub sort: Vec<SortField>,
    pub search_after: Option<SortKey>,
    pub from: Option<u64>,
    pub size: Option<u32>,
    /// Sort directions were flipped to walk backwards from `search_after`.
    pub reversed: bool,
}

impl BackendQuery {
    pub fn new(target: SearchTarget) -> Self {
        Self {
            target,
            clauses: Vec::new(),
            sort: Vec::new(),
            search_after: None,
            from: None,
            size: None,
            reversed: false,
        }
    }

    pub fn with_clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            order,
        });
        self
    }

    pub fn push_clause(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    /// Offset/limit paging.
    pub fn with_page(mut self, from: u64, size: u32) -> Self {
        self.search_after = None;
        self.from = if from > 0 { Some(from) } else { None };
        self.size = Some(size);
        self
    }

    /// Cursor paging. With `reverse` every sort direction is inverted so the
    /// backend walks backwards from `key`; the caller reverses the page.
    pub fn with_cursor(mut self, key: SortKey, reverse: bool, size: u32) -> Self {
        if reverse != self.reversed {
            for sort in &mut self.sort {
                sort.order = sort.order.reversed();
            }
            self.reversed = reverse;
        }
        self.search_after = Some(key);
        self.from = None;
        self.size = Some(size);
        self
    }

    /// Copy with paging removed, as used for counting and full scans.
    pub fn without_paging(&self) -> Self {
        let mut query = self.clone();
        query.search_after = None;
        query.from = None;
        query.size = None;
        query
    }

    /// Highest document position (exclusive) an offset request touches.
    pub fn window_end(&self) -> u64 {
        self.from.unwrap_or(0) + self.size.map(u64::from).unwrap_or(0)
    }
}
