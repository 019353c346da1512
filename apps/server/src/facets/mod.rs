//! Facet-driven query building
//!
//! A [`FacetSet`] is the static description of what a collection can be
//! searched by: facet names and where each lives in the index, which field
//! carries time, and how a `parentIdentifier` narrows the search. Turning a
//! request into a [`BackendQuery`] is the same for every collection; only the
//! [`QueryDialect`] differs per backend.

pub mod dates;
pub mod geo;

use crate::backend::{BackendQuery, Clause, SearchTarget, SortOrder};
use crate::paging::SearchRequest;
use crate::Result;

/// Where a facet's values live in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPath {
    /// Backend default location for the facet name.
    Default,
    Explicit(&'static str),
}

/// Field(s) the `startDate` / `endDate` parameters filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporal {
    /// Single range-typed field; both bounds apply to it.
    Range(&'static str),
    /// Separate instants. Documents overlapping the requested period match:
    /// `startDate` bounds `end`, `endDate` bounds `start`.
    Split {
        start: &'static str,
        end: &'static str,
    },
}

/// How `parentIdentifier` restricts a granule search to its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentFilter {
    None,
    /// Exact match of the identifier on the `datasetId` facet.
    DatasetId,
    /// Directory prefix match on the collection root path.
    DirectoryPrefix,
    /// Exact match of the collection root on the `project` field.
    Project,
}

/// Parameters never turned into phrase filters.
pub const EXCLUDED_FACETS: &[&str] = &[
    "uuid",
    "bbox",
    "startDate",
    "endDate",
    "title",
    "parentIdentifier",
];

/// Collection a granule search is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentCollection {
    pub identifier: String,
    /// Root path (or project name) the collection document points at.
    pub path: String,
}

#[derive(Debug)]
pub struct FacetSet {
    pub target: SearchTarget,
    pub facets: &'static [(&'static str, FieldPath)],
    pub excluded: &'static [&'static str],
    pub temporal: Temporal,
    pub parent_filter: ParentFilter,
}

/// Backend-specific parts of query building.
pub trait QueryDialect: Send + Sync {
    /// Field a facet without an explicit path is stored under.
    fn default_path(&self, facet: &str) -> String;

    /// Template every query for `target` starts from: mandatory clauses and
    /// a stable total sort order.
    fn base_query(&self, target: SearchTarget) -> BackendQuery;
}

/// Document-search engine indices: facets sit under
/// `projects.<application_id>`, granules carry an `info` block.
#[derive(Debug, Clone)]
pub struct ElasticsearchDialect {
    application_id: String,
}

impl ElasticsearchDialect {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
        }
    }
}

impl QueryDialect for ElasticsearchDialect {
    fn default_path(&self, facet: &str) -> String {
        format!("projects.{}.{}", self.application_id, facet)
    }

    fn base_query(&self, target: SearchTarget) -> BackendQuery {
        match target {
            SearchTarget::Granules => BackendQuery::new(target)
                .with_clause(Clause::Exists {
                    field: format!("projects.{}", self.application_id),
                })
                .with_clause(Clause::Exists {
                    field: "info".to_string(),
                })
                .with_sort("info.directory", SortOrder::Asc)
                .with_sort("info.name", SortOrder::Asc),
            SearchTarget::Collections => {
                BackendQuery::new(target).with_sort("collection_id", SortOrder::Asc)
            }
        }
    }
}

/// Flat Solr documents keyed by `id`.
#[derive(Debug, Clone, Default)]
pub struct SolrDialect;

impl QueryDialect for SolrDialect {
    fn default_path(&self, facet: &str) -> String {
        facet.to_string()
    }

    fn base_query(&self, target: SearchTarget) -> BackendQuery {
        BackendQuery::new(target).with_sort("id", SortOrder::Asc)
    }
}

impl FacetSet {
    /// Index field for a facet name, if the facet is known.
    pub fn field_path(&self, facet: &str, dialect: &dyn QueryDialect) -> Option<String> {
        self.facets
            .iter()
            .find(|(name, _)| *name == facet)
            .map(|(name, path)| match path {
                FieldPath::Default => dialect.default_path(name),
                FieldPath::Explicit(path) => path.to_string(),
            })
    }

    pub fn has_facet(&self, facet: &str) -> bool {
        self.facets.iter().any(|(name, _)| *name == facet)
    }

    /// Facet names a client may filter on.
    pub fn searchable_facets(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.facets
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| !self.excluded.contains(name))
    }

    /// Build the unpaged query for a request. Fails before any backend call
    /// on malformed `bbox` or dates.
    pub fn build(
        &self,
        request: &SearchRequest,
        dialect: &dyn QueryDialect,
        parent: Option<&ParentCollection>,
    ) -> Result<BackendQuery> {
        let mut query = dialect.base_query(self.target);
        let mut start_date = None;
        let mut end_date = None;

        for (name, values) in &request.facets {
            let Some(first) = values.first() else {
                continue;
            };

            match name.as_str() {
                "query" => query.push_clause(Clause::FullText {
                    text: values.join(" "),
                }),
                "uuid" => query.push_clause(Clause::IdEquals { id: first.clone() }),
                "bbox" => {
                    let bbox = geo::parse_bbox(first)?;
                    match self.field_path("bbox", dialect) {
                        Some(field) => query.push_clause(Clause::GeoBoundingBox { field, bbox }),
                        None => tracing::debug!("bbox ignored; collection has no spatial field"),
                    }
                }
                "startDate" => start_date = Some(dates::normalize("startDate", first)?),
                "endDate" => end_date = Some(dates::normalize("endDate", first)?),
                facet if self.excluded.contains(&facet) => {}
                facet => match self.field_path(facet, dialect) {
                    Some(field) if values.len() == 1 => query.push_clause(Clause::Phrase {
                        field,
                        value: first.clone(),
                    }),
                    Some(field) => query.push_clause(Clause::AnyPhrase {
                        field,
                        values: values.clone(),
                    }),
                    None => tracing::debug!(facet, "Ignoring unknown facet"),
                },
            }
        }

        self.push_temporal(&mut query, start_date, end_date);

        if let Some(parent) = parent {
            if let Some(clause) = self.parent_clause(parent, dialect) {
                query.push_clause(clause);
            }
        }

        Ok(query)
    }

    fn push_temporal(&self, query: &mut BackendQuery, gte: Option<String>, lte: Option<String>) {
        match self.temporal {
            Temporal::Range(field) => {
                if gte.is_some() || lte.is_some() {
                    query.push_clause(Clause::DateRange {
                        field: field.to_string(),
                        gte,
                        lte,
                    });
                }
            }
            Temporal::Split { start, end } => {
                if let Some(gte) = gte {
                    query.push_clause(Clause::DateRange {
                        field: end.to_string(),
                        gte: Some(gte),
                        lte: None,
                    });
                }
                if let Some(lte) = lte {
                    query.push_clause(Clause::DateRange {
                        field: start.to_string(),
                        gte: None,
                        lte: Some(lte),
                    });
                }
            }
        }
    }

    fn parent_clause(&self, parent: &ParentCollection, dialect: &dyn QueryDialect) -> Option<Clause> {
        match self.parent_filter {
            ParentFilter::None => None,
            ParentFilter::DatasetId => Some(Clause::Term {
                field: dialect.default_path("datasetId"),
                value: parent.identifier.clone(),
            }),
            ParentFilter::DirectoryPrefix => Some(Clause::Prefix {
                field: "info.directory".to_string(),
                value: parent.path.clone(),
            }),
            ParentFilter::Project => Some(Clause::Term {
                field: dialect.default_path("project"),
                value: parent.path.clone(),
            }),
        }
    }
}
