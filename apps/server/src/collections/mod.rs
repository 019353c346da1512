//! Collection handlers
//!
//! Every searchable collection is served by one of a closed set of handlers.
//! A handler fixes the facet table, the backend that holds the collection's
//! granules and how result entries are formatted. Collections are mapped to
//! handlers by the path stored on their collection document, matched against
//! a prefix table built once at startup.

pub mod entries;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::backend::SearchTarget;
use crate::config::CollectionRoute;
use crate::facets::{FacetSet, ParentFilter, Temporal, EXCLUDED_FACETS};
use crate::facets::FieldPath::{Default as D, Explicit as E};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// ESA Climate Change Initiative file index.
    Cci,
    /// CMIP5 archive file index.
    Cmip5,
    /// ESGF datasets held in Solr.
    Esgf,
}

/// Store a handler's documents live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Elasticsearch,
    Solr,
}

pub static CCI_FACETS: FacetSet = FacetSet {
    target: SearchTarget::Granules,
    facets: &[
        ("ecv", D),
        ("frequency", D),
        ("institute", D),
        ("processingLevel", D),
        ("productString", D),
        ("productVersion", D),
        ("dataType", D),
        ("sensor", D),
        ("platform", D),
        ("drsId", D),
        ("fileFormat", E("info.type")),
        ("bbox", E("info.spatial.coordinates.coordinates")),
    ],
    excluded: EXCLUDED_FACETS,
    temporal: Temporal::Range("info.temporal.time_range"),
    parent_filter: ParentFilter::DatasetId,
};

pub static CMIP5_FACETS: FacetSet = FacetSet {
    target: SearchTarget::Granules,
    facets: &[
        ("project", D),
        ("product", D),
        ("institute", D),
        ("model", D),
        ("experiment", D),
        ("timeFrequency", D),
        ("realm", D),
        ("cmipTable", D),
        ("ensemble", D),
        ("version", D),
        ("uuid", E("_id")),
        ("bbox", E("info.spatial.coordinates.coordinates")),
        ("startDate", E("info.temporal.start_time")),
        ("endDate", E("info.temporal.end_time")),
    ],
    excluded: EXCLUDED_FACETS,
    temporal: Temporal::Range("info.temporal.time_range"),
    parent_filter: ParentFilter::DirectoryPrefix,
};

pub static ESGF_FACETS: FacetSet = FacetSet {
    target: SearchTarget::Granules,
    facets: &[
        ("institute", D),
        ("model", D),
        ("experiment", D),
        ("project", D),
        ("product", D),
        ("ensemble", D),
        ("realm", D),
        ("variable", D),
        ("version", D),
        ("timeFrequency", E("time_frequency")),
        ("cmorTable", E("cmor_table")),
        ("cfStandardName", E("cf_standard_name")),
        ("variableLongName", E("variable_long_name")),
        ("dataNode", E("data_node")),
        ("uuid", E("id")),
        ("startDate", E("datetime_start")),
        ("endDate", E("datetime_stop")),
    ],
    excluded: EXCLUDED_FACETS,
    temporal: Temporal::Split {
        start: "datetime_start",
        end: "datetime_stop",
    },
    parent_filter: ParentFilter::Project,
};

/// Top-level search across collection documents.
pub static COLLECTION_FACETS: FacetSet = FacetSet {
    target: SearchTarget::Collections,
    facets: &[("title", D), ("collectionId", E("collection_id"))],
    excluded: &["uuid", "bbox", "startDate", "endDate", "parentIdentifier"],
    temporal: Temporal::Split {
        start: "start_date",
        end: "end_date",
    },
    parent_filter: ParentFilter::None,
};

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cci => "cci",
            Self::Cmip5 => "cmip5",
            Self::Esgf => "esgf",
        }
    }

    pub fn facet_set(&self) -> &'static FacetSet {
        match self {
            Self::Cci => &CCI_FACETS,
            Self::Cmip5 => &CMIP5_FACETS,
            Self::Esgf => &ESGF_FACETS,
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Cci | Self::Cmip5 => BackendKind::Elasticsearch,
            Self::Esgf => BackendKind::Solr,
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in path prefix to handler table.
pub const DEFAULT_ROUTES: &[(&str, CollectionKind)] = &[
    ("/neodc/esacci", CollectionKind::Cci),
    ("/badc/cmip5/data", CollectionKind::Cmip5),
    ("CMIP5", CollectionKind::Esgf),
    ("CORDEX", CollectionKind::Esgf),
    ("GeoMIP", CollectionKind::Esgf),
    ("PMIP3", CollectionKind::Esgf),
    ("TAMIP", CollectionKind::Esgf),
    ("obs4MIPs", CollectionKind::Esgf),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMatch {
    pub kind: CollectionKind,
    /// Registered prefix that matched.
    pub prefix: String,
}

/// Longest-prefix table from collection paths to handlers.
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    routes: HashMap<String, CollectionKind>,
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl CollectionRegistry {
    /// Defaults plus configured routes; configured routes replace defaults
    /// with the same prefix.
    pub fn new(overrides: &[CollectionRoute]) -> Self {
        let mut routes: HashMap<String, CollectionKind> = DEFAULT_ROUTES
            .iter()
            .map(|(prefix, kind)| (prefix.to_string(), *kind))
            .collect();

        for route in overrides {
            let prefix = normalize(&route.prefix);
            if prefix.is_empty() {
                continue;
            }
            routes.insert(prefix.to_string(), route.handler);
        }

        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Handler for `path`, trying the path itself and then each parent
    /// directory. Stops at `/` or the empty string.
    pub fn lookup(&self, path: &str) -> Option<CollectionMatch> {
        let mut current = normalize(path);

        loop {
            if let Some(kind) = self.routes.get(current) {
                return Some(CollectionMatch {
                    kind: *kind,
                    prefix: current.to_string(),
                });
            }
            if current.is_empty() || current == "/" {
                return None;
            }
            current = match current.rfind('/') {
                Some(0) => "/",
                Some(i) => &current[..i],
                None => "",
            };
        }
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim();
    if trimmed.len() > 1 {
        trimmed.trim_end_matches('/')
    } else {
        trimmed
    }
}
