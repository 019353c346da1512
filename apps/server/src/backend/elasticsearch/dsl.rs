//! Rendering of [`BackendQuery`] into Elasticsearch query DSL, and parsing of
//! Elasticsearch responses.

use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};

use crate::backend::{BackendQuery, Clause, Hit, TotalHits};

/// `bool` query for the clause list: scoring clauses in `must`, pure
/// restrictions in `filter`.
pub fn query_clause(query: &BackendQuery) -> JsonValue {
    let mut must = Vec::new();
    let mut filter = Vec::new();

    for clause in &query.clauses {
        let rendered = render_clause(clause);
        if clause.is_filter() {
            filter.push(rendered);
        } else {
            must.push(rendered);
        }
    }

    json!({
        "bool": {
            "must": must,
            "filter": filter,
        }
    })
}

fn render_clause(clause: &Clause) -> JsonValue {
    match clause {
        Clause::Exists { field } => json!({ "exists": { "field": field } }),
        Clause::FullText { text } => json!({
            "simple_query_string": {
                "query": text,
                "default_operator": "and",
            }
        }),
        Clause::Phrase { field, value } => match_phrase(field, value),
        Clause::AnyPhrase { field, values } => json!({
            "bool": {
                "should": values.iter().map(|v| match_phrase(field, v)).collect::<Vec<_>>(),
                "minimum_should_match": 1,
            }
        }),
        Clause::Term { field, value } => single_field("term", field, json!(value)),
        Clause::IdEquals { id } => json!({ "term": { "_id": id } }),
        Clause::Prefix { field, value } => single_field("prefix", field, json!(value)),
        Clause::GeoBoundingBox { field, bbox } => single_field(
            "geo_bounding_box",
            field,
            json!({
                "top_left": { "lat": bbox.north, "lon": bbox.west },
                "bottom_right": { "lat": bbox.south, "lon": bbox.east },
            }),
        ),
        Clause::DateRange { field, gte, lte } => {
            let mut bounds = Map::new();
            if let Some(gte) = gte {
                bounds.insert("gte".to_string(), json!(gte));
            }
            if let Some(lte) = lte {
                bounds.insert("lte".to_string(), json!(lte));
            }
            single_field("range", field, JsonValue::Object(bounds))
        }
    }
}

fn match_phrase(field: &str, value: &str) -> JsonValue {
    single_field("match_phrase", field, json!(value))
}

fn single_field(kind: &str, field: &str, body: JsonValue) -> JsonValue {
    let mut inner = Map::new();
    inner.insert(field.to_string(), body);
    let mut outer = Map::new();
    outer.insert(kind.to_string(), JsonValue::Object(inner));
    JsonValue::Object(outer)
}

fn sort_clause(query: &BackendQuery) -> JsonValue {
    JsonValue::Array(
        query
            .sort
            .iter()
            .map(|s| single_field_sort(&s.field, s.order.as_str()))
            .collect(),
    )
}

fn single_field_sort(field: &str, order: &str) -> JsonValue {
    let mut inner = Map::new();
    inner.insert(field.to_string(), json!({ "order": order }));
    JsonValue::Object(inner)
}

/// Full `_search` request body.
pub fn search_body(query: &BackendQuery) -> JsonValue {
    let mut body = json!({
        "query": query_clause(query),
        "sort": sort_clause(query),
        "track_total_hits": true,
    });

    if let Some(key) = &query.search_after {
        body["search_after"] = json!(key);
    } else if let Some(from) = query.from {
        body["from"] = json!(from);
    }
    if let Some(size) = query.size {
        body["size"] = json!(size);
    }
    body
}

/// `_count` request body; sort and paging are not accepted there.
pub fn count_body(query: &BackendQuery) -> JsonValue {
    json!({ "query": query_clause(query) })
}

/// Body for the first request of a scroll.
pub fn scroll_body(query: &BackendQuery, chunk_size: usize) -> JsonValue {
    json!({
        "query": query_clause(query),
        "sort": sort_clause(query),
        "size": chunk_size,
    })
}

#[derive(Debug, Deserialize)]
pub struct SearchResponseBody {
    #[serde(rename = "_scroll_id")]
    pub scroll_id: Option<String>,
    pub hits: HitsBody,
}

#[derive(Debug, Deserialize)]
pub struct HitsBody {
    pub total: Option<TotalBody>,
    #[serde(default)]
    pub hits: Vec<HitBody>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TotalBody {
    Object { value: u64, relation: String },
    Legacy(u64),
}

impl TotalBody {
    pub fn into_total(self) -> TotalHits {
        match self {
            TotalBody::Object { value, relation } if relation == "gte" => {
                TotalHits::at_least(value)
            }
            TotalBody::Object { value, .. } => TotalHits::exact(value),
            TotalBody::Legacy(value) => TotalHits::exact(value),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HitBody {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: JsonValue,
    #[serde(default)]
    pub sort: Option<Vec<JsonValue>>,
}

impl From<HitBody> for Hit {
    fn from(body: HitBody) -> Self {
        Hit {
            id: body.id,
            sort: body.sort,
            source: body.source,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CountResponseBody {
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct GetResponseBody {
    #[serde(default)]
    pub found: bool,
    #[serde(rename = "_source")]
    pub source: Option<JsonValue>,
}
