//! Rendering of [`BackendQuery`] into Solr `select` parameters.

use crate::backend::{BackendQuery, Clause};

/// Field every Solr document is keyed by; required as cursorMark tiebreaker.
pub const UNIQUE_KEY: &str = "id";

const DEFAULT_ROWS: u32 = 10;

/// Characters with meaning in the Lucene query syntax.
const SPECIAL_CHARS: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\', '/',
    ' ',
];

pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if SPECIAL_CHARS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn render_filter(clause: &Clause) -> Option<String> {
    match clause {
        Clause::FullText { .. } => None,
        Clause::Exists { field } => Some(format!("{}:*", field)),
        Clause::Phrase { field, value } | Clause::Term { field, value } => {
            Some(format!("{}:{}", field, quote(value)))
        }
        Clause::AnyPhrase { field, values } => Some(format!(
            "{}:({})",
            field,
            values
                .iter()
                .map(|v| quote(v))
                .collect::<Vec<_>>()
                .join(" OR ")
        )),
        Clause::IdEquals { id } => Some(format!("{}:{}", UNIQUE_KEY, quote(id))),
        Clause::Prefix { field, value } => Some(format!("{}:{}*", field, escape(value))),
        Clause::GeoBoundingBox { field, bbox } => Some(format!(
            "{}:[{},{} TO {},{}]",
            field, bbox.south, bbox.west, bbox.north, bbox.east
        )),
        Clause::DateRange { field, gte, lte } => Some(format!(
            "{}:[{} TO {}]",
            field,
            gte.as_deref().unwrap_or("*"),
            lte.as_deref().unwrap_or("*")
        )),
    }
}

fn main_query(query: &BackendQuery) -> String {
    let texts: Vec<&str> = query
        .clauses
        .iter()
        .filter_map(|c| match c {
            Clause::FullText { text } if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
        .collect();

    if texts.is_empty() {
        "*:*".to_string()
    } else {
        texts
            .iter()
            .map(|t| format!("({})", t))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

fn sort_param(query: &BackendQuery, require_unique_key: bool) -> Option<String> {
    let mut parts: Vec<String> = query
        .sort
        .iter()
        .map(|s| format!("{} {}", s.field, s.order.as_str()))
        .collect();

    if require_unique_key && !query.sort.iter().any(|s| s.field == UNIQUE_KEY) {
        parts.push(format!("{} asc", UNIQUE_KEY));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

/// Query and filter parameters shared by every request.
fn filter_params(query: &BackendQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("q".to_string(), main_query(query)),
        ("wt".to_string(), "json".to_string()),
    ];
    for fq in query.clauses.iter().filter_map(render_filter) {
        params.push(("fq".to_string(), fq));
    }
    params
}

/// Parameters for a paged `select`. Solr has no sort-key cursor for random
/// pages, so `search_after` is ignored and the offset is used as given.
pub fn select_params(query: &BackendQuery) -> Vec<(String, String)> {
    let mut params = filter_params(query);
    params.push(("start".to_string(), query.from.unwrap_or(0).to_string()));
    params.push((
        "rows".to_string(),
        query.size.unwrap_or(DEFAULT_ROWS).to_string(),
    ));
    if let Some(sort) = sort_param(query, false) {
        params.push(("sort".to_string(), sort));
    }
    params
}

pub fn count_params(query: &BackendQuery) -> Vec<(String, String)> {
    let mut params = filter_params(query);
    params.push(("rows".to_string(), "0".to_string()));
    params
}

/// Parameters for one cursorMark batch of a full scan.
pub fn cursor_params(query: &BackendQuery, cursor_mark: &str, rows: usize) -> Vec<(String, String)> {
    let mut params = filter_params(query);
    params.push(("rows".to_string(), rows.to_string()));
    params.push(("cursorMark".to_string(), cursor_mark.to_string()));
    if let Some(sort) = sort_param(query, true) {
        params.push(("sort".to_string(), sort));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BoundingBox, SearchTarget, SortOrder};

    fn value<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
        params
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn test_select_params() {
        let query = BackendQuery::new(SearchTarget::Granules)
            .with_clause(Clause::FullText {
                text: "temperature".into(),
            })
            .with_clause(Clause::Phrase {
                field: "model".into(),
                value: "HadGEM2-ES".into(),
            })
            .with_clause(Clause::AnyPhrase {
                field: "realm".into(),
                values: vec!["atmos".into(), "ocean".into()],
            })
            .with_sort("id", SortOrder::Asc)
            .with_page(20, 10);

        let params = select_params(&query);
        assert_eq!(value(&params, "q"), vec!["(temperature)"]);
        assert_eq!(
            value(&params, "fq"),
            vec![r#"model:"HadGEM2-ES""#, r#"realm:("atmos" OR "ocean")"#]
        );
        assert_eq!(value(&params, "start"), vec!["20"]);
        assert_eq!(value(&params, "rows"), vec!["10"]);
        assert_eq!(value(&params, "sort"), vec!["id asc"]);
    }

    #[test]
    fn test_filters_without_text_match_all() {
        let query = BackendQuery::new(SearchTarget::Granules)
            .with_clause(Clause::GeoBoundingBox {
                field: "bbox".into(),
                bbox: BoundingBox {
                    west: -10.0,
                    south: 40.0,
                    east: 5.0,
                    north: 60.0,
                },
            })
            .with_clause(Clause::DateRange {
                field: "datetime_start".into(),
                gte: Some("2000-01-01T00:00:00Z".into()),
                lte: None,
            });

        let params = count_params(&query);
        assert_eq!(value(&params, "q"), vec!["*:*"]);
        assert_eq!(
            value(&params, "fq"),
            vec![
                "bbox:[40,-10 TO 60,5]",
                "datetime_start:[2000-01-01T00:00:00Z TO *]"
            ]
        );
        assert_eq!(value(&params, "rows"), vec!["0"]);
    }

    #[test]
    fn test_cursor_params_append_unique_key() {
        let query = BackendQuery::new(SearchTarget::Granules).with_sort("version", SortOrder::Desc);
        let params = cursor_params(&query, "*", 500);
        assert_eq!(value(&params, "sort"), vec!["version desc,id asc"]);
        assert_eq!(value(&params, "cursorMark"), vec!["*"]);
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a b:c"), r"a\ b\:c");
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
    }
}
