//! Result assembly: entries and paging links for one page of hits.

use serde::Serialize;

use super::search::{Scope, SearchOutcome, Strategy};
use crate::backend::{Hit, TotalHits};
use crate::collections::entries::{collection_entry, Entry};
use crate::paging::request::{
    Addressing, CURSOR, HTTP_ACCEPT, MAXIMUM_RECORDS, START_PAGE, START_RECORD,
};
use crate::paging::{cursor, CursorToken, SearchRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub rel: &'static str,
    pub href: String,
}

impl Link {
    fn new(rel: &'static str, href: String) -> Self {
        Self { rel, href }
    }
}

/// Format-independent result document.
#[derive(Debug, Clone)]
pub struct ResultDocument {
    pub total: TotalHits,
    /// One-based index of the first entry.
    pub start_index: u64,
    pub items_per_page: u32,
    /// Document-selecting parameters of the request.
    pub query_string: String,
    pub links: Vec<Link>,
    pub entries: Vec<Entry>,
}

pub fn assemble(hits: &[Hit], scope: &Scope, base_url: &str) -> Vec<Entry> {
    match scope {
        Scope::Collections => hits.iter().map(|hit| collection_entry(hit, base_url)).collect(),
        Scope::Collection { kind, parent } => hits
            .iter()
            .map(|hit| kind.format_entry(hit, &parent.identifier, base_url))
            .collect(),
    }
}

pub fn document(request: &SearchRequest, outcome: &SearchOutcome, base_url: &str) -> ResultDocument {
    let query_string = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(request.facet_pairs())
        .finish();

    ResultDocument {
        total: outcome.total,
        start_index: request.offset() + 1,
        items_per_page: request.page_size,
        query_string,
        links: paging_links(request, outcome, base_url),
        entries: assemble(&outcome.hits, &outcome.scope, base_url),
    }
}

/// `self` plus navigation links.
///
/// Within the random-access ceiling: `first`/`previous` unless on the first
/// page, `next`/`last` unless on the final page, in the request's addressing
/// mode. Beyond it: `next` only, carrying a continuation token, and only
/// after a full page.
pub fn paging_links(request: &SearchRequest, outcome: &SearchOutcome, base_url: &str) -> Vec<Link> {
    let size = u64::from(request.page_size);
    let offset = request.offset();
    let total = outcome.total.value;
    let has_more = offset + size < total;

    let mut current = match request.addressing() {
        Addressing::Page => vec![(START_PAGE, request.page_number().to_string())],
        Addressing::Record => vec![(START_RECORD, (offset + 1).to_string())],
    };
    if let Some(token) = &request.cursor {
        current.push((CURSOR, token.clone()));
    }
    let mut links = vec![Link::new("self", link_url(base_url, request, &current))];

    if outcome.cursor_mode {
        // An approximate page shows hits from elsewhere in the result set,
        // so resuming after them would skip or repeat documents.
        if outcome.strategy == Strategy::Degraded {
            if has_more {
                let paging = [(START_PAGE, (request.page_number() + 1).to_string())];
                links.push(Link::new("next", link_url(base_url, request, &paging)));
            }
            return links;
        }
        let after_key = outcome.hits.last().and_then(cursor::encode);
        if let Some(key) = after_key.filter(|_| outcome.hits.len() as u64 == size && has_more) {
            let paging = [
                (START_PAGE, (request.page_number() + 1).to_string()),
                (CURSOR, CursorToken::encode(&key).to_string()),
            ];
            links.push(Link::new("next", link_url(base_url, request, &paging)));
        }
        return links;
    }

    let last_page = total.div_ceil(size).max(1);
    let position = |rel: &'static str, page: u64, record: u64| {
        let paging = match request.addressing() {
            Addressing::Page => [(START_PAGE, page.to_string())],
            Addressing::Record => [(START_RECORD, record.to_string())],
        };
        Link::new(rel, link_url(base_url, request, &paging))
    };

    if offset > 0 {
        let page = request.page_number();
        links.push(position("first", 1, 1));
        links.push(position(
            "previous",
            page.saturating_sub(1).max(1),
            offset.saturating_sub(size) + 1,
        ));
    }
    if has_more {
        let page = request.page_number();
        links.push(position("next", page + 1, offset + size + 1));
        links.push(position("last", last_page, (last_page - 1) * size + 1));
    }

    links
}

fn link_url(base_url: &str, request: &SearchRequest, paging: &[(&str, String)]) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.extend_pairs(request.facet_pairs());
    if let Some(accept) = &request.http_accept {
        query.append_pair(HTTP_ACCEPT, accept);
    }
    query.append_pair(MAXIMUM_RECORDS, &request.page_size.to_string());
    for (name, value) in paging {
        query.append_pair(name, value);
    }
    format!("{}/request?{}", base_url.trim_end_matches('/'), query.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TotalHits;
    use crate::config::PagingConfig;
    use serde_json::json;

    const BASE: &str = "http://localhost:8080/opensearch";

    fn request(query: &str) -> SearchRequest {
        let items = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        SearchRequest::from_items(items, &PagingConfig::default()).unwrap()
    }

    fn hits(n: usize) -> Vec<Hit> {
        (0..n)
            .map(|i| Hit {
                id: format!("doc-{i}"),
                sort: Some(vec![json!("/dir"), json!(format!("f{i:03}.nc"))]),
                source: json!({ "title": format!("doc {i}"), "collection_id": format!("c{i}") }),
            })
            .collect()
    }

    fn outcome(total: u64, hits: Vec<Hit>, cursor_mode: bool) -> SearchOutcome {
        SearchOutcome {
            scope: Scope::Collections,
            total: TotalHits::exact(total),
            hits,
            strategy: Strategy::Direct,
            cursor_mode,
        }
    }

    fn rels(links: &[Link]) -> Vec<&'static str> {
        links.iter().map(|l| l.rel).collect()
    }

    fn href<'a>(links: &'a [Link], rel: &str) -> &'a str {
        links
            .iter()
            .find(|l| l.rel == rel)
            .map(|l| l.href.as_str())
            .unwrap()
    }

    #[test]
    fn test_first_page_has_no_backward_links() {
        let request = request("ecv=AEROSOL");
        let links = paging_links(&request, &outcome(132, hits(10), false), BASE);
        assert_eq!(rels(&links), vec!["self", "next", "last"]);
        assert_eq!(
            href(&links, "last"),
            "http://localhost:8080/opensearch/request?ecv=AEROSOL&maximumRecords=10&startPage=14"
        );
    }

    #[test]
    fn test_final_page_has_no_forward_links() {
        let request = request("ecv=AEROSOL&startPage=14");
        let links = paging_links(&request, &outcome(132, hits(2), false), BASE);
        assert_eq!(rels(&links), vec!["self", "first", "previous"]);
        assert!(href(&links, "previous").ends_with("startPage=13"));
    }

    #[test]
    fn test_record_addressing_links() {
        let request = request("startRecord=11&maximumRecords=10");
        let links = paging_links(&request, &outcome(45, hits(10), false), BASE);
        assert_eq!(rels(&links), vec!["self", "first", "previous", "next", "last"]);
        assert!(href(&links, "self").ends_with("startRecord=11"));
        assert!(href(&links, "previous").ends_with("startRecord=1"));
        assert!(href(&links, "next").ends_with("startRecord=21"));
        assert!(href(&links, "last").ends_with("startRecord=41"));
    }

    #[test]
    fn test_cursor_mode_offers_only_next() {
        let request = request("ecv=CLOUD&startPage=200&maximumRecords=10");
        let page = hits(10);
        let expected = CursorToken::encode(page[9].sort.as_ref().unwrap()).to_string();
        let links = paging_links(&request, &outcome(59_724, page, true), BASE);

        assert_eq!(rels(&links), vec!["self", "next"]);
        let next = href(&links, "next");
        assert!(next.contains("startPage=201"));
        assert!(next.ends_with(&format!("cursor={}", expected)));
    }

    #[test]
    fn test_cursor_mode_short_page_has_no_next() {
        let request = request("startPage=5973&maximumRecords=10");
        let links = paging_links(&request, &outcome(59_724, hits(4), true), BASE);
        assert_eq!(rels(&links), vec!["self"]);
    }

    #[test]
    fn test_approximate_page_links_by_page_number() {
        let request = request("ecv=CLOUD&startPage=150&maximumRecords=100");
        let approximate = SearchOutcome {
            strategy: Strategy::Degraded,
            ..outcome(59_724, hits(100), true)
        };
        let links = paging_links(&request, &approximate, BASE);

        assert_eq!(rels(&links), vec!["self", "next"]);
        let next = href(&links, "next");
        assert!(next.contains("startPage=151"));
        assert!(!next.contains("cursor="));
    }

    #[test]
    fn test_document_counts_and_entries() {
        let request = request("title=ozone&startPage=2&maximumRecords=5&httpAccept=application/atom%2Bxml");
        let doc = document(&request, &outcome(12, hits(5), false), BASE);
        assert_eq!(doc.start_index, 6);
        assert_eq!(doc.items_per_page, 5);
        assert_eq!(doc.query_string, "title=ozone");
        assert_eq!(doc.entries.len(), 5);
        assert_eq!(
            doc.entries[0].id,
            "http://localhost:8080/opensearch/request?parentIdentifier=c0"
        );
        assert!(href(&doc.links, "self").contains("httpAccept=application%2Fatom%2Bxml"));
    }
}
