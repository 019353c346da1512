//! Response Formatting
//!
//! Renders a [`ResultDocument`] as a GeoJSON `FeatureCollection` or an Atom
//! feed with OpenSearch response elements.

use chrono::{SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde_json::json;
use std::io::Cursor;

use crate::api::content_negotiation::ResponseFormat;
use crate::backend::TotalRelation;
use crate::services::ResultDocument;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const OPENSEARCH_NS: &str = "http://a9.com/-/spec/opensearch/1.1/";

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML write error: {0}")]
    Xml(String),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl From<FormatError> for crate::Error {
    fn from(e: FormatError) -> Self {
        crate::Error::Internal(e.to_string())
    }
}

pub fn render(format: ResponseFormat, document: &ResultDocument) -> Result<Vec<u8>, FormatError> {
    match format {
        ResponseFormat::GeoJson => render_geojson(document),
        ResponseFormat::Atom => render_atom(document).map(String::into_bytes),
    }
}

fn relation(document: &ResultDocument) -> &'static str {
    match document.total.relation {
        TotalRelation::Eq => "eq",
        TotalRelation::Gte => "gte",
    }
}

fn render_geojson(document: &ResultDocument) -> Result<Vec<u8>, FormatError> {
    let body = json!({
        "type": "FeatureCollection",
        "totalResults": document.total.value,
        "totalResultsRelation": relation(document),
        "startIndex": document.start_index,
        "itemsPerPage": document.items_per_page,
        "queryString": document.query_string,
        "links": document.links,
        "features": document.entries,
    });
    Ok(serde_json::to_vec(&body)?)
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn write(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), FormatError> {
    writer
        .write_event(event)
        .map_err(|e| FormatError::Xml(e.to_string()))
}

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), FormatError> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

fn link_element(writer: &mut XmlWriter, rel: &str, href: &str) -> Result<(), FormatError> {
    let mut link = BytesStart::new("link");
    link.push_attribute(("rel", rel));
    link.push_attribute(("href", href));
    write(writer, Event::Empty(link))
}

fn render_atom(document: &ResultDocument) -> Result<String, FormatError> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let self_href = document
        .links
        .iter()
        .find(|link| link.rel == "self")
        .map(|link| link.href.as_str())
        .unwrap_or_default();

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut feed = BytesStart::new("feed");
    feed.push_attribute(("xmlns", ATOM_NS));
    feed.push_attribute(("xmlns:os", OPENSEARCH_NS));
    write(&mut writer, Event::Start(feed))?;

    text_element(&mut writer, "title", "OpenSearch results")?;
    text_element(&mut writer, "id", self_href)?;
    text_element(&mut writer, "updated", &now)?;
    text_element(
        &mut writer,
        "os:totalResults",
        &document.total.value.to_string(),
    )?;
    text_element(&mut writer, "os:startIndex", &document.start_index.to_string())?;
    text_element(
        &mut writer,
        "os:itemsPerPage",
        &document.items_per_page.to_string(),
    )?;

    for link in &document.links {
        link_element(&mut writer, link.rel, &link.href)?;
    }

    for entry in &document.entries {
        write(&mut writer, Event::Start(BytesStart::new("entry")))?;
        text_element(
            &mut writer,
            "title",
            entry.title().or(entry.identifier()).unwrap_or_default(),
        )?;
        text_element(&mut writer, "id", &entry.id)?;
        text_element(&mut writer, "updated", entry.updated().unwrap_or(now.as_str()))?;
        if let Some(date) = entry.date() {
            text_element(&mut writer, "summary", date)?;
        }
        link_element(&mut writer, "alternate", &entry.id)?;
        write(&mut writer, Event::End(BytesEnd::new("entry")))?;
    }

    write(&mut writer, Event::End(BytesEnd::new("feed")))?;
    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TotalHits;
    use crate::services::Link;

    fn document() -> ResultDocument {
        ResultDocument {
            total: TotalHits::at_least(10_001),
            start_index: 1,
            items_per_page: 10,
            query_string: "ecv=CLOUD".to_string(),
            links: vec![Link {
                rel: "self",
                href: "http://localhost/opensearch/request?ecv=CLOUD&maximumRecords=10".to_string(),
            }],
            entries: Vec::new(),
        }
    }

    #[test]
    fn test_geojson_envelope() {
        let body = render(ResponseFormat::GeoJson, &document()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["totalResults"], 10_001);
        assert_eq!(value["totalResultsRelation"], "gte");
        assert_eq!(value["links"][0]["rel"], "self");
        assert_eq!(value["features"], json!([]));
    }

    #[test]
    fn test_atom_escapes_links() {
        let body = String::from_utf8(render(ResponseFormat::Atom, &document()).unwrap()).unwrap();
        assert!(body.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(body.contains("<os:totalResults>10001</os:totalResults>"));
        assert!(body.contains("ecv=CLOUD&amp;maximumRecords=10"));
    }
}
