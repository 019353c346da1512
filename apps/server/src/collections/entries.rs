//! Formatting of backend hits into result entries.

use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

use super::CollectionKind;
use crate::backend::Hit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryType {
    Feature,
    FeatureCollection,
}

/// One result entry, serialized as a GeoJSON feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    pub properties: Map<String, JsonValue>,
}

impl Entry {
    fn new(entry_type: EntryType, id: String) -> Self {
        Self {
            entry_type,
            id,
            bbox: None,
            properties: Map::new(),
        }
    }

    /// Set a property, skipping absent and null values.
    fn set(&mut self, name: &str, value: Option<&JsonValue>) {
        if let Some(value) = value.filter(|v| !v.is_null()) {
            self.properties.insert(name.to_string(), value.clone());
        }
    }

    fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(JsonValue::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.property_str("title")
    }

    pub fn identifier(&self) -> Option<&str> {
        self.property_str("identifier")
    }

    pub fn updated(&self) -> Option<&str> {
        self.property_str("updated")
    }

    pub fn date(&self) -> Option<&str> {
        self.property_str("date")
    }
}

fn request_url(base_url: &str, pairs: &[(&str, &str)]) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("{}/request?{}", base_url.trim_end_matches('/'), query)
}

fn lookup<'a>(source: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(source, |value, key| value.get(key))
}

/// `start/end` when both ends are present.
fn period(source: &JsonValue, start: &str, end: &str) -> Option<JsonValue> {
    let start = lookup(source, start)?.as_str()?;
    let end = lookup(source, end)?.as_str()?;
    Some(json!(format!("{}/{}", start, end)))
}

/// `[west, south, east, north]` from an indexed envelope
/// (`[[west, north], [east, south]]`) or point (`[lon, lat]`).
fn extract_bbox(spatial: &JsonValue) -> Option<[f64; 4]> {
    let coordinates = lookup(spatial, "coordinates.coordinates")?.as_array()?;
    let pair = |v: &JsonValue| -> Option<(f64, f64)> {
        let v = v.as_array()?;
        Some((v.first()?.as_f64()?, v.get(1)?.as_f64()?))
    };

    match coordinates.as_slice() {
        [lon, lat] if lon.is_number() && lat.is_number() => {
            let (lon, lat) = (lon.as_f64()?, lat.as_f64()?);
            Some([lon, lat, lon, lat])
        }
        [upper_left, lower_right] => {
            let (west, north) = pair(upper_left)?;
            let (east, south) = pair(lower_right)?;
            Some([west, south, east, north])
        }
        _ => None,
    }
}

impl CollectionKind {
    /// Entry for a granule-level hit of a collection served by this handler.
    pub fn format_entry(&self, hit: &Hit, parent_identifier: &str, base_url: &str) -> Entry {
        match self {
            Self::Cci | Self::Cmip5 => file_entry(hit, parent_identifier, base_url),
            Self::Esgf => dataset_entry(hit, parent_identifier, base_url),
        }
    }
}

fn file_entry(hit: &Hit, parent_identifier: &str, base_url: &str) -> Entry {
    let id = request_url(
        base_url,
        &[("parentIdentifier", parent_identifier), ("uuid", hit.id.as_str())],
    );
    let mut entry = Entry::new(EntryType::Feature, id);
    let source = &hit.source;

    entry.set("title", lookup(source, "info.name"));
    entry.set("identifier", Some(&json!(hit.id)));
    entry.set("updated", lookup(source, "info.last_modified"));
    entry.set("filesize", lookup(source, "info.size"));

    if let Some(temporal) = lookup(source, "info.temporal") {
        entry.set("date", period(temporal, "start_time", "end_time").as_ref());
    }
    entry.bbox = lookup(source, "info.spatial").and_then(extract_bbox);

    entry
}

fn dataset_entry(hit: &Hit, parent_identifier: &str, base_url: &str) -> Entry {
    let id = request_url(
        base_url,
        &[("parentIdentifier", parent_identifier), ("uuid", hit.id.as_str())],
    );
    let mut entry = Entry::new(EntryType::Feature, id);
    let source = &hit.source;

    entry.set("title", source.get("title"));
    entry.set("identifier", Some(&json!(hit.id)));
    entry.set("updated", source.get("_timestamp"));
    entry.set(
        "date",
        period(source, "datetime_start", "datetime_stop").as_ref(),
    );
    entry.set("data_node", source.get("data_node"));
    entry.set("version", source.get("version"));
    entry.set("number_of_files", source.get("number_of_files"));

    entry
}

/// Entry for a collection document in a top-level search.
pub fn collection_entry(hit: &Hit, base_url: &str) -> Entry {
    let source = &hit.source;
    let collection_id = source
        .get("collection_id")
        .and_then(JsonValue::as_str)
        .unwrap_or(&hit.id);

    let id = request_url(base_url, &[("parentIdentifier", collection_id)]);
    let mut entry = Entry::new(EntryType::FeatureCollection, id);

    entry.set("title", source.get("title"));
    entry.set("identifier", Some(&json!(collection_id)));
    entry.set("date", period(source, "start_date", "end_date").as_ref());

    entry
}
