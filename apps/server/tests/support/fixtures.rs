use chrono::{Duration, NaiveDate};
use opensearch_gateway::backend::memory::MemoryDocument;
use serde_json::json;

pub mod constants {
    pub const AEROSOL_COLLECTION: &str = "cci-aerosol";
    pub const CLOUD_COLLECTION: &str = "cci-cloud";
    pub const ESGF_COLLECTION: &str = "esgf-cmip5";
    pub const ORPHAN_COLLECTION: &str = "orphan";
    pub const SEARCH: &str = "/opensearch/request";
}

/// Identifier of the `index`th (zero-based) granule of an ECV.
pub fn granule_id(ecv: &str, index: usize) -> String {
    format!("{}-{:06}", ecv.to_lowercase(), index)
}

/// Identifiers of granules `range` in result order.
pub fn granule_ids(ecv: &str, range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| granule_id(ecv, i)).collect()
}

/// A CCI file document. Granules of one ECV share a directory and sort by
/// their zero-padded file name, so result order follows `index`.
pub fn cci_granule(dataset_id: &str, ecv: &str, index: usize) -> MemoryDocument {
    let day = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default() + Duration::days(index as i64);
    let start = format!("{}T00:00:00", day.format("%Y-%m-%d"));
    let end = format!("{}T23:59:59", day.format("%Y-%m-%d"));

    MemoryDocument::new(
        granule_id(ecv, index),
        json!({
            "projects": {
                "opensearch": {
                    "ecv": ecv,
                    "datasetId": dataset_id,
                    "frequency": "day",
                    "processingLevel": "L3C"
                }
            },
            "info": {
                "directory": format!("/neodc/esacci/{}/data/v3.0", ecv.to_lowercase()),
                "name": format!("ESACCI-{}-{:06}.nc", ecv, index),
                "size": 1024 + index,
                "type": "netcdf",
                "last_modified": "2020-06-01T12:00:00",
                "temporal": {
                    "start_time": start,
                    "end_time": end,
                    "time_range": { "gte": start, "lte": end }
                },
                "spatial": {
                    "coordinates": {
                        "type": "envelope",
                        "coordinates": [[-10.0, 60.0], [10.0, 40.0]]
                    }
                }
            }
        }),
    )
}

pub fn cci_granules(dataset_id: &str, ecv: &str, count: usize) -> Vec<MemoryDocument> {
    (0..count).map(|i| cci_granule(dataset_id, ecv, i)).collect()
}

pub fn collection(id: &str, title: &str, path: &str) -> MemoryDocument {
    MemoryDocument::new(
        id,
        json!({
            "collection_id": id,
            "title": title,
            "path": path,
            "start_date": "1997-09-01T00:00:00",
            "end_date": "2020-12-31T23:59:59"
        }),
    )
}

/// Collection documents for the CCI, ESGF and unrouted fixtures.
pub fn standard_collections() -> Vec<MemoryDocument> {
    vec![
        collection(
            constants::AEROSOL_COLLECTION,
            "ESA Aerosol CCI",
            "/neodc/esacci/aerosol/data",
        ),
        collection(
            constants::CLOUD_COLLECTION,
            "ESA Cloud CCI",
            "/neodc/esacci/cloud/data",
        ),
        collection(constants::ESGF_COLLECTION, "CMIP5 datasets", "CMIP5"),
        collection(constants::ORPHAN_COLLECTION, "Unrouted archive", "/archive/misc"),
    ]
}

/// A dataset document as held by the ESGF Solr index.
pub fn esgf_dataset(index: usize, model: &str) -> MemoryDocument {
    let id = format!("cmip5.output1.{}.historical.v{:04}|esgf.ceda.ac.uk", model, index);
    MemoryDocument::new(
        id.clone(),
        json!({
            "id": id,
            "project": "CMIP5",
            "model": model,
            "experiment": "historical",
            "title": format!("{} historical run {}", model, index),
            "_timestamp": "2019-03-02T10:00:00Z",
            "datetime_start": "1859-12-01T12:00:00Z",
            "datetime_stop": "2005-11-30T12:00:00Z",
            "data_node": "esgf.ceda.ac.uk",
            "number_of_files": 12
        }),
    )
}
