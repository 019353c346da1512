//! Parsing of search request parameters.

use std::collections::BTreeMap;

use crate::config::PagingConfig;
use crate::{Error, Result};

pub const HTTP_ACCEPT: &str = "httpAccept";
pub const MAXIMUM_RECORDS: &str = "maximumRecords";
pub const START_PAGE: &str = "startPage";
pub const START_RECORD: &str = "startRecord";
pub const CURSOR: &str = "cursor";
pub const PARENT_IDENTIFIER: &str = "parentIdentifier";

/// Parameters that control paging or presentation. They never select
/// documents, so they are left out of query building, session comparison
/// and cache keys.
pub const RESERVED_PARAMS: &[&str] = &[HTTP_ACCEPT, MAXIMUM_RECORDS, START_PAGE, START_RECORD, CURSOR];

/// Which parameter the client used to address a page; links are generated
/// the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    Page,
    Record,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Document-selecting parameters in first-appearance order, repeated
    /// names grouped.
    pub facets: Vec<(String, Vec<String>)>,
    pub page_size: u32,
    pub start_page: Option<u64>,
    pub start_record: Option<u64>,
    pub http_accept: Option<String>,
    /// Opaque continuation token from a `next` link.
    pub cursor: Option<String>,
}

/// Page and record numbers are 32-bit, which keeps offset arithmetic in
/// range of `u64`.
fn parse_positive(name: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u32>() {
        Ok(n) if n >= 1 => Ok(u64::from(n)),
        _ => Err(Error::invalid_parameter(
            name,
            format!("must be a positive integer up to {}, got '{}'", u32::MAX, value),
        )),
    }
}

impl SearchRequest {
    /// Build from decoded query-string pairs.
    ///
    /// # Errors
    /// `InvalidParameter` for a non-numeric or zero `maximumRecords`,
    /// `startPage` or `startRecord`.
    pub fn from_items(items: Vec<(String, String)>, paging: &PagingConfig) -> Result<Self> {
        let mut facets: Vec<(String, Vec<String>)> = Vec::new();
        let mut page_size = paging.default_page_size;
        let mut start_page = None;
        let mut start_record = None;
        let mut http_accept = None;
        let mut cursor = None;

        for (name, value) in items {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }

            match name.as_str() {
                MAXIMUM_RECORDS => {
                    let requested = value.parse::<u64>().map_err(|_| {
                        Error::invalid_parameter(
                            MAXIMUM_RECORDS,
                            format!("must be a positive integer, got '{}'", value),
                        )
                    })?;
                    if requested == 0 {
                        return Err(Error::invalid_parameter(
                            MAXIMUM_RECORDS,
                            "must be greater than zero",
                        ));
                    }
                    page_size = requested.min(u64::from(paging.max_page_size)) as u32;
                }
                START_PAGE => start_page = Some(parse_positive(START_PAGE, &value)?),
                START_RECORD => start_record = Some(parse_positive(START_RECORD, &value)?),
                HTTP_ACCEPT => http_accept = Some(value),
                CURSOR => cursor = Some(value),
                _ => match facets.iter_mut().find(|(n, _)| *n == name) {
                    Some((_, values)) => values.push(value),
                    None => facets.push((name, vec![value])),
                },
            }
        }

        Ok(Self {
            facets,
            page_size,
            start_page,
            start_record,
            http_accept,
            cursor,
        })
    }

    pub fn facet(&self, name: &str) -> Option<&[String]> {
        self.facets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn parent_identifier(&self) -> Option<&str> {
        self.facet(PARENT_IDENTIFIER)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// `startPage` wins over `startRecord`.
    pub fn addressing(&self) -> Addressing {
        if self.start_page.is_none() && self.start_record.is_some() {
            Addressing::Record
        } else {
            Addressing::Page
        }
    }

    /// Zero-based index of the first requested document.
    pub fn offset(&self) -> u64 {
        match (self.start_page, self.start_record) {
            (Some(page), _) => (page - 1) * u64::from(self.page_size),
            (None, Some(record)) => record - 1,
            (None, None) => 0,
        }
    }

    /// One-based page number the request addresses.
    pub fn page_number(&self) -> u64 {
        self.start_page
            .unwrap_or_else(|| self.offset() / u64::from(self.page_size) + 1)
    }

    /// Document-selecting parameters with values sorted within each name;
    /// equal for requests that select the same documents.
    pub fn normalized_params(&self) -> BTreeMap<String, Vec<String>> {
        self.facets
            .iter()
            .map(|(name, values)| {
                let mut values = values.clone();
                values.sort();
                (name.clone(), values)
            })
            .collect()
    }

    /// Facet pairs in request order, as repeated on generated links.
    pub fn facet_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.facets
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parse(pairs: &[(&str, &str)]) -> Result<SearchRequest> {
        SearchRequest::from_items(items(pairs), &PagingConfig::default())
    }

    #[test]
    fn test_defaults() {
        let request = parse(&[]).unwrap();
        assert_eq!(request.page_size, 10);
        assert_eq!(request.offset(), 0);
        assert_eq!(request.page_number(), 1);
        assert_eq!(request.addressing(), Addressing::Page);
    }

    #[test]
    fn test_facets_grouped_in_order() {
        let request = parse(&[
            ("ecv", "CLOUD"),
            ("parentIdentifier", "abc"),
            ("ecv", "AEROSOL"),
            ("frequency", ""),
            ("httpAccept", "application/atom+xml"),
        ])
        .unwrap();
        assert_eq!(
            request.facets,
            vec![
                ("ecv".to_string(), vec!["CLOUD".to_string(), "AEROSOL".to_string()]),
                ("parentIdentifier".to_string(), vec!["abc".to_string()]),
            ]
        );
        assert_eq!(request.parent_identifier(), Some("abc"));
        assert_eq!(request.http_accept.as_deref(), Some("application/atom+xml"));
    }

    #[test]
    fn test_start_page_takes_precedence() {
        let request = parse(&[
            ("maximumRecords", "20"),
            ("startPage", "3"),
            ("startRecord", "7"),
        ])
        .unwrap();
        assert_eq!(request.offset(), 40);
        assert_eq!(request.page_number(), 3);
        assert_eq!(request.addressing(), Addressing::Page);
    }

    #[test]
    fn test_start_record_addressing() {
        let request = parse(&[("maximumRecords", "10"), ("startRecord", "21")]).unwrap();
        assert_eq!(request.offset(), 20);
        assert_eq!(request.page_number(), 3);
        assert_eq!(request.addressing(), Addressing::Record);
    }

    #[test]
    fn test_page_size_validation() {
        let err = parse(&[("maximumRecords", "0")]).unwrap_err();
        assert!(
            matches!(err, Error::InvalidParameter { ref parameter, .. } if parameter == "maximumRecords")
        );
        assert!(parse(&[("maximumRecords", "ten")]).is_err());
        assert!(parse(&[("startPage", "0")]).is_err());
        assert!(parse(&[("startRecord", "-1")]).is_err());

        let clamped = parse(&[("maximumRecords", "50000")]).unwrap();
        assert_eq!(clamped.page_size, 1000);
    }

    #[test]
    fn test_paging_numbers_are_bounded() {
        for name in ["startPage", "startRecord"] {
            let err = parse(&[(name, "18446744073709551615")]).unwrap_err();
            assert!(
                matches!(err, Error::InvalidParameter { ref parameter, .. } if parameter == name),
                "{name}"
            );
            assert!(parse(&[(name, "4294967296")]).is_err(), "{name}");
        }

        let last = parse(&[("startPage", "4294967295"), ("maximumRecords", "1000")]).unwrap();
        assert_eq!(last.page_number(), u64::from(u32::MAX));
        assert_eq!(last.offset(), (u64::from(u32::MAX) - 1) * 1000);
    }

    #[test]
    fn test_normalized_params_ignore_order_and_paging() {
        let a = parse(&[
            ("ecv", "CLOUD"),
            ("ecv", "AEROSOL"),
            ("frequency", "day"),
            ("startPage", "2"),
        ])
        .unwrap();
        let b = parse(&[
            ("frequency", "day"),
            ("ecv", "AEROSOL"),
            ("ecv", "CLOUD"),
            ("httpAccept", "application/atom+xml"),
        ])
        .unwrap();
        assert_eq!(a.normalized_params(), b.normalized_params());
    }
}
