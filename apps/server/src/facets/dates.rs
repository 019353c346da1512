//! Parsing of user-supplied dates.
//!
//! Dates arrive in whatever form a client typed them. Everything is
//! normalized to a UTC instant rendered as `YYYY-MM-DDTHH:MM:SSZ`, which
//! both backends accept and which sorts lexicographically.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::{Error, Result};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y%m%dT%H%M%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y%m%d",
    "%d %B %Y", "%d %b %Y", "%B %d %Y", "%b %d %Y",
];

/// Parse a date in any supported form into a UTC instant.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // Trailing `Z` without an offset-aware parse, e.g. `2015-05-30T00:00Z`.
    let naive = value.strip_suffix('Z').unwrap_or(value);

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(dt.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(naive, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    partial_date(naive)
}

/// `YYYY-MM` and `YYYY`, anchored at the start of the period.
fn partial_date(value: &str) -> Option<DateTime<Utc>> {
    let mut parts = value.split('-');
    let year = parts.next()?;
    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month: u32 = match parts.next() {
        Some(m) if (1..=2).contains(&m.len()) => m.parse().ok()?,
        Some(_) => return None,
        None => 1,
    };
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, 1)?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
}

/// Normalized `YYYY-MM-DDTHH:MM:SSZ` form of `value`, if it parses.
pub fn parse_date(value: &str) -> Option<String> {
    parse_instant(value).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Normalize a request parameter, failing with the parameter named.
pub fn normalize(parameter: &str, value: &str) -> Result<String> {
    parse_date(value).ok_or_else(|| Error::unparseable_date(parameter, value))
}
