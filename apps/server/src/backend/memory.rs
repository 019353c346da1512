//! In-process backend holding documents in memory.
//!
//! Evaluates [`BackendQuery`] clauses directly against JSON sources with the
//! same sort, cursor and window semantics as the document-search engine. Used
//! by the test suites; exposes call counters and simple fault injection.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    BackendQuery, BoundingBox, Clause, Hit, SearchBackend, SearchResponse, SearchTarget,
    SortField, SortKey, SortOrder, TotalHits,
};
use crate::facets::dates;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct MemoryDocument {
    pub id: String,
    pub source: JsonValue,
}

impl MemoryDocument {
    pub fn new(id: impl Into<String>, source: JsonValue) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }
}

#[derive(Debug, Default)]
pub struct CallCounters {
    pub searches: AtomicUsize,
    pub counts: AtomicUsize,
    pub scans: AtomicUsize,
    pub gets: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    /// Next N search calls fail as unavailable.
    unavailable_searches: AtomicUsize,
    /// Next N scans fail after yielding part of the result set.
    failing_scans: AtomicUsize,
    count_delay: Mutex<Option<Duration>>,
    scan_delay: Mutex<Option<Duration>>,
}

struct Inner {
    granules: Vec<MemoryDocument>,
    collections: Vec<MemoryDocument>,
    ceiling: Option<u64>,
    calls: CallCounters,
    faults: Faults,
    searches: Mutex<Vec<BackendQuery>>,
}

#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new(
        granules: Vec<MemoryDocument>,
        collections: Vec<MemoryDocument>,
        ceiling: Option<u64>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                granules,
                collections,
                ceiling,
                calls: CallCounters::default(),
                faults: Faults::default(),
                searches: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn calls(&self) -> &CallCounters {
        &self.inner.calls
    }

    pub fn scan_count(&self) -> usize {
        self.inner.calls.scans.load(AtomicOrdering::SeqCst)
    }

    pub fn search_count(&self) -> usize {
        self.inner.calls.searches.load(AtomicOrdering::SeqCst)
    }

    /// Queries passed to `search`, oldest first.
    pub fn recorded_searches(&self) -> Vec<BackendQuery> {
        self.inner
            .searches
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }

    pub fn last_search(&self) -> Option<BackendQuery> {
        self.recorded_searches().pop()
    }

    pub fn fail_next_searches(&self, n: usize) {
        self.inner
            .faults
            .unavailable_searches
            .store(n, AtomicOrdering::SeqCst);
    }

    pub fn fail_next_scans(&self, n: usize) {
        self.inner
            .faults
            .failing_scans
            .store(n, AtomicOrdering::SeqCst);
    }

    pub fn set_count_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.inner.faults.count_delay.lock() {
            *slot = delay;
        }
    }

    pub fn set_scan_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.inner.faults.scan_delay.lock() {
            *slot = delay;
        }
    }

    fn documents(&self, target: SearchTarget) -> &[MemoryDocument] {
        match target {
            SearchTarget::Granules => &self.inner.granules,
            SearchTarget::Collections => &self.inner.collections,
        }
    }

    /// Matching documents in query sort order.
    fn matching(&self, query: &BackendQuery) -> Vec<(SortKey, &MemoryDocument)> {
        let mut matched: Vec<(SortKey, &MemoryDocument)> = self
            .documents(query.target)
            .iter()
            .filter(|doc| query.clauses.iter().all(|c| clause_matches(c, doc)))
            .map(|doc| (sort_key(&query.sort, doc), doc))
            .collect();

        matched.sort_by(|(a, _), (b, _)| compare_keys(&query.sort, a, b));
        matched
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
    }

    fn delay(slot: &Mutex<Option<Duration>>) -> Option<Duration> {
        slot.lock().ok().and_then(|d| *d)
    }
}

fn to_hit(key: SortKey, doc: &MemoryDocument) -> Hit {
    Hit {
        id: doc.id.clone(),
        sort: Some(key),
        source: doc.source.clone(),
    }
}

/// Every value reachable at a dotted path, stepping through arrays of objects.
fn values_at<'a>(source: &'a JsonValue, path: &str) -> Vec<&'a JsonValue> {
    let mut current = vec![source];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                JsonValue::Object(map) => {
                    if let Some(v) = map.get(segment) {
                        next.push(v);
                    }
                }
                JsonValue::Array(items) => {
                    for item in items {
                        if let Some(v) = item.get(segment) {
                            next.push(v);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current.into_iter().filter(|v| !v.is_null()).collect()
}

fn as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field_values(doc: &MemoryDocument, field: &str) -> Vec<String> {
    if field == "_id" {
        return vec![doc.id.clone()];
    }
    values_at(&doc.source, field)
        .into_iter()
        .flat_map(|v| match v {
            JsonValue::Array(items) => items.iter().filter_map(as_text).collect::<Vec<_>>(),
            other => as_text(other).into_iter().collect(),
        })
        .collect()
}

fn clause_matches(clause: &Clause, doc: &MemoryDocument) -> bool {
    match clause {
        Clause::Exists { field } => !values_at(&doc.source, field).is_empty(),
        Clause::FullText { text } => {
            let haystack = doc.source.to_string().to_lowercase();
            text.split_whitespace()
                .map(|t| t.trim_matches(|c| c == '+' || c == '"').to_lowercase())
                .filter(|t| !t.is_empty())
                .all(|t| haystack.contains(&t))
        }
        Clause::Phrase { field, value } => field_values(doc, field)
            .iter()
            .any(|v| v.eq_ignore_ascii_case(value)),
        Clause::AnyPhrase { field, values } => {
            let present = field_values(doc, field);
            values
                .iter()
                .any(|wanted| present.iter().any(|v| v.eq_ignore_ascii_case(wanted)))
        }
        Clause::Term { field, value } => field_values(doc, field).iter().any(|v| v == value),
        Clause::IdEquals { id } => &doc.id == id,
        Clause::Prefix { field, value } => field_values(doc, field)
            .iter()
            .any(|v| v.starts_with(value.as_str())),
        Clause::GeoBoundingBox { field, bbox } => values_at(&doc.source, field)
            .first()
            .and_then(|v| envelope_of(v))
            .map(|doc_box| intersects(&doc_box, bbox))
            .unwrap_or(false),
        Clause::DateRange { field, gte, lte } => {
            date_range_matches(&doc.source, field, gte.as_deref(), lte.as_deref())
        }
    }
}

/// `[lon, lat]` points and `[[minLon, maxLat], [maxLon, minLat]]` envelopes.
fn envelope_of(value: &JsonValue) -> Option<BoundingBox> {
    let pair = |v: &JsonValue| -> Option<(f64, f64)> {
        let items = v.as_array()?;
        Some((items.first()?.as_f64()?, items.get(1)?.as_f64()?))
    };

    if let Some((lon, lat)) = pair(value) {
        return Some(BoundingBox {
            west: lon,
            south: lat,
            east: lon,
            north: lat,
        });
    }

    let corners = value.as_array()?;
    let (west, north) = pair(corners.first()?)?;
    let (east, south) = pair(corners.get(1)?)?;
    Some(BoundingBox {
        west,
        south,
        east,
        north,
    })
}

fn intersects(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.west <= b.east && a.east >= b.west && a.south <= b.north && a.north >= b.south
}

fn date_range_matches(source: &JsonValue, field: &str, gte: Option<&str>, lte: Option<&str>) -> bool {
    let Some(value) = values_at(source, field).into_iter().next() else {
        return false;
    };

    // Range-typed fields overlap the query range; plain instants fall inside it.
    let (start, end) = match value {
        JsonValue::Object(map) => (
            map.get("gte").and_then(JsonValue::as_str),
            map.get("lte").and_then(JsonValue::as_str),
        ),
        JsonValue::String(s) => (Some(s.as_str()), Some(s.as_str())),
        _ => return false,
    };

    let normalize = |s: Option<&str>| s.and_then(dates::parse_date);
    let (start, end) = (normalize(start), normalize(end));
    let (gte, lte) = (normalize(gte), normalize(lte));

    let after_lower = match (gte, end) {
        (Some(bound), Some(end)) => end >= bound,
        (Some(_), None) => false,
        (None, _) => true,
    };
    let before_upper = match (lte, start) {
        (Some(bound), Some(start)) => start <= bound,
        (Some(_), None) => false,
        (None, _) => true,
    };
    after_lower && before_upper
}

fn sort_key(sort: &[SortField], doc: &MemoryDocument) -> SortKey {
    sort.iter()
        .map(|s| {
            if s.field == "_id" {
                return JsonValue::String(doc.id.clone());
            }
            values_at(&doc.source, &s.field)
                .into_iter()
                .next()
                .cloned()
                .unwrap_or(JsonValue::Null)
        })
        .collect()
}

fn compare_values(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Null, _) => Ordering::Less,
        (_, JsonValue::Null) => Ordering::Greater,
        (JsonValue::Number(x), JsonValue::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn compare_keys(sort: &[SortField], a: &[JsonValue], b: &[JsonValue]) -> Ordering {
    for (i, field) in sort.iter().enumerate() {
        let ordering = match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => compare_values(x, y),
            _ => Ordering::Equal,
        };
        let ordering = match field.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn scan_stream(
    backend: MemoryBackend,
    query: BackendQuery,
    fail_midway: bool,
    delay: Option<Duration>,
) -> impl Stream<Item = Result<Hit>> + Send + 'static {
    try_stream! {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let hits: Vec<Hit> = backend
            .matching(&query)
            .into_iter()
            .map(|(key, doc)| to_hit(key, doc))
            .collect();
        let fail_at = if fail_midway { hits.len() / 2 } else { usize::MAX };

        for (i, hit) in hits.into_iter().enumerate() {
            if i == fail_at {
                Err(Error::BackendUnavailable("scan interrupted".to_string()))?;
            }
            yield hit;
        }
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn random_access_ceiling(&self) -> Option<u64> {
        self.inner.ceiling
    }

    async fn search(&self, query: &BackendQuery) -> Result<SearchResponse> {
        self.inner.calls.searches.fetch_add(1, AtomicOrdering::SeqCst);
        if let Ok(mut log) = self.inner.searches.lock() {
            log.push(query.clone());
        }

        if Self::take_fault(&self.inner.faults.unavailable_searches) {
            return Err(Error::BackendUnavailable("memory backend offline".to_string()));
        }

        if query.search_after.is_none() {
            if let Some(ceiling) = self.inner.ceiling {
                if query.window_end() > ceiling {
                    return Err(Error::ResultWindowTooLarge(format!(
                        "from + size must be less than or equal to [{}] but was [{}]",
                        ceiling,
                        query.window_end()
                    )));
                }
            }
        }

        let matched = self.matching(query);
        let total = TotalHits::exact(matched.len() as u64);

        let after: Vec<(SortKey, &MemoryDocument)> = match &query.search_after {
            Some(after) => matched
                .into_iter()
                .filter(|(key, _)| compare_keys(&query.sort, key, after) == Ordering::Greater)
                .collect(),
            None => matched,
        };

        let from = query.from.unwrap_or(0) as usize;
        let size = query.size.map(|s| s as usize).unwrap_or(10);
        let hits = after
            .into_iter()
            .skip(from)
            .take(size)
            .map(|(key, doc)| to_hit(key, doc))
            .collect();

        Ok(SearchResponse { total, hits })
    }

    async fn count(&self, query: &BackendQuery) -> Result<u64> {
        self.inner.calls.counts.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(delay) = Self::delay(&self.inner.faults.count_delay) {
            tokio::time::sleep(delay).await;
        }
        Ok(self.matching(query).len() as u64)
    }

    fn scan(&self, query: BackendQuery, _chunk_size: usize) -> BoxStream<'static, Result<Hit>> {
        self.inner.calls.scans.fetch_add(1, AtomicOrdering::SeqCst);
        let fail_midway = Self::take_fault(&self.inner.faults.failing_scans);
        let delay = Self::delay(&self.inner.faults.scan_delay);
        Box::pin(scan_stream(self.clone(), query, fail_midway, delay))
    }

    async fn get(&self, target: SearchTarget, id: &str) -> Result<Option<JsonValue>> {
        self.inner.calls.gets.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(self
            .documents(target)
            .iter()
            .find(|doc| doc.id == id)
            .map(|doc| doc.source.clone()))
    }
}
