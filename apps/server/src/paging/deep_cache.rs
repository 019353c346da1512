//! Deep-pagination cache
//!
//! Once a result set is larger than the backend's random-access window, the
//! whole set is streamed out once in sort order, split into fixed-size
//! internal pages and kept in memory. Any later page of the same query is a
//! slice of that materialization.
//!
//! Entry lifecycle per key:
//! - absent: the first requester marks the key `Generating` and spawns the
//!   scan. The scan runs to completion even if that requester goes away.
//! - generating: other requesters wait on the generation's completion
//!   signal for a bounded time, then re-check once and otherwise report
//!   [`CacheLookup::Pending`].
//! - ready: immutable pages shared behind an `Arc` until TTL or LRU eviction.
//!
//! A failed generation removes the key so a later request can retry.

use futures::StreamExt;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::backend::{BackendQuery, Hit, SearchBackend};
use crate::config::PagingConfig;
use crate::metrics::{
    CACHE_ENTRIES, CACHE_GENERATIONS_TOTAL, CACHE_GENERATION_DURATION_SECONDS, CACHE_LOOKUPS_TOTAL,
};
use crate::{Error, Result};

/// Deterministic key over the document-selecting parameters.
///
/// Parameters are taken in name order with values sorted, so neither
/// parameter order nor presentation/paging parameters change the key.
pub fn cache_key(params: &BTreeMap<String, Vec<String>>) -> String {
    // Every field is length-prefixed so no value can mimic a separator.
    fn field(hasher: &mut Sha256, bytes: &[u8]) {
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }

    let mut hasher = Sha256::new();
    hasher.update((params.len() as u64).to_le_bytes());
    for (name, values) in params {
        field(&mut hasher, name.as_bytes());
        hasher.update((values.len() as u64).to_le_bytes());
        for value in values {
            field(&mut hasher, value.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Fully materialized result set split into internal pages.
#[derive(Debug)]
pub struct CachedPages {
    pages: Vec<Vec<Hit>>,
    page_size: usize,
    total: usize,
}

impl CachedPages {
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Documents `[start, start + size)`, short if the set ends first.
    pub fn slice(&self, start: usize, size: usize) -> Vec<Hit> {
        if size == 0 || self.page_size == 0 {
            return Vec::new();
        }
        let start_page = start / self.page_size;
        let end_page = (start + size).div_ceil(self.page_size).min(self.pages.len());
        if start_page >= end_page {
            return Vec::new();
        }

        self.pages[start_page..end_page]
            .iter()
            .flatten()
            .skip(start - start_page * self.page_size)
            .take(size)
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
pub enum CacheLookup {
    Ready(Vec<Hit>),
    /// Another request is still generating this entry.
    Pending,
}

enum Slot {
    Generating(watch::Receiver<bool>),
    Ready {
        pages: Arc<CachedPages>,
        inserted_at: Instant,
    },
}

enum Action {
    Serve(Arc<CachedPages>),
    Wait(watch::Receiver<bool>),
    Generate(watch::Sender<bool>),
    GiveUp,
}

struct Inner {
    entries: Mutex<LruCache<String, Slot>>,
    page_size: usize,
    ttl: Duration,
    generation_wait: Duration,
}

#[derive(Clone)]
pub struct DeepPaginationCache {
    inner: Arc<Inner>,
}

impl DeepPaginationCache {
    pub fn new(config: &PagingConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(LruCache::new(capacity)),
                page_size: config.cache_page_size.max(1),
                ttl: config.cache_ttl(),
                generation_wait: config.generation_wait(),
            }),
        }
    }

    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a ready entry exists for `key`.
    pub fn contains_ready(&self, key: &str) -> bool {
        self.inner
            .entries
            .lock()
            .map(|entries| matches!(entries.peek(key), Some(Slot::Ready { .. })))
            .unwrap_or(false)
    }

    /// Documents `[start, start + size)` of `query`'s full result set.
    ///
    /// # Errors
    /// `Error::CacheGeneration` if this call started a generation and it
    /// failed. The key is released in that case.
    pub async fn get_page(
        &self,
        key: &str,
        backend: Arc<dyn SearchBackend>,
        query: BackendQuery,
        start: usize,
        size: usize,
    ) -> Result<CacheLookup> {
        let mut waited = false;
        loop {
            match self.next_action(key, waited)? {
                Action::Serve(pages) => return Ok(CacheLookup::Ready(pages.slice(start, size))),
                Action::GiveUp => return Ok(CacheLookup::Pending),
                Action::Wait(mut rx) => {
                    tracing::debug!(cache_key = key, "Waiting for cache generation");
                    // Timeout and a dropped sender both lead to one re-check.
                    let _ = tokio::time::timeout(self.inner.generation_wait, rx.changed()).await;
                    waited = true;
                }
                Action::Generate(tx) => {
                    let task = tokio::spawn(generate(
                        self.inner.clone(),
                        key.to_string(),
                        backend.clone(),
                        query.without_paging(),
                        tx,
                    ));
                    let pages = task.await.map_err(|e| {
                        Error::CacheGeneration(format!("generation task aborted: {}", e))
                    })??;
                    return Ok(CacheLookup::Ready(pages.slice(start, size)));
                }
            }
        }
    }

    fn next_action(&self, key: &str, waited: bool) -> Result<Action> {
        let mut entries = self
            .inner
            .entries
            .lock()
            .map_err(|_| Error::Internal("deep-pagination cache lock poisoned".to_string()))?;

        let mut expired = false;
        match entries.get(key) {
            Some(Slot::Ready { pages, inserted_at }) => {
                if inserted_at.elapsed() <= self.inner.ttl {
                    CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
                    return Ok(Action::Serve(pages.clone()));
                }
                expired = true;
            }
            Some(Slot::Generating(_)) if waited => {
                CACHE_LOOKUPS_TOTAL.with_label_values(&["pending"]).inc();
                return Ok(Action::GiveUp);
            }
            Some(Slot::Generating(rx)) => {
                CACHE_LOOKUPS_TOTAL.with_label_values(&["generating"]).inc();
                return Ok(Action::Wait(rx.clone()));
            }
            None => {}
        }

        if expired {
            entries.pop(key);
            CACHE_LOOKUPS_TOTAL.with_label_values(&["expired"]).inc();
        }

        // A waiter whose generation failed does not start another one.
        if waited {
            CACHE_LOOKUPS_TOTAL.with_label_values(&["pending"]).inc();
            return Ok(Action::GiveUp);
        }

        CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
        let (tx, rx) = watch::channel(false);
        entries.put(key.to_string(), Slot::Generating(rx));
        CACHE_ENTRIES.set(entries.len() as i64);
        Ok(Action::Generate(tx))
    }
}

async fn collect_pages(
    backend: &dyn SearchBackend,
    query: BackendQuery,
    page_size: usize,
) -> Result<CachedPages> {
    let mut stream = backend.scan(query, page_size);
    let mut pages = Vec::new();
    let mut current = Vec::with_capacity(page_size);
    let mut total = 0;

    while let Some(hit) = stream.next().await {
        current.push(hit?);
        total += 1;
        if current.len() == page_size {
            pages.push(std::mem::replace(&mut current, Vec::with_capacity(page_size)));
        }
    }
    if !current.is_empty() {
        pages.push(current);
    }

    Ok(CachedPages {
        pages,
        page_size,
        total,
    })
}

async fn generate(
    inner: Arc<Inner>,
    key: String,
    backend: Arc<dyn SearchBackend>,
    query: BackendQuery,
    done: watch::Sender<bool>,
) -> Result<Arc<CachedPages>> {
    let started = Instant::now();
    tracing::info!(cache_key = %key, backend = backend.name(), "Generating deep-pagination cache entry");

    let result = collect_pages(backend.as_ref(), query, inner.page_size).await;
    let elapsed = started.elapsed();
    CACHE_GENERATION_DURATION_SECONDS.observe(elapsed.as_secs_f64());

    let outcome = match inner.entries.lock() {
        Ok(mut entries) => {
            let outcome = match result {
                Ok(pages) => {
                    let pages = Arc::new(pages);
                    entries.put(
                        key.clone(),
                        Slot::Ready {
                            pages: pages.clone(),
                            inserted_at: Instant::now(),
                        },
                    );
                    Ok(pages)
                }
                Err(e) => {
                    if matches!(entries.peek(&key), Some(Slot::Generating(_))) {
                        entries.pop(&key);
                    }
                    Err(Error::CacheGeneration(e.to_string()))
                }
            };
            CACHE_ENTRIES.set(entries.len() as i64);
            outcome
        }
        Err(_) => Err(Error::CacheGeneration(
            "deep-pagination cache lock poisoned".to_string(),
        )),
    };

    match &outcome {
        Ok(pages) => {
            CACHE_GENERATIONS_TOTAL.with_label_values(&["success"]).inc();
            tracing::info!(
                cache_key = %key,
                documents = pages.len(),
                pages = pages.pages.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Deep-pagination cache entry ready"
            );
        }
        Err(e) => {
            CACHE_GENERATIONS_TOTAL.with_label_values(&["failure"]).inc();
            tracing::warn!(cache_key = %key, error = %e, "Deep-pagination cache generation failed");
        }
    }

    let _ = done.send(true);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryDocument};
    use crate::backend::{SearchTarget, SortOrder};
    use serde_json::json;

    fn documents(n: usize) -> Vec<MemoryDocument> {
        (0..n)
            .map(|i| {
                MemoryDocument::new(
                    format!("doc-{:06}", i),
                    json!({ "info": { "directory": "/neodc/esacci/cloud", "name": format!("f{:06}.nc", i) } }),
                )
            })
            .collect()
    }

    fn query() -> BackendQuery {
        BackendQuery::new(SearchTarget::Granules)
            .with_sort("info.directory", SortOrder::Asc)
            .with_sort("info.name", SortOrder::Asc)
    }

    fn config(wait: Duration) -> PagingConfig {
        PagingConfig {
            cache_page_size: 1000,
            generation_wait_seconds: wait.as_secs(),
            ..PagingConfig::default()
        }
    }

    fn ids(hits: &[Hit]) -> Vec<String> {
        hits.iter().map(|h| h.id.clone()).collect()
    }

    fn params(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_key_sensitivity() {
        let base = cache_key(&params(&[("ecv", &["CLOUD"]), ("parentIdentifier", &["abc"])]));
        let other_value = cache_key(&params(&[("ecv", &["AEROSOL"]), ("parentIdentifier", &["abc"])]));
        let other_parent = cache_key(&params(&[("ecv", &["CLOUD"]), ("parentIdentifier", &["xyz"])]));
        assert_ne!(base, other_value);
        assert_ne!(base, other_parent);
        assert_eq!(base.len(), 64);
        assert_eq!(
            base,
            cache_key(&params(&[("parentIdentifier", &["abc"]), ("ecv", &["CLOUD"])]))
        );
    }

    #[test]
    fn test_key_separators_inside_values() {
        assert_ne!(
            cache_key(&params(&[("ecv", &["X\nfoo=bar"])])),
            cache_key(&params(&[("ecv", &["X"]), ("foo", &["bar"])]))
        );
        assert_ne!(
            cache_key(&params(&[("a", &["b=c"])])),
            cache_key(&params(&[("a=b", &["c"])]))
        );
        assert_ne!(
            cache_key(&params(&[("ecv", &["CLOUD", "OZONE"])])),
            cache_key(&params(&[("ecv", &["CLOUDOZONE"])]))
        );
    }

    #[test]
    fn test_slice_spanning_pages_and_short_tail() {
        let hits: Vec<Hit> = (0..2500)
            .map(|i| Hit {
                id: i.to_string(),
                sort: None,
                source: json!(null),
            })
            .collect();
        let pages = CachedPages {
            pages: hits.chunks(1000).map(|c| c.to_vec()).collect(),
            page_size: 1000,
            total: 2500,
        };

        let slice = pages.slice(990, 20);
        assert_eq!(slice.first().unwrap().id, "990");
        assert_eq!(slice.last().unwrap().id, "1009");

        let tail = pages.slice(2490, 37);
        assert_eq!(tail.len(), 10);
        assert!(pages.slice(2500, 10).is_empty());
        assert!(pages.slice(0, 0).is_empty());
    }

    #[tokio::test]
    async fn test_page_matches_full_result_order() {
        let backend = MemoryBackend::new(documents(25_000), Vec::new(), Some(10_000));
        let cache = DeepPaginationCache::new(&config(Duration::from_secs(30)));

        let lookup = cache
            .get_page("k", Arc::new(backend.clone()), query(), 12_050, 37)
            .await
            .unwrap();
        let CacheLookup::Ready(hits) = lookup else {
            panic!("expected a ready page");
        };

        let expected: Vec<String> = (12_050..12_087).map(|i| format!("doc-{:06}", i)).collect();
        assert_eq!(ids(&hits), expected);
        assert_eq!(backend.scan_count(), 1);

        // Second lookup is served from memory.
        cache
            .get_page("k", Arc::new(backend.clone()), query(), 24_990, 37)
            .await
            .unwrap();
        assert_eq!(backend.scan_count(), 1);
        assert!(cache.contains_ready("k"));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_generation() {
        let backend = MemoryBackend::new(documents(3_000), Vec::new(), None);
        backend.set_scan_delay(Some(Duration::from_millis(50)));
        let cache = DeepPaginationCache::new(&config(Duration::from_secs(30)));
        let shared: Arc<dyn SearchBackend> = Arc::new(backend.clone());

        let (a, b) = tokio::join!(
            cache.get_page("k", shared.clone(), query(), 1_500, 10),
            cache.get_page("k", shared.clone(), query(), 1_500, 10),
        );

        let (CacheLookup::Ready(a), CacheLookup::Ready(b)) = (a.unwrap(), b.unwrap()) else {
            panic!("both requests should see the generated entry");
        };
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(backend.scan_count(), 1);
    }

    #[tokio::test]
    async fn test_pending_when_generation_outlasts_wait() {
        let backend = MemoryBackend::new(documents(100), Vec::new(), None);
        backend.set_scan_delay(Some(Duration::from_millis(300)));
        let cache = DeepPaginationCache::new(&PagingConfig {
            generation_wait_seconds: 0,
            ..config(Duration::ZERO)
        });
        let shared: Arc<dyn SearchBackend> = Arc::new(backend.clone());

        let first = tokio::spawn({
            let cache = cache.clone();
            let shared = shared.clone();
            async move { cache.get_page("k", shared, query(), 0, 10).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = cache.get_page("k", shared, query(), 0, 10).await.unwrap();
        assert!(matches!(second, CacheLookup::Pending));

        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, CacheLookup::Ready(ref hits) if hits.len() == 10));
        assert_eq!(backend.scan_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_generation_releases_key() {
        let backend = MemoryBackend::new(documents(500), Vec::new(), None);
        backend.fail_next_scans(1);
        let cache = DeepPaginationCache::new(&config(Duration::from_secs(30)));
        let shared: Arc<dyn SearchBackend> = Arc::new(backend.clone());

        let err = cache
            .get_page("k", shared.clone(), query(), 0, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CacheGeneration(_)));
        assert!(cache.is_empty());

        let retry = cache.get_page("k", shared, query(), 490, 20).await.unwrap();
        assert!(matches!(retry, CacheLookup::Ready(ref hits) if hits.len() == 10));
        assert_eq!(backend.scan_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_regenerated() {
        let backend = MemoryBackend::new(documents(50), Vec::new(), None);
        let cache = DeepPaginationCache::new(&PagingConfig {
            cache_ttl_seconds: 0,
            ..config(Duration::from_secs(30))
        });
        let shared: Arc<dyn SearchBackend> = Arc::new(backend.clone());

        cache.get_page("k", shared.clone(), query(), 0, 10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.get_page("k", shared, query(), 0, 10).await.unwrap();
        assert_eq!(backend.scan_count(), 2);
    }
}
