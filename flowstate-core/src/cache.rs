//! Read-through query cache
//!
//! [`CachedSource`] sits in front of any [`RowSource`] and remembers the rows
//! returned for each [`RowQuery`] for a fixed time-to-live. Identical queries
//! within the TTL reuse the stored rows, and concurrent callers asking for
//! the same query share a single fetch. [`CachedSource::refresh`] drops every
//! entry regardless of age.
//!
//! With [`CachedSource::persist_to`] entries are also written to one JSON
//! file per query, so later processes reuse them until the TTL runs out or a
//! refresh removes the files.

use crate::error::Result;
use crate::source::{RowQuery, RowSource};
use crate::types::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stable fingerprint of a query, used as the cache key.
pub fn query_fingerprint(query: &RowQuery) -> String {
    let canonical = serde_json::to_vec(query).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// Short directory name for one row location, so persisted caches of
/// different data directories never mix.
pub fn location_key(location: &Path) -> String {
    let canonical = location
        .canonicalize()
        .unwrap_or_else(|_| location.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

struct CacheEntry {
    rows: Arc<Vec<Event>>,
    fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        (Utc::now() - self.fetched_at)
            .to_std()
            .map_or(false, |age| age < ttl)
    }
}

/// On-disk form of one entry.
#[derive(Serialize, Deserialize)]
struct StoredEntry<R> {
    fetched_at: DateTime<Utc>,
    query: RowQuery,
    rows: R,
}

/// One key's entry. Its lock is held across the inner fetch.
type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// A [`RowSource`] wrapper that caches results per query.
pub struct CachedSource<S> {
    inner: S,
    ttl: Duration,
    dir: Option<PathBuf>,
    slots: Mutex<HashMap<String, Slot>>,
    counters: Mutex<(u64, u64)>,
}

impl<S: RowSource> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            dir: None,
            slots: Mutex::new(HashMap::new()),
            counters: Mutex::new((0, 0)),
        }
    }

    /// Also keep entries as files in `dir`.
    pub fn persist_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Rows for `query`, from the cache when fresh.
    pub fn fetch_shared(&self, query: &RowQuery) -> Result<Arc<Vec<Event>>> {
        let key = query_fingerprint(query);
        let slot = self.slot(&key);

        // Callers of the same key queue here behind the first fetch.
        let mut entry = slot.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(cached) = entry.as_ref().filter(|c| c.is_fresh(self.ttl)) {
            self.count(true);
            tracing::debug!(?query, key = %&key[..12], "Query cache hit");
            return Ok(Arc::clone(&cached.rows));
        }

        if let Some(stored) = self.load(&key).filter(|c| c.is_fresh(self.ttl)) {
            self.count(true);
            tracing::debug!(?query, key = %&key[..12], "Query cache hit on disk");
            let rows = Arc::clone(&stored.rows);
            *entry = Some(stored);
            return Ok(rows);
        }

        self.count(false);
        let rows = Arc::new(self.inner.fetch(query)?);
        tracing::debug!(
            ?query,
            key = %&key[..12],
            rows = rows.len(),
            source = self.inner.name(),
            "Query cache miss"
        );

        let fresh = CacheEntry {
            rows: Arc::clone(&rows),
            fetched_at: Utc::now(),
        };
        self.store(&key, query, &fresh);
        *entry = Some(fresh);
        Ok(rows)
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{}.json", key)))
    }

    fn load(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key)?;
        let raw = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<StoredEntry<Vec<Event>>>(&raw) {
            Ok(stored) => Some(CacheEntry {
                rows: Arc::new(stored.rows),
                fetched_at: stored.fetched_at,
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable cache file");
                None
            }
        }
    }

    /// Write-through to disk. Failures only cost a refetch next time.
    fn store(&self, key: &str, query: &RowQuery, entry: &CacheEntry) {
        let (Some(dir), Some(path)) = (self.dir.as_ref(), self.entry_path(key)) else {
            return;
        };
        let stored = StoredEntry {
            fetched_at: entry.fetched_at,
            query: *query,
            rows: entry.rows.as_slice(),
        };
        if let Err(e) = write_entry(dir, &path, &stored) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to persist cache entry");
        }
    }

    fn count(&self, hit: bool) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        if hit {
            counters.0 += 1;
        } else {
            counters.1 += 1;
        }
    }

    /// Drop every cached entry, in memory and on disk.
    pub fn refresh(&self) {
        let dropped = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let dropped = slots.len();
            slots.clear();
            dropped
        };

        let mut removed = 0usize;
        if let Some(dir) = &self.dir {
            if let Ok(listing) = std::fs::read_dir(dir) {
                for path in listing.flatten().map(|e| e.path()) {
                    if path.extension().map_or(false, |ext| ext == "json") {
                        match std::fs::remove_file(&path) {
                            Ok(()) => removed += 1,
                            Err(e) => tracing::warn!(
                                path = %path.display(),
                                error = %e,
                                "Failed to remove cache file"
                            ),
                        }
                    }
                }
            }
        }
        tracing::info!(dropped, removed, "Query cache refreshed");
    }

    pub fn stats(&self) -> CacheStats {
        let (hits, misses) = *self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        let entries = slots
            .iter()
            .filter(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).is_some())
            .count();
        CacheStats {
            hits,
            misses,
            entries,
        }
    }
}

fn write_entry<T: Serialize>(dir: &Path, path: &Path, stored: &T) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(path, serde_json::to_vec(stored)?)?;
    Ok(())
}

impl<S: RowSource> RowSource for CachedSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fetch(&self, query: &RowQuery) -> Result<Vec<Event>> {
        Ok(self.fetch_shared(query)?.as_ref().clone())
    }

    fn refresh(&self) {
        CachedSource::refresh(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodKey;
    use crate::types::{Chain, Dataset};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how often it is asked for rows.
    struct CountingSource {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl RowSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn fetch(&self, _query: &RowQuery) -> Result<Vec<Event>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            let ts = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();
            Ok(vec![Event::new(format!("row{}", n), ts, Chain::Cadence)])
        }
    }

    fn counting() -> CountingSource {
        CountingSource {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn slow() -> CountingSource {
        CountingSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_identical_queries_reuse_rows() {
        let cache = CachedSource::new(counting(), Duration::from_secs(600));
        let query = RowQuery::for_period(Dataset::Transactions, PeriodKey::LastWeek);

        let first = cache.fetch(&query).unwrap();
        let second = cache.fetch(&query).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_different_queries_miss() {
        let cache = CachedSource::new(counting(), Duration::from_secs(600));
        cache
            .fetch(&RowQuery::for_period(Dataset::Transactions, PeriodKey::LastWeek))
            .unwrap();
        cache
            .fetch(&RowQuery::for_period(Dataset::Transactions, PeriodKey::LastMonth))
            .unwrap();
        cache
            .fetch(&RowQuery::full_history(Dataset::Transactions).with_category(Chain::Evm))
            .unwrap();
        assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_refresh_invalidates_everything() {
        let cache = CachedSource::new(counting(), Duration::from_secs(600));
        let query = RowQuery::full_history(Dataset::Accounts);
        let before = cache.fetch(&query).unwrap();
        cache.refresh();
        assert_eq!(cache.stats().entries, 0);
        let after = cache.fetch(&query).unwrap();
        assert_ne!(before, after);
        assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expired_entries_refetch() {
        let cache = CachedSource::new(counting(), Duration::ZERO);
        let query = RowQuery::full_history(Dataset::Staking);
        cache.fetch(&query).unwrap();
        cache.fetch(&query).unwrap();
        assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = RowQuery::for_period(Dataset::Transactions, PeriodKey::Last24h);
        let b = RowQuery::for_period(Dataset::Transactions, PeriodKey::Last24h);
        assert_eq!(query_fingerprint(&a), query_fingerprint(&b));
        assert_ne!(
            query_fingerprint(&a),
            query_fingerprint(&a.with_category(Chain::Evm))
        );
        assert_eq!(query_fingerprint(&a).len(), 64);
    }

    #[test]
    fn test_concurrent_identical_queries_fetch_once() {
        let cache = CachedSource::new(slow(), Duration::from_secs(600));
        let query = RowQuery::for_period(Dataset::Transactions, PeriodKey::LastWeek);

        let (cache_ref, query_ref) = (&cache, &query);
        let results: Vec<Vec<Event>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(move || cache_ref.fetch(query_ref).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (3, 1, 1));
    }

    #[test]
    fn test_concurrent_different_queries_do_not_wait_on_each_other() {
        let cache = CachedSource::new(slow(), Duration::from_secs(600));
        let queries = [
            RowQuery::full_history(Dataset::Transactions),
            RowQuery::full_history(Dataset::Accounts),
        ];

        std::thread::scope(|scope| {
            for query in &queries {
                let cache = &cache;
                scope.spawn(move || cache.fetch(query).unwrap());
            }
        });
        assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn test_persisted_entries_outlive_the_instance() {
        let temp = tempfile::TempDir::new().unwrap();
        let query = RowQuery::for_period(Dataset::Transactions, PeriodKey::LastMonth);

        let first = CachedSource::new(counting(), Duration::from_secs(600)).persist_to(temp.path());
        let rows = first.fetch(&query).unwrap();
        assert!(temp
            .path()
            .join(format!("{}.json", query_fingerprint(&query)))
            .is_file());

        let second = CachedSource::new(counting(), Duration::from_secs(600)).persist_to(temp.path());
        assert_eq!(second.fetch(&query).unwrap(), rows);
        assert_eq!(second.inner().calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.stats().hits, 1);
    }

    #[test]
    fn test_refresh_removes_persisted_entries() {
        let temp = tempfile::TempDir::new().unwrap();
        let query = RowQuery::full_history(Dataset::Staking);

        let first = CachedSource::new(counting(), Duration::from_secs(600)).persist_to(temp.path());
        first.fetch(&query).unwrap();

        let second = CachedSource::new(counting(), Duration::from_secs(600)).persist_to(temp.path());
        second.refresh();
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
        second.fetch(&query).unwrap();
        assert_eq!(second.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_or_corrupt_files_are_refetched() {
        let temp = tempfile::TempDir::new().unwrap();
        let query = RowQuery::full_history(Dataset::Accounts);

        let expired = CachedSource::new(counting(), Duration::ZERO).persist_to(temp.path());
        expired.fetch(&query).unwrap();
        expired.fetch(&query).unwrap();
        assert_eq!(expired.inner().calls.load(Ordering::SeqCst), 2);

        let path = temp.path().join(format!("{}.json", query_fingerprint(&query)));
        std::fs::write(&path, b"{not json").unwrap();
        let cache = CachedSource::new(counting(), Duration::from_secs(600)).persist_to(temp.path());
        cache.fetch(&query).unwrap();
        assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_location_key_separates_directories() {
        let a = tempfile::TempDir::new().unwrap();
        let b = tempfile::TempDir::new().unwrap();
        assert_eq!(location_key(a.path()), location_key(a.path()));
        assert_ne!(location_key(a.path()), location_key(b.path()));
        assert_eq!(location_key(a.path()).len(), 16);
    }
}
