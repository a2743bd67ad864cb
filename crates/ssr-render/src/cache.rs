//! Byte-bounded LRU cache.
//!
//! [`ByteBoundedCache`] maps keys to `(payload, size_bytes)` pairs and evicts
//! least-recently-used entries until the summed size fits the configured
//! capacity. The writer supplies every entry's size; the cache never measures
//! payloads.
//!
//! # Lifecycle
//!
//! A cache starts unconfigured. [`configure`](ByteBoundedCache::configure)
//! fixes its capacity exactly once; reconfiguring requires an explicit
//! [`teardown`](ByteBoundedCache::teardown) first. [`clear`](ByteBoundedCache::clear)
//! drops entries but keeps the capacity.
//!
//! # Diagnostics
//!
//! Every insert, hit, miss, eviction and clear is reported to a
//! [`CacheObserver`]. The default [`TracingObserver`] logs at `debug`; swap in
//! [`NoopObserver`] (or a custom observer) without touching cache semantics.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use lru::LruCache;
use serde::Serialize;

use crate::error::CacheError;

/// Occupancy snapshot reported to observers and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: usize,
    pub capacity_bytes: usize,
}

impl CacheStats {
    /// Fraction of the capacity in use; `0.0` for a zero-capacity cache.
    pub fn fullness(&self) -> f64 {
        if self.capacity_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.capacity_bytes as f64
        }
    }
}

/// Side channel for cache diagnostics. All methods default to no-ops.
pub trait CacheObserver<K> {
    fn on_insert(&self, _key: &K, _size_bytes: usize, _stats: &CacheStats) {}
    fn on_hit(&self, _key: &K, _stats: &CacheStats) {}
    fn on_miss(&self, _key: &K, _stats: &CacheStats) {}
    fn on_evict(&self, _key: &K, _size_bytes: usize, _stats: &CacheStats) {}
    fn on_clear(&self, _stats: &CacheStats) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl<K> CacheObserver<K> for NoopObserver {}

/// Observer that logs every event through `tracing` at `debug` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl<K: fmt::Display> CacheObserver<K> for TracingObserver {
    fn on_insert(&self, key: &K, size_bytes: usize, stats: &CacheStats) {
        tracing::debug!("CACHE set {key} {size_bytes}");
        log_fullness(stats);
    }

    fn on_hit(&self, key: &K, _stats: &CacheStats) {
        tracing::debug!("CACHE hit {key}");
    }

    fn on_miss(&self, key: &K, stats: &CacheStats) {
        tracing::debug!("CACHE miss {key}");
        log_fullness(stats);
    }

    fn on_evict(&self, key: &K, size_bytes: usize, stats: &CacheStats) {
        tracing::debug!("CACHE dispose {key} {size_bytes}");
        log_fullness(stats);
    }

    fn on_clear(&self, _stats: &CacheStats) {
        tracing::debug!("CACHE reset");
    }
}

fn log_fullness(stats: &CacheStats) {
    tracing::debug!(
        "CACHE full {:.3} length {} items {}",
        stats.fullness(),
        stats.used_bytes,
        stats.entries
    );
}

struct Entry<V> {
    payload: V,
    size_bytes: usize,
}

struct Store<K: Hash + Eq, V> {
    entries: LruCache<K, Entry<V>>,
    capacity_bytes: usize,
    used_bytes: usize,
}

impl<K: Hash + Eq, V> Store<K, V> {
    fn new(capacity_bytes: usize) -> Self {
        Self {
            // Recency only; the byte budget is enforced by `put`.
            entries: LruCache::unbounded(),
            capacity_bytes,
            used_bytes: 0,
        }
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            used_bytes: self.used_bytes,
            capacity_bytes: self.capacity_bytes,
        }
    }
}

enum CacheState<K: Hash + Eq, V> {
    Unconfigured,
    Configured(Store<K, V>),
}

/// LRU cache bounded by the sum of caller-supplied entry sizes.
pub struct ByteBoundedCache<K: Hash + Eq, V> {
    state: CacheState<K, V>,
    observer: Box<dyn CacheObserver<K>>,
}

impl<K, V> ByteBoundedCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Display + 'static,
{
    /// Create an unconfigured cache that logs through [`TracingObserver`].
    pub fn new() -> Self {
        Self::with_observer(TracingObserver)
    }

    /// Create and configure a cache in one step.
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        let mut cache = Self::new();
        cache.state = CacheState::Configured(Store::new(capacity_bytes));
        cache
    }
}

impl<K, V> Default for ByteBoundedCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Display + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ByteBoundedCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Display,
{
    /// Create an unconfigured cache reporting to `observer`.
    pub fn with_observer(observer: impl CacheObserver<K> + 'static) -> Self {
        Self {
            state: CacheState::Unconfigured,
            observer: Box::new(observer),
        }
    }

    /// Fix the capacity. Fails if the cache is already configured.
    pub fn configure(&mut self, capacity_bytes: usize) -> Result<(), CacheError> {
        if let CacheState::Configured(store) = &self.state {
            return Err(CacheError::AlreadyConfigured {
                capacity_bytes: store.capacity_bytes,
            });
        }
        self.state = CacheState::Configured(Store::new(capacity_bytes));
        tracing::debug!("CACHE init {capacity_bytes}");
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        matches!(self.state, CacheState::Configured(_))
    }

    /// Insert `payload` under `key`, accounted as `size_bytes`.
    ///
    /// Replaces any existing entry for `key`, then evicts least-recently-used
    /// entries until the total size fits the capacity. An entry larger than the
    /// whole capacity is rejected without evicting anything else; a previous
    /// entry under the same key is dropped.
    pub fn put(&mut self, key: K, payload: V, size_bytes: Option<usize>) -> Result<(), CacheError> {
        let Some(size_bytes) = size_bytes else {
            return Err(CacheError::MissingSize {
                key: key.to_string(),
            });
        };
        let CacheState::Configured(store) = &mut self.state else {
            return Err(CacheError::NotConfigured);
        };

        if size_bytes > store.capacity_bytes {
            tracing::warn!(
                "CACHE entry {key} ({size_bytes} bytes) exceeds capacity {}; it will not be retained",
                store.capacity_bytes
            );
            if let Some(stale) = store.entries.pop(&key) {
                store.used_bytes -= stale.size_bytes;
                self.observer.on_evict(&key, stale.size_bytes, &store.stats());
            }
            return Ok(());
        }

        if let Some(previous) = store.entries.put(key.clone(), Entry { payload, size_bytes }) {
            store.used_bytes -= previous.size_bytes;
        }
        store.used_bytes += size_bytes;
        self.observer.on_insert(&key, size_bytes, &store.stats());

        while store.used_bytes > store.capacity_bytes {
            let Some((evicted, entry)) = store.entries.pop_lru() else {
                break;
            };
            store.used_bytes -= entry.size_bytes;
            self.observer.on_evict(&evicted, entry.size_bytes, &store.stats());
        }
        Ok(())
    }

    /// Look up `key`, refreshing its recency on a hit.
    ///
    /// Absent keys (and an unconfigured cache) yield `None`, never an error.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let CacheState::Configured(store) = &mut self.state else {
            return None;
        };
        let stats = store.stats();
        match store.entries.get(key) {
            Some(entry) => {
                self.observer.on_hit(key, &stats);
                Some(&entry.payload)
            }
            None => {
                self.observer.on_miss(key, &stats);
                None
            }
        }
    }

    /// Look up `key` without touching recency or notifying the observer.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match &self.state {
            CacheState::Configured(store) => store.entries.peek(key).map(|entry| &entry.payload),
            CacheState::Unconfigured => None,
        }
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.peek(key).is_some()
    }

    /// Drop every entry, keeping the capacity. No-op when unconfigured.
    pub fn clear(&mut self) {
        if let CacheState::Configured(store) = &mut self.state {
            store.entries.clear();
            store.used_bytes = 0;
            self.observer.on_clear(&store.stats());
        }
    }

    /// Release every entry and the capacity; `configure` must be called again
    /// before the next `put`.
    pub fn teardown(&mut self) {
        self.state = CacheState::Unconfigured;
        tracing::debug!("CACHE teardown");
    }

    pub fn stats(&self) -> Option<CacheStats> {
        match &self.state {
            CacheState::Configured(store) => Some(store.stats()),
            CacheState::Unconfigured => None,
        }
    }

    pub fn len(&self) -> usize {
        self.stats().map_or(0, |stats| stats.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Unit tests ────────────────────────────────────────────────────────────────
