#![forbid(unsafe_code)]

//! LRU cache of rendered results keyed by configuration fingerprint.
//!
//! When a card unmounts, its rendered results are stored here under the
//! fingerprint of its configuration. A card mounted later with an identical
//! configuration starts from that snapshot instead of rendering blank fields
//! until the backend pushes again.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use tcard_core::{CardConfig, FieldKey, Fingerprint, ResultSet, TemplateResult};
//! use tcard_runtime::ResultCache;
//!
//! let mut cache = ResultCache::new(1000);
//! let fp = Fingerprint::of(&CardConfig::stub());
//!
//! let mut results = ResultSet::new();
//! results.set(FieldKey::Primary, TemplateResult::inert("Hello, Ada"));
//! cache.set(fp, results);
//!
//! assert!(cache.has(fp));
//! let restored: Arc<ResultSet> = cache.get(fp).unwrap();
//! assert_eq!(restored.value(FieldKey::Primary), Some("Hello, Ada"));
//! assert_eq!(cache.stats().hits, 1);
//! ```
//!
//! # Sharing
//!
//! Snapshots are stored as `Arc<ResultSet>` and never mutated; `set` on an
//! existing key swaps the whole entry. [`SharedResultCache`] puts one cache
//! behind a mutex so every card in the process can read and write it. Two
//! cards with the same configuration share the same entry.

use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tcard_core::{Fingerprint, ResultSet};

use crate::config::RuntimeConfig;

/// Default cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// `get` calls that found an entry.
    pub hits: u64,
    /// `get` calls that found nothing.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Current number of entries.
    pub size: usize,
    /// Maximum capacity.
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate (0.0 to 1.0).
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded LRU map from configuration fingerprint to result snapshot.
///
/// Not thread-safe on its own; see [`SharedResultCache`].
#[derive(Debug)]
pub struct ResultCache {
    cache: LruCache<Fingerprint, Arc<ResultSet>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ResultCache {
    /// Create a cache holding at most `capacity` snapshots.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(clamp_capacity(capacity)),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Create a cache with the default capacity (1000 entries).
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }

    /// Whether a snapshot exists for `fingerprint`. Does not touch recency.
    #[must_use]
    pub fn has(&self, fingerprint: Fingerprint) -> bool {
        self.cache.contains(&fingerprint)
    }

    /// Snapshot stored for `fingerprint`, marking it most recently used.
    pub fn get(&mut self, fingerprint: Fingerprint) -> Option<Arc<ResultSet>> {
        match self.cache.get(&fingerprint) {
            Some(snapshot) => {
                self.hits += 1;
                Some(Arc::clone(snapshot))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Peek at a snapshot without updating recency or stats.
    #[must_use]
    pub fn peek(&self, fingerprint: Fingerprint) -> Option<&Arc<ResultSet>> {
        self.cache.peek(&fingerprint)
    }

    /// Store `snapshot`, replacing any previous entry for `fingerprint`.
    ///
    /// When the cache is full the least recently used entry is evicted.
    pub fn set(&mut self, fingerprint: Fingerprint, snapshot: impl Into<Arc<ResultSet>>) {
        if let Some((evicted, _)) = self.cache.push(fingerprint, snapshot.into()) {
            if evicted != fingerprint {
                self.evictions += 1;
                tracing::trace!(%evicted, "result cache evicted least recently used entry");
            }
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            size: self.cache.len(),
            capacity: self.cache.cap().get(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn clamp_capacity(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared cache
// ─────────────────────────────────────────────────────────────────────────────

static GLOBAL_CACHE: LazyLock<SharedResultCache> = LazyLock::new(|| {
    let config = RuntimeConfig::from_env();
    SharedResultCache::new(config.cache_capacity)
});

/// A [`ResultCache`] shared between card instances.
///
/// Cloning shares the same underlying cache.
#[derive(Debug, Clone)]
pub struct SharedResultCache {
    inner: Arc<Mutex<ResultCache>>,
}

impl SharedResultCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ResultCache::new(capacity))),
        }
    }

    /// The process-wide cache, sized from [`RuntimeConfig::from_env`].
    #[must_use]
    pub fn global() -> Self {
        GLOBAL_CACHE.clone()
    }

    #[must_use]
    pub fn has(&self, fingerprint: Fingerprint) -> bool {
        self.lock().has(fingerprint)
    }

    pub fn get(&self, fingerprint: Fingerprint) -> Option<Arc<ResultSet>> {
        self.lock().get(fingerprint)
    }

    pub fn set(&self, fingerprint: Fingerprint, snapshot: impl Into<Arc<ResultSet>>) {
        self.lock().set(fingerprint, snapshot);
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.lock().stats()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Whether both handles point at the same cache.
    #[must_use]
    pub fn same_cache(&self, other: &SharedResultCache) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // Cache operations are total, even across a poisoned lock.
    fn lock(&self) -> MutexGuard<'_, ResultCache> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SharedResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
