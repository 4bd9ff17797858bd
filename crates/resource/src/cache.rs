//! Byte-budgeted LRU cache for render-time sub-resources.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use log::{debug, warn};
use lru::LruCache;
use quire_traits::SharedResourceData;
use serde::Serialize;

pub const DEFAULT_BUDGET_MB: usize = 50;

/// A cached payload.
#[derive(Debug, Clone)]
pub struct CachedAsset {
    pub body: SharedResourceData,
    pub content_type: String,
    pub size: usize,
    pub last_access: Instant,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub bytes: usize,
    pub entries: usize,
    pub budget_bytes: usize,
}

impl CacheStats {
    /// Hit rate in percent; `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 * 100.0 / lookups as f64
        }
    }
}

struct CacheState {
    entries: LruCache<String, CachedAsset>,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// LRU cache whose total payload size never exceeds `budget_bytes`.
///
/// All operations take one short-lived lock; nothing is awaited while holding it.
pub struct AssetCache {
    state: Mutex<CacheState>,
    budget_bytes: usize,
}

impl AssetCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            budget_bytes,
        }
    }

    pub fn with_megabytes(megabytes: usize) -> Self {
        Self::new(megabytes.saturating_mul(1024 * 1024))
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("[CACHE] Recovered from poisoned cache lock");
                poisoned.into_inner()
            }
        }
    }

    /// Returns the entry for `key`, marking it most recently used.
    pub fn lookup(&self, key: &str) -> Option<CachedAsset> {
        let mut state = self.lock();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = Instant::now();
                let found = entry.clone();
                state.hits += 1;
                Some(found)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Inserts or replaces `key`, evicting least recently used entries until the
    /// payload fits. Returns `false` (and caches nothing) when the payload alone is
    /// larger than the budget.
    pub fn store(
        &self,
        key: impl Into<String>,
        body: SharedResourceData,
        content_type: impl Into<String>,
    ) -> bool {
        let key = key.into();
        let size = body.len();
        if size > self.budget_bytes {
            debug!(
                "[CACHE] Not caching {} ({} bytes exceeds budget of {})",
                key, size, self.budget_bytes
            );
            return false;
        }

        let mut state = self.lock();
        if let Some(previous) = state.entries.pop(&key) {
            state.bytes -= previous.size;
        }
        while state.bytes + size > self.budget_bytes {
            match state.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    state.bytes -= evicted.size;
                    state.evictions += 1;
                    debug!("[CACHE] Evicted {} ({} bytes)", evicted_key, evicted.size);
                }
                None => break,
            }
        }
        state.entries.put(
            key,
            CachedAsset {
                body,
                content_type: content_type.into(),
                size,
                last_access: Instant::now(),
            },
        );
        state.bytes += size;
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains(key)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            bytes: state.bytes,
            entries: state.entries.len(),
            budget_bytes: self.budget_bytes,
        }
    }

    /// Drops every entry and resets the counters.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.bytes = 0;
        state.hits = 0;
        state.misses = 0;
        state.evictions = 0;
    }
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::with_megabytes(DEFAULT_BUDGET_MB)
    }
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("stats", &self.stats())
            .finish()
    }
}
