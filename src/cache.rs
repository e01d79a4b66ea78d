//! Bounded, time-expiring result cache with least-recently-used eviction.
//!
//! Keys come from [`crate::key::normalize`]. Expiry is lazy on `get` and is
//! also swept: `set` purges once per TTL period, and the server runs
//! [`spawn_sweeper`] in the background. Timestamps use
//! [`tokio::time::Instant`] so paused-clock tests can move time forward.

use crate::error::{Result, SearchError};
use crate::types::ResultItem;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<ResultItem>,
    inserted_at: Instant,
    last_accessed_at: Instant,
}

#[derive(Debug)]
struct Inner {
    entries: LruCache<String, CacheEntry>,
    last_sweep: Instant,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn purge(&mut self, ttl: Duration, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| is_expired(entry, ttl, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        self.last_sweep = now;
        expired.len()
    }
}

fn is_expired(entry: &CacheEntry, ttl: Duration, now: Instant) -> bool {
    now.saturating_duration_since(entry.inserted_at) >= ttl
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Process-wide result cache. A capacity of 0 disables caching entirely.
///
/// `get` and `set` fail once after the internal lock was poisoned; callers
/// treat that as a miss. The lock is recovered on that same call.
#[derive(Debug)]
pub struct ResultCache {
    inner: Option<Mutex<Inner>>,
    capacity: usize,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let inner = NonZeroUsize::new(capacity).map(|cap| {
            Mutex::new(Inner {
                entries: LruCache::new(cap),
                last_sweep: Instant::now(),
                hits: 0,
                misses: 0,
            })
        });
        Self {
            inner,
            capacity,
            ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Lock the entries, recovering from a poisoned lock.
    ///
    /// A panic while the lock was held leaves the entries untrusted, so
    /// recovery drops them all and clears the poison. The flag is `true` only
    /// for the call that performed the recovery.
    fn lock_recovering(&self) -> Option<(MutexGuard<'_, Inner>, bool)> {
        let mutex = self.inner.as_ref()?;
        match mutex.lock() {
            Ok(guard) => Some((guard, false)),
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                guard.entries.clear();
                mutex.clear_poison();
                warn!("cache lock was poisoned, dropped all entries");
                Some((guard, true))
            }
        }
    }

    /// Like [`Self::lock_recovering`], but surfaces the recovery as an error
    /// so the pipeline reports it once.
    fn lock(&self) -> Result<Option<MutexGuard<'_, Inner>>> {
        match self.lock_recovering() {
            None => Ok(None),
            Some((_, true)) => Err(SearchError::Cache(
                "cache lock was poisoned, entries were dropped".into(),
            )),
            Some((guard, false)) => Ok(Some(guard)),
        }
    }

    fn lock_quiet(&self) -> Option<MutexGuard<'_, Inner>> {
        self.lock_recovering().map(|(guard, _)| guard)
    }

    /// Poison the lock by panicking while holding it.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        if let Some(ref mutex) = self.inner {
            std::thread::scope(|scope| {
                let _ = scope
                    .spawn(|| {
                        let _guard = mutex.lock();
                        panic!("panicked while holding the cache lock");
                    })
                    .join();
            });
        }
    }

    /// Look up a key, promoting it to most-recently-used.
    ///
    /// An entry whose TTL has elapsed is removed and reported as absent.
    pub fn get(&self, key: &str) -> Result<Option<Vec<ResultItem>>> {
        let Some(mut guard) = self.lock()? else {
            return Ok(None);
        };
        let inner = &mut *guard;
        let now = Instant::now();
        let ttl = self.ttl;

        match inner.entries.get_mut(key) {
            None => {}
            Some(entry) => {
                if !is_expired(entry, ttl, now) {
                    entry.last_accessed_at = now;
                    let value = entry.value.clone();
                    inner.hits += 1;
                    return Ok(Some(value));
                }
                inner.entries.pop(key);
                debug!("dropped expired cache entry");
            }
        }
        inner.misses += 1;
        Ok(None)
    }

    /// Insert or replace an entry, resetting its age.
    ///
    /// When the cache is full and `key` is new, the least-recently-used entry
    /// is evicted first. No-op when caching is disabled.
    pub fn set(&self, key: String, value: Vec<ResultItem>) -> Result<()> {
        let Some(mut inner) = self.lock()? else {
            return Ok(());
        };
        let now = Instant::now();
        if now.saturating_duration_since(inner.last_sweep) >= self.ttl {
            let removed = inner.purge(self.ttl, now);
            if removed > 0 {
                debug!(removed, "swept expired cache entries");
            }
        }

        let entry = CacheEntry {
            value,
            inserted_at: now,
            last_accessed_at: now,
        };
        if let Some((evicted, _)) = inner.entries.push(key.clone(), entry) {
            if evicted != key {
                debug!("evicted least-recently-used cache entry");
            }
        }
        Ok(())
    }

    /// Remove every entry. Always succeeds, including when caching is
    /// disabled or the lock was poisoned.
    pub fn clear(&self) {
        if let Some(mut inner) = self.lock_quiet() {
            inner.entries.clear();
        }
    }

    /// Remove every expired entry. Returns whether anything was removed.
    pub fn purge_expired(&self) -> bool {
        match self.lock_quiet() {
            Some(mut inner) => inner.purge(self.ttl, Instant::now()) > 0,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock_quiet().map_or(0, |inner| inner.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from most- to least-recently-used.
    pub fn keys(&self) -> Vec<String> {
        match self.lock_quiet() {
            Some(inner) => inner.entries.iter().map(|(k, _)| k.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// When the entry for `key` was last read or written.
    pub fn last_accessed(&self, key: &str) -> Option<Instant> {
        self.lock_quiet()?
            .entries
            .peek(key)
            .map(|e| e.last_accessed_at)
    }

    pub fn stats(&self) -> CacheStats {
        match self.lock_quiet() {
            Some(inner) => CacheStats {
                entries: inner.entries.len(),
                capacity: self.capacity,
                hits: inner.hits,
                misses: inner.misses,
            },
            None => CacheStats {
                entries: 0,
                capacity: self.capacity,
                hits: 0,
                misses: 0,
            },
        }
    }
}

/// Periodically purge expired entries until the task is aborted.
pub fn spawn_sweeper(cache: Arc<ResultCache>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if cache.purge_expired() {
                debug!("background sweep removed expired entries");
            }
        }
    })
}
