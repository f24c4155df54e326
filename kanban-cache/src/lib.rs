mod key;

use bytes::Bytes;
use dashmap::DashMap;
use kanban_core::BackendId;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use key::CacheKey;

/// A cached operation result.
///
/// Entries are immutable; a newer result replaces the entry wholesale.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Serialised result payload.
    pub value: Bytes,
    /// Backend that produced the payload.
    pub source: BackendId,
    pub created_at: Instant,
    pub ttl: Duration,
    /// Cache generation observed before the backend read that produced `value`.
    pub generation: u64,
    pub key_spaces: Arc<[String]>,
}

impl CacheEntry {
    pub fn new(
        value: Bytes,
        source: BackendId,
        ttl: Duration,
        key_spaces: &[String],
        generation: u64,
    ) -> Self {
        CacheEntry {
            value,
            source,
            created_at: Instant::now(),
            ttl,
            generation,
            key_spaces: key_spaces.into(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }

    fn in_any(&self, key_spaces: &[String]) -> bool {
        self.key_spaces.iter().any(|s| key_spaces.contains(s))
    }
}

// ---------------------------------------------------------------------------
// CacheStore trait + InMemoryStore
// ---------------------------------------------------------------------------

/// Pluggable cache backend.
///
/// Implement this to replace the in-memory store with a networked one. The
/// generation contract must hold across processes sharing the store:
/// every [`invalidate`](Self::invalidate) advances the generation, and a
/// [`put`](Self::put) whose entry was read at an older generation than the
/// latest invalidation of any of its key spaces is refused.
pub trait CacheStore: Send + Sync + 'static {
    /// A live entry, or `None`. Expired entries are never returned.
    fn get<'a>(&'a self, key: &'a CacheKey) -> Pin<Box<dyn Future<Output = Option<CacheEntry>> + Send + 'a>>;

    /// Store `entry` unless one of its key spaces was invalidated after
    /// `entry.generation`. Returns whether the entry was stored.
    fn put(&self, key: CacheKey, entry: CacheEntry) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    /// Drop every entry in the given key spaces, returning how many were removed.
    fn invalidate<'a>(&'a self, key_spaces: &'a [String]) -> Pin<Box<dyn Future<Output = usize> + Send + 'a>>;

    fn generation(&self) -> Pin<Box<dyn Future<Output = u64> + Send + '_>>;

    fn remove<'a>(&'a self, key: &'a CacheKey) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    fn clear(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Remove expired entries, returning how many were removed.
    fn evict_expired(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>>;
}

/// Default in-memory cache store backed by `DashMap`.
///
/// Expired entries are evicted lazily on access and by [`evict_expired`](CacheStore::evict_expired).
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    /// Key space -> generation of its latest invalidation.
    marks: Arc<DashMap<String, u64>>,
    generation: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_stale(&self, entry: &CacheEntry) -> bool {
        entry.key_spaces.iter().any(|space| {
            self.marks
                .get(space)
                .is_some_and(|mark| *mark > entry.generation)
        })
    }
}

impl CacheStore for InMemoryStore {
    fn get<'a>(&'a self, key: &'a CacheKey) -> Pin<Box<dyn Future<Output = Option<CacheEntry>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(entry) = self.entries.get(key) {
                if !entry.is_expired() {
                    return Some(entry.value().clone());
                }
                // Expired: drop the read guard before removing
                drop(entry);
                self.entries.remove_if(key, |_, e| e.is_expired());
            }
            None
        })
    }

    fn put(&self, key: CacheKey, entry: CacheEntry) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            if entry.ttl.is_zero() || self.is_stale(&entry) {
                tracing::debug!(key = %key, "Refusing stale cache population");
                return false;
            }
            let generation = entry.generation;
            self.entries.insert(key.clone(), entry);

            // An invalidation may have marked a key space between the check
            // above and the insert; its sweep could have run before our insert.
            let raced = self
                .entries
                .get(&key)
                .is_some_and(|e| e.generation == generation && self.is_stale(&e));
            if raced {
                self.entries
                    .remove_if(&key, |_, e| e.generation == generation && self.is_stale(e));
                tracing::debug!(key = %key, "Cache population lost a race with invalidation");
                return false;
            }
            true
        })
    }

    fn invalidate<'a>(&'a self, key_spaces: &'a [String]) -> Pin<Box<dyn Future<Output = usize> + Send + 'a>> {
        Box::pin(async move {
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            for space in key_spaces {
                self.marks.insert(space.clone(), generation);
            }
            let before = self.entries.len();
            self.entries.retain(|_, e| !e.in_any(key_spaces));
            let removed = before.saturating_sub(self.entries.len());
            tracing::debug!(?key_spaces, generation, removed, "Cache invalidated");
            removed
        })
    }

    fn generation(&self) -> Pin<Box<dyn Future<Output = u64> + Send + '_>> {
        Box::pin(async move { self.generation.load(Ordering::Acquire) })
    }

    fn remove<'a>(&'a self, key: &'a CacheKey) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.entries.remove(key);
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.entries.clear();
        })
    }

    fn evict_expired(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(async move {
            let before = self.entries.len();
            self.entries.retain(|_, e| !e.is_expired());
            before.saturating_sub(self.entries.len())
        })
    }
}

/// A store that never holds anything, used when caching is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

impl CacheStore for NoopStore {
    fn get<'a>(&'a self, _key: &'a CacheKey) -> Pin<Box<dyn Future<Output = Option<CacheEntry>> + Send + 'a>> {
        Box::pin(async { None })
    }

    fn put(&self, _key: CacheKey, _entry: CacheEntry) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { false })
    }

    fn invalidate<'a>(&'a self, _key_spaces: &'a [String]) -> Pin<Box<dyn Future<Output = usize> + Send + 'a>> {
        Box::pin(async { 0 })
    }

    fn generation(&self) -> Pin<Box<dyn Future<Output = u64> + Send + '_>> {
        Box::pin(async { 0 })
    }

    fn remove<'a>(&'a self, _key: &'a CacheKey) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }

    fn evict_expired(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(async { 0 })
    }
}
