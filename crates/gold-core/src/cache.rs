//! Ambient caches shared across indexer ticks (spec §5): a concurrent
//! triage-history cache invalidated on triage events, and a TTL-bounded LRU
//! cache of per-changelist sub-indices.
//!
//! Grounded on the teacher's background-refresh pattern
//! (`apps/ssp/src/background_saver.rs`): a concurrent map the hot path
//! reads without locking out writers, paired with explicit invalidation
//! rather than a blanket TTL for data that must be correct immediately
//! after a write.

use crate::digest::Digest;
use crate::expectations::{Grouping, Label};
use dashmap::DashMap;
use lru::LruCache;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-(grouping, digest) triage label, cached so repeated search queries
/// don't re-walk the expectations store. A triage event for a (grouping,
/// digest) pair must `invalidate` it immediately — this cache has no TTL,
/// because a stale "untriaged" after a human just triaged it is a bug, not
/// a cost/freshness tradeoff.
#[derive(Default)]
pub struct TriageHistoryCache {
    entries: DashMap<(Grouping, Digest), Label>,
}

impl TriageHistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, grouping: &Grouping, digest: &Digest) -> Option<Label> {
        self.entries
            .get(&(grouping.clone(), digest.clone()))
            .map(|r| *r)
    }

    pub fn put(&self, grouping: Grouping, digest: Digest, label: Label) {
        self.entries.insert((grouping, digest), label);
    }

    pub fn invalidate(&self, grouping: &Grouping, digest: &Digest) {
        self.entries.remove(&(grouping.clone(), digest.clone()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A value with an absolute expiry, used as the LRU payload so an entry can
/// be both capacity-evicted and time-evicted.
struct Expiring<V> {
    value: V,
    expires_at: Instant,
}

/// TTL + capacity bounded cache of per-changelist sub-indices (spec §4.10).
/// `Mutex<LruCache<..>>` matches the teacher's coarse-lock-around-a-std-
/// collection style for caches that are touched far less often than the
/// hot per-commit paths, where a lock-free structure would be overkill.
pub struct TtlLruCache<K: Eq + Hash + Clone, V: Clone> {
    inner: Mutex<LruCache<K, Expiring<V>>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlLruCache<K, V> {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().expect("ttl lru cache lock poisoned");
        match guard.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                guard.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: K, value: V) {
        let mut guard = self.inner.lock().expect("ttl lru cache lock poisoned");
        guard.put(
            key,
            Expiring {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ttl lru cache lock poisoned").len()
    }

    /// A snapshot of every key currently cached, expired or not — callers
    /// that need to distinguish "present but expired" from "absent" use
    /// `get` per key after this.
    pub fn keys(&self) -> Vec<K> {
        self.inner
            .lock()
            .expect("ttl lru cache lock poisoned")
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }
}
