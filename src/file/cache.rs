//! Bounded Handle Cache
//!
//! Maps file numbers to shared values (open file handles in practice) and
//! pins each value while a [`Pinned`] guard is alive.
//!
//! ## Growth policy
//! - Inserting into a full cache evicts unpinned entries in the order the
//!   [`EvictionPolicy`] prefers.
//! - If every entry is pinned the cache grows past its capacity instead of
//!   blocking.
//! - When the last pin of an entry is released, the cache shrinks back
//!   toward its capacity.
//!
//! ## Concurrency:
//! - One mutex guards the map and the policy; pins are atomic counters
//!   that are only raised while that mutex is held, so an entry seen with
//!   zero pins under the lock cannot be pinned concurrently.

use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

/// Chooses which cached entries to evict first.
pub trait EvictionPolicy: Send {
    fn on_insert(&mut self, key: u32);
    fn on_access(&mut self, key: u32);
    fn on_remove(&mut self, key: u32);
    /// Keys ordered from most to least evictable.
    fn victims(&self) -> Vec<u32>;
}

/// Least-recently-used ordering.
#[derive(Debug, Default)]
pub struct LruPolicy {
    order: VecDeque<u32>,
}

impl LruPolicy {
    fn unlink(&mut self, key: u32) {
        if let Some(pos) = self.order.iter().position(|&k| k == key) {
            self.order.remove(pos);
        }
    }
}

impl EvictionPolicy for LruPolicy {
    fn on_insert(&mut self, key: u32) {
        self.unlink(key);
        self.order.push_back(key);
    }

    fn on_access(&mut self, key: u32) {
        self.on_insert(key);
    }

    fn on_remove(&mut self, key: u32) {
        self.unlink(key);
    }

    fn victims(&self) -> Vec<u32> {
        self.order.iter().copied().collect()
    }
}

struct Slot<T> {
    value: T,
    pins: AtomicUsize,
}

struct CacheInner<T, P> {
    entries: HashMap<u32, Arc<Slot<T>>>,
    policy: P,
    capacity: usize,
    n_evictions: u64,
}

impl<T, P: EvictionPolicy> CacheInner<T, P> {
    /// Evict unpinned entries until the cache fits its capacity.
    fn shrink(&mut self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        for key in self.policy.victims() {
            if self.entries.len() <= self.capacity {
                break;
            }
            let unpinned = self
                .entries
                .get(&key)
                .map(|slot| slot.pins.load(Ordering::SeqCst) == 0)
                .unwrap_or(false);
            if unpinned {
                self.entries.remove(&key);
                self.policy.on_remove(key);
                self.n_evictions += 1;
                debug!(file_number = key, "evicted cached file handle");
            }
        }
    }
}

/// Bounded cache of pinnable values keyed by file number.
pub struct HandleCache<T, P = LruPolicy> {
    inner: Arc<Mutex<CacheInner<T, P>>>,
}

impl<T, P: EvictionPolicy> HandleCache<T, P> {
    pub fn new(capacity: usize, policy: P) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                policy,
                capacity,
                n_evictions: 0,
            })),
        }
    }

    /// Pin the value for `key`, creating it with `open` on a miss.
    ///
    /// `open` runs under the cache lock so a value is created at most once.
    pub fn get_or_try_insert<F>(&self, key: u32, open: F) -> Result<Pinned<T, P>>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut inner = self.inner.lock();

        if let Some(slot) = inner.entries.get(&key).cloned() {
            slot.pins.fetch_add(1, Ordering::SeqCst);
            inner.policy.on_access(key);
            return Ok(self.pinned(slot));
        }

        let slot = Arc::new(Slot {
            value: open()?,
            pins: AtomicUsize::new(1),
        });
        inner.entries.insert(key, Arc::clone(&slot));
        inner.policy.on_insert(key);
        inner.shrink();
        Ok(self.pinned(slot))
    }

    /// Drop `key` from the cache. A pinned value stays alive until released.
    pub fn remove(&self, key: u32) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.entries.remove(&key).is_some();
        if removed {
            inner.policy.on_remove(key);
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let keys: Vec<u32> = inner.entries.keys().copied().collect();
        for key in keys {
            inner.policy.on_remove(key);
        }
        inner.entries.clear();
    }

    pub fn contains(&self, key: u32) -> bool {
        self.inner.lock().entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn n_evictions(&self) -> u64 {
        self.inner.lock().n_evictions
    }

    /// Cached keys, sorted.
    pub fn keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.inner.lock().entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    fn pinned(&self, slot: Arc<Slot<T>>) -> Pinned<T, P> {
        Pinned {
            slot,
            cache: Arc::clone(&self.inner),
        }
    }
}

/// A pinned cache value; unpins on drop.
pub struct Pinned<T, P: EvictionPolicy = LruPolicy> {
    slot: Arc<Slot<T>>,
    cache: Arc<Mutex<CacheInner<T, P>>>,
}

impl<T, P: EvictionPolicy> Pinned<T, P> {
    /// Current pin count of this value, this guard included.
    pub fn pin_count(&self) -> usize {
        self.slot.pins.load(Ordering::SeqCst)
    }
}

impl<T, P: EvictionPolicy> Deref for Pinned<T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.slot.value
    }
}

impl<T, P: EvictionPolicy> Drop for Pinned<T, P> {
    fn drop(&mut self) {
        if self.slot.pins.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.cache.lock().shrink();
        }
    }
}
