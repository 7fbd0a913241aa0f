//! Capacity-bounded concurrent cache backed by [`DashMap`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::entry::{Entry, EntryMetadata};
use super::policy::EvictionPolicy;

/// A keyed cache holding about `capacity` entries.
///
/// Inserting into a full cache evicts one victim chosen by the policy.
/// Racing inserts may overshoot capacity by at most the number of writers.
/// [`sweep`](Self::sweep) trims occupancy further, down to a percentage of
/// capacity, and may run concurrently with reads and writes.
///
/// After [`stop`](Self::stop) the cache is empty and ignores writes.
pub struct CapacityBoundedCache<V> {
    name: &'static str,
    capacity: usize,
    entries: DashMap<String, Entry<V>>,
    policy: Arc<dyn EvictionPolicy>,
    clock: AtomicU64,
    running: AtomicBool,
}

impl<V: Clone + Send + Sync + 'static> CapacityBoundedCache<V> {
    /// Creates a stopped cache. Call [`start`](Self::start) before use.
    #[must_use]
    pub fn new(name: &'static str, capacity: usize, policy: Arc<dyn EvictionPolicy>) -> Self {
        Self {
            name,
            capacity,
            entries: DashMap::with_capacity(capacity.min(4096)),
            policy,
            clock: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Occupancy as a percentage of capacity.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn occupancy_pct(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.len() as f64 * 100.0 / self.capacity as f64
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Stops the cache and drops every entry.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.entries.clear();
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns a clone of the cached value, recording the access.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.is_running() {
            return None;
        }
        let now = self.tick();
        self.entries.get_mut(key).map(|mut entry| {
            entry.meta.on_access(now);
            entry.value.clone()
        })
    }

    /// Inserts or replaces `key`. Returns `false` if the cache is stopped.
    pub fn put(&self, key: impl Into<String>, value: V) -> bool {
        if !self.is_running() || self.capacity == 0 {
            return false;
        }
        let key = key.into();
        let now = self.tick();

        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.meta.on_update(now);
            return true;
        }

        if self.entries.len() >= self.capacity {
            let overflow = self.entries.len() + 1 - self.capacity;
            self.evict(overflow);
        }
        self.entries.insert(
            key,
            Entry {
                value,
                meta: EntryMetadata::new(now),
            },
        );
        true
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Evicts entries until occupancy is at or below `threshold_pct` percent
    /// of capacity. Returns the number of entries evicted.
    ///
    /// A cache already at or below the threshold is left untouched.
    pub fn sweep(&self, threshold_pct: u8) -> usize {
        if !self.is_running() {
            return 0;
        }
        let target = sweep_target(self.capacity, threshold_pct);
        let len = self.entries.len();
        if len <= target {
            return 0;
        }
        let evicted = self.evict(len - target);
        debug!(
            cache = self.name,
            evicted,
            remaining = self.entries.len(),
            target,
            policy = self.policy.name(),
            "cache sweep"
        );
        evicted
    }

    fn evict(&self, count: usize) -> usize {
        let candidates: Vec<(String, EntryMetadata)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().meta))
            .collect();
        self.policy
            .select_victims(candidates, count)
            .into_iter()
            .filter(|key| self.entries.remove(key).is_some())
            .count()
    }
}

/// `threshold_pct` percent of `capacity`, rounded down, without overflow.
fn sweep_target(capacity: usize, threshold_pct: u8) -> usize {
    let pct = usize::from(threshold_pct.min(100));
    capacity / 100 * pct + capacity % 100 * pct / 100
}
