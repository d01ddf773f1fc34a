//! Bounded event-id cache backing exactly-once delivery.
//!
//! Relays re-deliver events freely (several relays carry the same event, and
//! reconnects replay recent history), so every incoming event id passes
//! through this cache before reaching a subscription callback.
//!
//! Eviction is by insertion order: when the cache hits capacity it drops the
//! oldest tenth, so steady-state churn does not evict on every insert.

use std::collections::{HashMap, VecDeque};

/// Default capacity of the pool-wide cache.
pub const DEDUP_CAPACITY: usize = 10_000;

/// Insertion-ordered set of recently seen event ids.
pub struct DedupCache {
    seen: HashMap<String, i64>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupCache {
    /// Create a cache holding at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record an id. Returns `true` when the id was not already present.
    pub fn insert(&mut self, event_id: &str, now: i64) -> bool {
        if self.seen.contains_key(event_id) {
            return false;
        }
        if self.seen.len() >= self.capacity {
            self.evict();
        }
        self.seen.insert(event_id.to_string(), now);
        self.order.push_back(event_id.to_string());
        true
    }

    /// Whether an id has been seen.
    pub fn contains(&self, event_id: &str) -> bool {
        self.seen.contains_key(event_id)
    }

    /// Number of ids currently tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drop the oldest entries until the cache is at 90% of capacity.
    fn evict(&mut self) {
        let target = self.capacity * 9 / 10;
        while self.seen.len() > target {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.seen.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY)
    }
}

impl std::fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache")
            .field("len", &self.seen.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
