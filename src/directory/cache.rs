//! Bounded-lifetime cache for directory lookups.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

/// A concurrent key-value cache whose entries expire after a fixed TTL.
///
/// Expired entries are removed lazily: on the read that observes them,
/// and by an insert-time sweep that runs at most once per TTL window.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: DashMap<String, (Instant, V)>,
    last_sweep: Mutex<Instant>,
}

impl<V: Clone> TtlCache<V> {
    /// An empty cache with the given entry lifetime.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Returns the live value under `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (stored_at, value) = entry.value();
                if stored_at.elapsed() < self.ttl {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Stores `value` under `key`, restarting its lifetime.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.sweep();
        self.entries.insert(key.into(), (Instant::now(), value));
    }

    /// Drops expired entries, at most once per TTL window. Covers keys
    /// that are written but never read again.
    fn sweep(&self) {
        let mut last_sweep = self.last_sweep.lock();
        if last_sweep.elapsed() < self.ttl {
            return;
        }
        *last_sweep = Instant::now();
        self.entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
    }
}
