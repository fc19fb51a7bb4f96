// ⏱️ Debouncer - trailing-edge coalescing of rapid writes
//
// Column resizes and drags fire many layout events per second. Each push
// replaces the pending value for its key and restarts the quiet window; only
// values whose window has elapsed are handed out by `flush_expired`.
//
// Time is passed in by the caller so the event loop decides when to poll.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Pending<V> {
    value: V,
    deadline: Instant,
}

#[derive(Debug, Clone)]
pub struct Debouncer<K, V> {
    window: Duration,
    pending: BTreeMap<K, Pending<V>>,
}

impl<K: Ord + Clone, V> Debouncer<K, V> {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            pending: BTreeMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Queue `value` for `key`, replacing whatever was pending
    pub fn push(&mut self, key: K, value: V, now: Instant) {
        self.pending.insert(
            key,
            Pending {
                value,
                deadline: now + self.window,
            },
        );
    }

    /// Take every value whose quiet window has elapsed
    pub fn flush_expired(&mut self, now: Instant) -> Vec<(K, V)> {
        let expired: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, p)| now >= p.deadline)
            .map(|(k, _)| k.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|k| self.pending.remove(&k).map(|p| (k, p.value)))
            .collect()
    }

    /// Take everything immediately (month change, quit)
    pub fn flush_all(&mut self) -> Vec<(K, V)> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(k, p)| (k, p.value))
            .collect()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
