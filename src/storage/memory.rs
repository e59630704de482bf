use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;

use crate::executor::types::now_ms;

#[derive(Debug, Clone)]
struct Expiring<V> {
    value: V,
    expires_at: u64,
}

impl<V> Expiring<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now_ms().saturating_add(ttl.as_millis() as u64),
        }
    }

    fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// Concurrent key-value map whose entries expire after a per-entry TTL.
///
/// Expired entries are invisible to every read and are dropped lazily on access
/// or in bulk by `purge_expired`.
pub struct TtlMap<V> {
    entries: DashMap<String, Expiring<V>>,
}

impl<V: Clone> TtlMap<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Inserts or overwrites `key`.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        self.entries
            .insert(key.to_string(), Expiring::new(value, ttl));
    }

    /// Inserts only when no live entry exists. Returns `true` if this call wrote.
    pub fn set_if_absent(&self, key: &str, value: V, ttl: Duration) -> bool {
        let now = now_ms();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    occupied.insert(Expiring::new(value, ttl));
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Expiring::new(value, ttl));
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = now_ms();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }

        // Expired: the read guard is gone by now, so the shard can be locked for writing.
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Mutates a live entry in place, keeping its expiry. Returns `false` if absent.
    pub fn update<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let now = now_ms();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                f(&mut entry.value);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let now = now_ms();
        self.entries
            .remove(key)
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(_, entry)| entry.value)
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Snapshot of all live values.
    pub fn values(&self) -> Vec<V> {
        let now = now_ms();
        self.entries
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .map(|entry| entry.value().value.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let now = now_ms();
        self.entries
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for TtlMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
