//! Lease Manager
//!
//! Exclusive, expiring claims on string keys. Task execution uses the `task:`
//! namespace; index writers use the `dataset:` namespace. A lease that is never
//! released simply expires, which bounds the damage of a crashed holder.

use crate::error::{Result, ServiceError};
use crate::executor::types::{TaskId, now_ms};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub key: String,
    pub owner: String,
    /// Timestamp (ms) after which the lease is void.
    pub expires_at: u64,
}

impl Lease {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

pub fn task_lease_key(task_id: &TaskId) -> String {
    format!("task:{}", task_id)
}

pub fn dataset_lease_key(dataset_id: &str) -> String {
    format!("dataset:{}", dataset_id)
}

pub struct LockManager {
    leases: DashMap<String, Lease>,
}

impl LockManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            leases: DashMap::new(),
        })
    }

    /// Claims `key` for `owner`. Fails (returns `None`) while any live lease
    /// exists, including one held by the same owner.
    pub fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Option<Lease> {
        let now = now_ms();
        let lease = Lease {
            key: key.to_string(),
            owner: owner.to_string(),
            expires_at: now.saturating_add(ttl.as_millis() as u64),
        };

        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return None;
                }
                tracing::debug!(
                    "Lease {} expired (holder {}), reassigning to {}",
                    key,
                    occupied.get().owner,
                    owner
                );
                occupied.insert(lease.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lease.clone());
            }
        }

        Some(lease)
    }

    /// Extends a live lease held by `owner`.
    pub fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<()> {
        let now = now_ms();
        match self.leases.get_mut(key) {
            Some(mut lease) if lease.owner == owner && lease.is_live(now) => {
                lease.expires_at = now.saturating_add(ttl.as_millis() as u64);
                Ok(())
            }
            Some(lease) => Err(ServiceError::LeaseBusy(format!(
                "{} is held by {}",
                key, lease.owner
            ))),
            None => Err(ServiceError::NotFound(format!("lease {}", key))),
        }
    }

    /// Releases `key` if `owner` holds it. Returns `false` otherwise.
    pub fn release(&self, key: &str, owner: &str) -> bool {
        self.leases
            .remove_if(key, |_, lease| lease.owner == owner)
            .is_some()
    }

    /// The live lease on `key`, if any.
    pub fn holder(&self, key: &str) -> Option<Lease> {
        let now = now_ms();
        self.leases
            .get(key)
            .filter(|lease| lease.is_live(now))
            .map(|lease| lease.clone())
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.holder(key).is_some()
    }

    /// Keeps trying to acquire `key` until `wait` elapses, then fails with `LeaseBusy`.
    pub async fn acquire_with_wait(
        self: &Arc<Self>,
        key: &str,
        owner: &str,
        ttl: Duration,
        wait: Duration,
    ) -> Result<LeaseGuard> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut delay = Duration::from_millis(10);

        loop {
            if self.acquire(key, owner, ttl).is_some() {
                return Ok(LeaseGuard {
                    locks: self.clone(),
                    key: key.to_string(),
                    owner: owner.to_string(),
                    renewal: None,
                });
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(ServiceError::LeaseBusy(key.to_string()));
            }

            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(Duration::from_millis(200));
        }
    }

    /// Wraps an already-acquired lease so it is released on drop.
    pub fn guard(self: &Arc<Self>, lease: &Lease) -> LeaseGuard {
        LeaseGuard {
            locks: self.clone(),
            key: lease.key.clone(),
            owner: lease.owner.clone(),
            renewal: None,
        }
    }

    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        let before = self.leases.len();
        self.leases.retain(|_, lease| lease.is_live(now));
        before.saturating_sub(self.leases.len())
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self {
            leases: DashMap::new(),
        }
    }
}

/// Releases its lease when dropped, whatever path the holder takes out.
pub struct LeaseGuard {
    locks: Arc<LockManager>,
    key: String,
    owner: String,
    renewal: Option<JoinHandle<()>>,
}

impl LeaseGuard {
    /// Renews the lease every `interval` until the guard is dropped or the lease is lost.
    pub fn renewing(mut self, ttl: Duration, interval: Duration) -> Self {
        let locks = self.locks.clone();
        let key = self.key.clone();
        let owner = self.owner.clone();

        self.renewal = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match locks.renew(&key, &owner, ttl) {
                    Ok(()) => tracing::trace!("Renewed lease {}", key),
                    Err(e) => {
                        tracing::warn!("Stopped renewing lease {}: {}", key, e);
                        break;
                    }
                }
            }
        }));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        if self.locks.release(&self.key, &self.owner) {
            tracing::trace!("Released lease {} ({})", self.key, self.owner);
        }
    }
}
