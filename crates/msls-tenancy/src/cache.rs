//! Short-lived cache of tenant status lookups

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::tenant::{TenantId, TenantStatus};

pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(30);

struct CacheEntry {
    status: TenantStatus,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe TTL cache of tenant status
///
/// Only the status is cached, never tenant data. A status change must be
/// followed by [`TenantStatusCache::invalidate`] so suspension takes effect
/// immediately instead of after the TTL.
#[derive(Clone)]
pub struct TenantStatusCache {
    entries: Arc<RwLock<HashMap<TenantId, CacheEntry>>>,
    ttl: Duration,
    max_entries: usize,
}

impl std::fmt::Debug for TenantStatusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantStatusCache")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("entry_count", &self.entries.read().len())
            .finish()
    }
}

impl TenantStatusCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            max_entries: 10_000,
        }
    }

    #[must_use]
    pub const fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn get(&self, id: TenantId) -> Option<TenantStatus> {
        if self.ttl.is_zero() {
            return None;
        }
        let now = Instant::now();
        self.entries
            .read()
            .get(&id)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.status)
    }

    pub fn insert(&self, id: TenantId, status: TenantStatus) {
        if self.ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.write();

        if entries.len() >= self.max_entries && !entries.contains_key(&id) {
            entries.retain(|_, entry| !entry.is_expired(now));
            if entries.len() >= self.max_entries {
                entries.clear();
            }
        }

        entries.insert(
            id,
            CacheEntry {
                status,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, id: TenantId) {
        self.entries.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for TenantStatusCache {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_TTL)
    }
}
