//! Local tier plus optional remote tier.

use super::backend::CacheBackend;
use super::entry::CacheEntry;
use super::key::CacheKey;
use crate::types::CacheSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits_local: u64,
    pub hits_remote: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits_local + self.hits_remote
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits_local: AtomicU64,
    hits_remote: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits_local: self.hits_local.load(Ordering::Relaxed),
            hits_remote: self.hits_remote.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Two-tier response cache.
///
/// Every operation is infallible from the caller's side: a tier that errors is
/// logged, counted, and read as a miss. Without a remote tier every operation
/// behaves exactly as local-only.
pub struct TwoTierCache {
    local: Arc<dyn CacheBackend>,
    remote: Option<Arc<dyn CacheBackend>>,
    remote_ttl: Option<Duration>,
    stats: AtomicStats,
}

impl TwoTierCache {
    pub fn new(local: Arc<dyn CacheBackend>) -> Self {
        Self {
            local,
            remote: None,
            remote_ttl: None,
            stats: AtomicStats::default(),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn CacheBackend>, ttl: Option<Duration>) -> Self {
        self.remote = Some(remote);
        self.remote_ttl = ttl;
        self
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub async fn get(&self, key: &CacheKey) -> (Option<CacheEntry>, CacheSource) {
        match self.local.get(key).await {
            Ok(Some(entry)) => {
                AtomicStats::bump(&self.stats.hits_local);
                debug!(fingerprint = %key, source = "local", "cache hit");
                return (Some(entry), CacheSource::Local);
            }
            Ok(None) => {}
            Err(e) => {
                AtomicStats::bump(&self.stats.errors);
                warn!(fingerprint = %key, tier = self.local.name(), error = %e, "local cache read failed");
            }
        }

        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(Some(entry)) => {
                    AtomicStats::bump(&self.stats.hits_remote);
                    debug!(fingerprint = %key, source = "remote", "cache hit, writing back to local");
                    if let Err(e) = self.local.set(key, &entry, None).await {
                        AtomicStats::bump(&self.stats.errors);
                        warn!(fingerprint = %key, error = %e, "cache write-back failed");
                    }
                    return (Some(entry), CacheSource::Remote);
                }
                Ok(None) => {}
                Err(e) => {
                    AtomicStats::bump(&self.stats.errors);
                    warn!(fingerprint = %key, tier = remote.name(), error = %e, "remote cache read failed");
                }
            }
        }

        AtomicStats::bump(&self.stats.misses);
        debug!(fingerprint = %key, "cache miss");
        (None, CacheSource::Miss)
    }

    pub async fn set(&self, key: &CacheKey, entry: &CacheEntry) {
        match self.local.set(key, entry, None).await {
            Ok(()) => AtomicStats::bump(&self.stats.sets),
            Err(e) => {
                AtomicStats::bump(&self.stats.errors);
                warn!(fingerprint = %key, tier = self.local.name(), error = %e, "local cache write failed");
            }
        }
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set(key, entry, self.remote_ttl).await {
                AtomicStats::bump(&self.stats.errors);
                warn!(fingerprint = %key, tier = remote.name(), error = %e, "remote cache write failed");
            }
        }
    }

    /// Removes `key` from every tier. Returns whether any tier held it.
    pub async fn clear(&self, key: &CacheKey) -> bool {
        let mut removed = false;
        let tiers = std::iter::once(&self.local).chain(self.remote.as_ref());
        for tier in tiers {
            match tier.delete(key).await {
                Ok(hit) => removed |= hit,
                Err(e) => {
                    AtomicStats::bump(&self.stats.errors);
                    warn!(fingerprint = %key, tier = tier.name(), error = %e, "cache delete failed");
                }
            }
        }
        if removed {
            AtomicStats::bump(&self.stats.deletes);
        }
        debug!(fingerprint = %key, removed, "cache cleared");
        removed
    }

    /// Clears the local tier. The remote tier is asked too, but may rely on TTL expiry.
    pub async fn clear_all(&self) {
        let tiers = std::iter::once(&self.local).chain(self.remote.as_ref());
        for tier in tiers {
            if let Err(e) = tier.clear().await {
                AtomicStats::bump(&self.stats.errors);
                warn!(tier = tier.name(), error = %e, "cache clear failed");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
}
