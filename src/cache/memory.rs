//! In-process store with LRU eviction and per-entry TTL.

use super::backend::CacheBackend;
use super::entry::CacheEntry;
use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Slot {
    entry: CacheEntry,
    expires_at: Option<Instant>,
}

/// Useful as a remote tier in tests and for single-process deployments.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, Slot>>,
    default_ttl: Option<Duration>,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            default_ttl: None,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Slot>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl CacheBackend for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let mut entries = self.lock();
        let expired = match entries.get(&key.hash) {
            None => return Ok(None),
            Some(slot) => slot.expires_at.is_some_and(|t| t <= Instant::now()),
        };
        if expired {
            entries.pop(&key.hash);
            return Ok(None);
        }
        Ok(entries.get(&key.hash).map(|slot| slot.entry.clone()))
    }

    async fn set(&self, key: &CacheKey, entry: &CacheEntry, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.or(self.default_ttl).map(|t| Instant::now() + t);
        self.lock().put(
            key.hash.clone(),
            Slot {
                entry: entry.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.lock().pop(&key.hash).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
