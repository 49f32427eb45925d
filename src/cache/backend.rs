//! Cache backend trait.

use super::entry::CacheEntry;
use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// One cache tier.
///
/// Backends report their own failures; the [`TwoTierCache`](super::TwoTierCache)
/// decides that a failing tier reads as a miss.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;
    /// `ttl` of `None` means the backend's own default.
    async fn set(&self, key: &CacheKey, entry: &CacheEntry, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}
