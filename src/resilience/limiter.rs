//! Per-target concurrency limiter.

use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Capacity used when neither an explicit cap nor a quota pattern applies.
pub const DEFAULT_CAPACITY: usize = 2;

/// Published service quotas for a family of models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelQuota {
    /// Lowercase substring matched against the target name.
    pub pattern: &'static str,
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
    pub concurrent: usize,
}

/// Matched in order; more specific patterns come first.
pub const QUOTA_TABLE: &[ModelQuota] = &[
    ModelQuota { pattern: "claude-3-5-sonnet-v2", requests_per_minute: 10, tokens_per_minute: 200_000, concurrent: 1 },
    ModelQuota { pattern: "claude-3-5-sonnet", requests_per_minute: 200, tokens_per_minute: 400_000, concurrent: 2 },
    ModelQuota { pattern: "claude-3-sonnet", requests_per_minute: 200, tokens_per_minute: 400_000, concurrent: 2 },
    ModelQuota { pattern: "claude-3-haiku", requests_per_minute: 400, tokens_per_minute: 400_000, concurrent: 5 },
    ModelQuota { pattern: "claude-3-opus", requests_per_minute: 50, tokens_per_minute: 200_000, concurrent: 1 },
    ModelQuota { pattern: "llama", requests_per_minute: 500, tokens_per_minute: 500_000, concurrent: 5 },
    ModelQuota { pattern: "mistral", requests_per_minute: 300, tokens_per_minute: 300_000, concurrent: 3 },
    ModelQuota { pattern: "titan", requests_per_minute: 400, tokens_per_minute: 400_000, concurrent: 5 },
];

pub fn quota_for(target: &str) -> Option<&'static ModelQuota> {
    let lower = target.to_lowercase();
    QUOTA_TABLE.iter().find(|q| lower.contains(q.pattern))
}

/// Point-in-time view of one target's semaphore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflightSnapshot {
    pub max: usize,
    pub available: usize,
    pub in_use: usize,
}

/// A held slot. Dropping it frees the slot, whichever way the call ended.
#[derive(Debug)]
pub struct TargetPermit {
    target: String,
    _permit: OwnedSemaphorePermit,
}

impl TargetPermit {
    pub fn target(&self) -> &str {
        &self.target
    }
}

struct Slot {
    semaphore: Arc<Semaphore>,
    max: usize,
}

/// Bounds in-flight provider calls per target, typically a model id.
///
/// Semaphores are created lazily on first use of a target. There is no cap
/// across targets.
pub struct ConcurrencyLimiter {
    max_concurrent: Option<usize>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ConcurrencyLimiter {
    /// `max_concurrent` overrides the quota table for every target.
    pub fn new(max_concurrent: Option<usize>) -> Result<Self> {
        if max_concurrent == Some(0) {
            return Err(Error::configuration("max_concurrent must be at least 1"));
        }
        Ok(Self {
            max_concurrent,
            slots: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity_for(&self, target: &str) -> usize {
        self.max_concurrent
            .or_else(|| quota_for(target).map(|q| q.concurrent))
            .unwrap_or(DEFAULT_CAPACITY)
    }

    fn semaphore(&self, target: &str) -> Arc<Semaphore> {
        let mut slots = self.lock();
        if let Some(slot) = slots.get(target) {
            return slot.semaphore.clone();
        }
        let max = self.capacity_for(target);
        debug!(target_name = target, limit = max, "created concurrency semaphore");
        let semaphore = Arc::new(Semaphore::new(max));
        slots.insert(
            target.to_string(),
            Slot {
                semaphore: semaphore.clone(),
                max,
            },
        );
        semaphore
    }

    /// Waits for a free slot on `target`.
    pub async fn acquire(&self, target: &str) -> Result<TargetPermit> {
        let permit = self
            .semaphore(target)
            .acquire_owned()
            .await
            .map_err(|_| Error::runtime(format!("concurrency limiter for '{}' closed", target)))?;
        Ok(TargetPermit {
            target: target.to_string(),
            _permit: permit,
        })
    }

    /// Takes a slot only if one is free right now.
    pub fn try_acquire(&self, target: &str) -> Option<TargetPermit> {
        let permit = self.semaphore(target).try_acquire_owned().ok()?;
        Some(TargetPermit {
            target: target.to_string(),
            _permit: permit,
        })
    }

    /// `None` until the target has been used once.
    pub fn snapshot(&self, target: &str) -> Option<InflightSnapshot> {
        let slots = self.lock();
        slots.get(target).map(|slot| {
            let available = slot.semaphore.available_permits();
            InflightSnapshot {
                max: slot.max,
                available,
                in_use: slot.max.saturating_sub(available),
            }
        })
    }

    pub fn targets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn capacity_follows_quota_table() {
        let limiter = ConcurrencyLimiter::new(None).unwrap();
        assert_eq!(limiter.capacity_for("anthropic.claude-3-5-sonnet-v2:0"), 1);
        assert_eq!(limiter.capacity_for("anthropic.claude-3-5-sonnet-20240620-v1:0"), 2);
        assert_eq!(limiter.capacity_for("anthropic.claude-3-haiku-20240307-v1:0"), 5);
        assert_eq!(limiter.capacity_for("meta.Llama3-70b"), 5);
        assert_eq!(limiter.capacity_for("gpt-4o-mini"), DEFAULT_CAPACITY);
    }

    #[test]
    fn explicit_cap_wins_and_zero_is_rejected() {
        let limiter = ConcurrencyLimiter::new(Some(7)).unwrap();
        assert_eq!(limiter.capacity_for("claude-3-opus"), 7);
        assert!(ConcurrencyLimiter::new(Some(0)).is_err());
    }

    #[tokio::test]
    async fn permits_are_released_on_drop() {
        let limiter = ConcurrencyLimiter::new(Some(1)).unwrap();
        assert!(limiter.snapshot("m").is_none());
        let permit = limiter.acquire("m").await.unwrap();
        assert_eq!(permit.target(), "m");
        assert!(limiter.try_acquire("m").is_none());
        assert_eq!(
            limiter.snapshot("m"),
            Some(InflightSnapshot { max: 1, available: 0, in_use: 1 })
        );
        drop(permit);
        assert!(limiter.try_acquire("m").is_some());
        // Other targets are independent.
        let _a = limiter.acquire("other").await.unwrap();
        assert_eq!(limiter.targets(), vec!["m".to_string(), "other".to_string()]);
    }

    #[tokio::test]
    async fn acquire_waits_for_a_free_slot() {
        let limiter = Arc::new(ConcurrencyLimiter::new(Some(1)).unwrap());
        let held = limiter.acquire("m").await.unwrap();
        let l2 = limiter.clone();
        let waiter = tokio::spawn(async move { l2.acquire("m").await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_first_use_creates_one_semaphore() {
        let limiter = Arc::new(ConcurrencyLimiter::new(Some(3)).unwrap());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let l = limiter.clone();
            tasks.push(tokio::spawn(async move { l.acquire("shared").await.map(drop) }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(limiter.snapshot("shared").unwrap().available, 3);
    }
}
