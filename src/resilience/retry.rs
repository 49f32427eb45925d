//! Retry with exponential backoff for transient provider failures.

use crate::{Error, Result};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

static TRANSIENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)timeout|timed out|rate limit|429|500|502|503|504")
        .expect("transient-error pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            jitter: true,
        }
    }
}

/// Details of a scheduled retry, handed to the observer before sleeping.
#[derive(Debug)]
pub struct RetryNotice<'a> {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    pub max_retries: u32,
    pub delay: Duration,
    pub error: &'a Error,
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether `error` is worth another attempt.
    ///
    /// Configuration errors never are. Provider errors are retried on a retryable
    /// code or status; any error is retried when its message carries a transient
    /// indicator.
    pub fn is_retryable(error: &Error) -> bool {
        match error {
            Error::Configuration { .. } => false,
            Error::Failed(inner) => Self::is_retryable(inner),
            Error::Provider(pe) => {
                let by_status = pe.status.is_some_and(|s| s >= 500 || s == 429);
                pe.standard_code().retryable() || by_status || TRANSIENT.is_match(&pe.message)
            }
            other => TRANSIENT.is_match(&other.to_string()),
        }
    }

    /// `min(base * 2^attempt, max)` for the 0-based `attempt`.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as u64;
        let cap = self.config.max_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base.saturating_mul(factor).min(cap))
    }

    /// Base backoff plus uniform jitter in `[0, 0.1 * delay]` when enabled.
    ///
    /// Jitter is added after the cap, so a capped delay can reach `1.1 * max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff(attempt);
        if !self.config.jitter {
            return delay;
        }
        let spread = delay.as_millis() as u64 / 10;
        if spread == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    /// Runs `op` until it succeeds, fails fatally, or retries are exhausted.
    ///
    /// The error that ends the loop is returned as-is.
    pub async fn run<T, F, Fut>(&self, mut on_retry: impl FnMut(&RetryNotice<'_>), mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.config.max_retries || !Self::is_retryable(&e) {
                        return Err(e);
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable error, backing off"
                    );
                    on_retry(&RetryNotice {
                        attempt: attempt + 1,
                        max_retries: self.config.max_retries,
                        delay,
                        error: &e,
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
