//! # Resilience Module
//!
//! Guards around provider calls.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`retry`] | Exponential backoff with jitter for transient failures |
//! | [`limiter`] | Per-target bounded concurrency, sized from a quota table |
//!
//! ```rust
//! use llm_exec::resilience::{ConcurrencyLimiter, RetryConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let retry = RetryPolicy::new(RetryConfig {
//!     max_retries: 3,
//!     base_delay: Duration::from_millis(500),
//!     max_delay: Duration::from_secs(30),
//!     jitter: true,
//! });
//! assert_eq!(retry.base_backoff(2), Duration::from_secs(2));
//!
//! let limiter = ConcurrencyLimiter::new(None).unwrap();
//! assert_eq!(limiter.capacity_for("anthropic.claude-3-haiku"), 5);
//! ```

pub mod limiter;
pub mod retry;

pub use limiter::{ConcurrencyLimiter, InflightSnapshot, ModelQuota, TargetPermit, QUOTA_TABLE};
pub use retry::{RetryConfig, RetryNotice, RetryPolicy};
