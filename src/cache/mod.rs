//! # Response Caching Module
//!
//! Deterministic responses are cached under a fingerprint of their request so that
//! repeated calls never reach the provider.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheKeyDeriver`] | Fingerprints cache-eligible requests |
//! | [`TwoTierCache`] | Local tier with optional remote tier and write-back |
//! | [`CacheBackend`] | Trait for one tier |
//! | [`FileStore`] | JSON document per fingerprint in a directory (local tier) |
//! | [`MemoryStore`] | In-process LRU store with TTL |
//! | [`HttpRemoteStore`] | HTTP key-value service (remote tier) |
//!
//! ## Example
//!
//! ```rust
//! use llm_exec::cache::{FileStore, MemoryStore, TwoTierCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let local = Arc::new(FileStore::new(".llm_cache"));
//! let cache = TwoTierCache::new(local)
//!     .with_remote(Arc::new(MemoryStore::new(10_000)), Some(Duration::from_secs(3600)));
//! assert!(cache.has_remote());
//! ```
//!
//! ## Eligibility
//!
//! Only non-streaming calls at temperature 0, or reasoning-mode calls, are cached.
//! Cache I/O failures never reach the caller; they read as misses.

mod backend;
mod entry;
mod file;
mod key;
mod memory;
mod remote_http;
mod tiered;

pub use backend::CacheBackend;
pub use entry::{CacheEntry, EntryMetadata};
pub use file::FileStore;
pub use key::{canonical_json, CacheKey, CacheKeyDeriver, DEFAULT_FINGERPRINT_LEN};
pub use memory::MemoryStore;
pub use remote_http::HttpRemoteStore;
pub use tiered::{CacheStats, TwoTierCache};

pub(crate) use entry::unix_now;
