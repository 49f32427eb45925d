//! # llm-exec
//!
//! Request execution and caching engine for remote text-generation providers.
//!
//! ## Overview
//!
//! The engine sits between callers and provider adapters. It makes repeated
//! deterministic calls free, keeps per-model concurrency within published quotas,
//! retries transient provider failures, and lets callers submit work in the
//! background and collect it later.
//!
//! ## Key Features
//!
//! - **Fingerprinting**: canonical digest of every field that affects the output
//! - **Two-tier cache**: local JSON documents plus an optional remote tier with write-back
//! - **Retry**: exponential backoff with jitter, transient errors only
//! - **Concurrency**: one semaphore per model, sized from a quota table
//! - **Lifecycle**: `NotStarted -> Pending -> Completed | Failed` handles with timed waits
//! - **Streaming**: buffered chunks, callbacks, replay of completed streams
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_exec::{Engine, GenerateRequest};
//! # use llm_exec::provider::ProviderAdapter;
//! # use std::sync::Arc;
//! # fn my_adapter() -> Arc<dyn ProviderAdapter> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> llm_exec::Result<()> {
//!     let engine = Engine::builder().provider(my_adapter()).build()?;
//!
//!     let request = GenerateRequest::new("What is the capital of France?").temperature(0.0);
//!     let first = engine.generate(request.clone()).await?;
//!     let second = engine.generate(request).await?;
//!     assert_eq!(first.text, second.text);
//!     assert!(second.cache_source.is_hit());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Requests, prompts, responses, stream chunks, request states |
//! | [`cache`] | Fingerprints, cache tiers and the two-tier cache |
//! | [`resilience`] | Retry policy and per-target concurrency limiter |
//! | [`provider`] | Provider capability trait and registry |
//! | [`engine`] | Orchestrator, request handles, streaming coordinator |
//! | [`telemetry`] | Engine events and sinks |
//! | [`config`] | Engine configuration from YAML and environment |

pub mod cache;
pub mod config;
pub mod engine;
pub mod error_code;
pub mod provider;
pub mod resilience;
pub mod telemetry;
pub mod types;

pub use cache::{CacheKey, CacheStats, TwoTierCache};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, RequestHandle, StreamHandle};
pub use error_code::StandardErrorCode;
pub use provider::{ProviderAdapter, ProviderCall, ProviderKind, ProviderRegistry, RawResponse};
pub use telemetry::{EngineEvent, EventSink};
pub use types::{
    CacheSource, GenerateRequest, Message, MessageRole, Prompt, RequestState, Response,
    ResponseSchema, StreamChunk, StreamEvent,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ProviderError};
