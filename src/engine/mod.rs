//! # Engine Module
//!
//! The orchestrator. For each request it derives the fingerprint, consults the
//! two-tier cache, takes a per-target permit, calls the provider under the retry
//! policy, writes the result back, and drives the request's lifecycle.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Engine`] | Entry point: `generate`, `submit`, `stream` |
//! | [`EngineBuilder`] | Configuration, providers, cache tiers, sinks |
//! | [`RequestHandle`] | Background request with idempotent start and timed waits |
//! | [`StreamHandle`] | Streaming request with buffered chunks |
//! | [`StreamCoordinator`] | Completed streams retained for replay |

mod builder;
mod core;
mod execution;
mod handle;
mod lifecycle;
mod streaming;

pub use self::builder::EngineBuilder;
pub use self::core::Engine;
pub use self::handle::RequestHandle;
pub use self::streaming::{CompletedStream, StreamCoordinator, StreamHandle, DEFAULT_RETAINED_STREAMS};
