//! # Types Module
//!
//! Core data types shared by the cache, the providers and the engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`GenerateRequest`] | Normalized request with cache-control flags and callbacks |
//! | [`ResolvedRequest`] | Request with engine defaults applied |
//! | [`Prompt`] | Single text or ordered conversation of [`Message`]s |
//! | [`Response`] | Normalized result tagged with its [`CacheSource`] |
//! | [`StreamChunk`] | Fragment of a streamed response |
//! | [`StreamEvent`] | Provider-side streaming event |
//! | [`RequestState`] | Lifecycle state of a logical request |
//!
//! ```rust
//! use llm_exec::types::{GenerateRequest, Message, Prompt};
//!
//! let single = GenerateRequest::new("What is the capital of France?").temperature(0.0);
//! let chat = GenerateRequest::new(Prompt::from(vec![
//!     Message::user("Hi"),
//!     Message::assistant("Hello!"),
//!     Message::user("What is the capital of France?"),
//! ]));
//! assert!(!single.stream && !chat.stream);
//! ```

pub mod events;
pub mod message;
pub mod request;
pub mod response;
pub mod state;

pub use events::StreamEvent;
pub use message::{Message, MessageRole, Prompt};
pub use request::{
    ApiFamily, ChunkCallback, GenerateRequest, ProgressCallback, ReasoningEffort,
    ResolvedRequest, ResponseSchema, SamplingParams,
};
pub use response::{CacheSource, Response, StreamChunk};
pub use state::RequestState;
