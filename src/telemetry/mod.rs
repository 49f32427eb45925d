//! # Telemetry Module
//!
//! Side-effect-only notifications about request execution.
//!
//! The engine reports every notable step as an [`EngineEvent`] to the configured
//! [`EventSink`], and to the request's own progress callback when one was given.
//! Sinks never influence control flow; a sink that panics is contained.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`EngineEvent`] | Typed execution event |
//! | [`EventSink`] | Trait for event destinations |
//! | [`NoopEventSink`] | Default sink (discards everything) |
//! | [`TracingEventSink`] | Forwards events to `tracing` |
//! | [`InMemoryEventSink`] | Bounded in-memory sink for tests and diagnostics |

use crate::types::CacheSource;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    RequestStarted {
        request_id: String,
        provider: String,
        model: String,
    },
    CacheCleared {
        request_id: String,
        fingerprint: String,
    },
    CacheHit {
        request_id: String,
        fingerprint: String,
        source: CacheSource,
    },
    CacheMiss {
        request_id: String,
        fingerprint: String,
    },
    ApiCallStarted {
        request_id: String,
        model: String,
    },
    ApiCallFinished {
        request_id: String,
        model: String,
        input_tokens: u64,
        output_tokens: u64,
        elapsed_ms: u64,
    },
    RetryScheduled {
        request_id: String,
        attempt: u32,
        max_retries: u32,
        delay_ms: u64,
        error: String,
    },
    RequestFailed {
        request_id: String,
        error: String,
    },
    StreamChunkReceived {
        request_id: String,
        index: usize,
        len: usize,
    },
    StreamReplayed {
        request_id: String,
        fingerprint: String,
        chunks: usize,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::RequestStarted { .. } => "request_started",
            EngineEvent::CacheCleared { .. } => "cache_cleared",
            EngineEvent::CacheHit { .. } => "cache_hit",
            EngineEvent::CacheMiss { .. } => "cache_miss",
            EngineEvent::ApiCallStarted { .. } => "api_call_started",
            EngineEvent::ApiCallFinished { .. } => "api_call_finished",
            EngineEvent::RetryScheduled { .. } => "retry_scheduled",
            EngineEvent::RequestFailed { .. } => "request_failed",
            EngineEvent::StreamChunkReceived { .. } => "stream_chunk_received",
            EngineEvent::StreamReplayed { .. } => "stream_replayed",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            EngineEvent::RequestStarted { request_id, .. }
            | EngineEvent::CacheCleared { request_id, .. }
            | EngineEvent::CacheHit { request_id, .. }
            | EngineEvent::CacheMiss { request_id, .. }
            | EngineEvent::ApiCallStarted { request_id, .. }
            | EngineEvent::ApiCallFinished { request_id, .. }
            | EngineEvent::RetryScheduled { request_id, .. }
            | EngineEvent::RequestFailed { request_id, .. }
            | EngineEvent::StreamChunkReceived { request_id, .. }
            | EngineEvent::StreamReplayed { request_id, .. } => request_id,
        }
    }
}

/// Destination for engine events. Called inline, so implementations should be cheap.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &EngineEvent) {}
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoopEventSink)
}

/// Logs every event through `tracing`.
#[derive(Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::ApiCallFinished {
                request_id,
                model,
                input_tokens,
                output_tokens,
                elapsed_ms,
            } => info!(
                request_id = %request_id,
                model = %model,
                input_tokens,
                output_tokens,
                elapsed_ms,
                "api call finished"
            ),
            EngineEvent::RetryScheduled {
                request_id,
                attempt,
                delay_ms,
                error,
                ..
            } => warn!(request_id = %request_id, attempt, delay_ms, error = %error, "retry scheduled"),
            EngineEvent::RequestFailed { request_id, error } => {
                warn!(request_id = %request_id, error = %error, "request failed")
            }
            other => debug!(request_id = %other.request_id(), event = other.name(), "engine event"),
        }
    }
}

/// Keeps the most recent `max_events` events.
pub struct InMemoryEventSink {
    events: RwLock<VecDeque<EngineEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events: max_events.max(1),
        }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        events.iter().cloned().collect()
    }

    pub fn events_for(&self, request_id: &str) -> Vec<EngineEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.request_id() == request_id)
            .collect()
    }

    /// Event names in arrival order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(EngineEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    pub fn clear(&self) {
        self.events.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, event: &EngineEvent) {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        events.push_back(event.clone());
        while events.len() > self.max_events {
            events.pop_front();
        }
    }
}
