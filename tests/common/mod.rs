//! Shared fixtures: a scripted provider adapter and engine builders.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use llm_exec::cache::{CacheBackend, FileStore, MemoryStore};
use llm_exec::provider::{ProviderAdapter, ProviderCall, ProviderKind, RawResponse};
use llm_exec::resilience::RetryConfig;
use llm_exec::telemetry::InMemoryEventSink;
use llm_exec::types::{ResolvedRequest, Response, StreamEvent};
use llm_exec::{BoxStream, Engine, Error, ProviderError, Result};
use serde_json::json;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provider adapter that answers from a script and counts its calls.
pub struct MockProvider {
    kind: ProviderKind,
    reply: String,
    chunks: Vec<String>,
    delay: Option<Duration>,
    fail_mid_stream: bool,
    failures: Mutex<VecDeque<ProviderError>>,
    calls: AtomicU32,
    stream_calls: AtomicU32,
    inflight: AtomicU32,
    peak: AtomicU32,
}

impl MockProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            reply: reply.into(),
            chunks: Vec::new(),
            delay: None,
            fail_mid_stream: false,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            stream_calls: AtomicU32::new(0),
            inflight: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        }
    }

    pub fn kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Text deltas returned by `invoke_stream`.
    pub fn chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The stream yields every chunk and then an error instead of ending.
    pub fn fail_mid_stream(mut self) -> Self {
        self.fail_mid_stream = true;
        self
    }

    /// Queues a failure for the next call (plain or streaming).
    pub fn fail_next(self, error: ProviderError) -> Self {
        self.failures.lock().unwrap().push_back(error);
        self
    }

    pub fn fail_times(self, n: usize, error: ProviderError) -> Self {
        {
            let mut failures = self.failures.lock().unwrap();
            for _ in 0..n {
                failures.push_back(error.clone());
            }
        }
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> u32 {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `invoke` calls observed running at once.
    pub fn peak_concurrency(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<ProviderError> {
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn prepare(&self, request: &ResolvedRequest) -> Result<ProviderCall> {
        Ok(ProviderCall {
            provider: self.kind,
            model: request.model.clone(),
            body: json!({
                "input": request.request.prompt.preview(usize::MAX),
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
            }),
        })
    }

    async fn invoke(&self, call: &ProviderCall) -> Result<RawResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inflight.fetch_sub(1, Ordering::SeqCst);
        if let Some(err) = self.next_failure() {
            return Err(err.into());
        }
        Ok(json!({
            "output_text": self.reply,
            "model": call.model,
            "call": n,
            "usage": {"input_tokens": 12, "output_tokens": 3},
        }))
    }

    fn normalize(&self, _call: &ProviderCall, raw: RawResponse) -> Result<Response> {
        let text = raw["output_text"]
            .as_str()
            .ok_or_else(|| Error::runtime("mock payload has no output_text"))?;
        let model = raw["model"].as_str().unwrap_or_default();
        let mut response = Response::new(text, model);
        response.stop_reason = "stop".into();
        response.input_tokens = raw["usage"]["input_tokens"].as_u64().unwrap_or(0);
        response.output_tokens = raw["usage"]["output_tokens"].as_u64().unwrap_or(0);
        response.metadata.insert("call".into(), raw["call"].clone());
        Ok(response)
    }

    async fn invoke_stream(&self, _call: &ProviderCall) -> Result<BoxStream<'static, StreamEvent>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_failure() {
            return Err(err.into());
        }
        let mut events: Vec<Result<StreamEvent>> = self
            .chunks
            .iter()
            .map(|c| Ok(StreamEvent::delta(c.clone())))
            .collect();
        if self.fail_mid_stream {
            events.push(Err(ProviderError::new("openai", "connection reset by peer")
                .with_code("network_error")
                .into()));
        } else {
            events.push(Ok(StreamEvent::Metadata {
                input_tokens: Some(12),
                output_tokens: Some(self.chunks.len() as u64),
                stop_reason: None,
            }));
            events.push(Ok(StreamEvent::StreamEnd {
                stop_reason: Some("stop".into()),
            }));
        }
        let delay = self.delay;
        let stream = futures::stream::iter(events).then(move |event| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            event
        });
        Ok(Box::pin(stream))
    }
}

/// Retry settings fast enough for tests.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter: false,
    }
}

pub struct Fixture {
    pub engine: Engine,
    pub provider: Arc<MockProvider>,
    pub events: Arc<InMemoryEventSink>,
    pub local: Arc<MemoryStore>,
}

/// Engine over an in-memory local tier with no remote tier.
pub fn engine_with(provider: MockProvider) -> Fixture {
    engine_with_remote(provider, None)
}

pub fn engine_with_remote(provider: MockProvider, remote: Option<Arc<dyn CacheBackend>>) -> Fixture {
    let provider = Arc::new(provider);
    let events = Arc::new(InMemoryEventSink::new(1000));
    let local = Arc::new(MemoryStore::new(100));
    let mut builder = Engine::builder()
        .provider(provider.clone())
        .local_cache(local.clone())
        .event_sink(events.clone())
        .retry(fast_retry(3));
    if let Some(remote) = remote {
        builder = builder.remote_cache(remote);
    }
    let engine = builder.build().expect("engine builds");
    Fixture {
        engine,
        provider,
        events,
        local,
    }
}

/// Fresh cache directory under the system temp dir.
pub fn temp_cache_dir() -> PathBuf {
    std::env::temp_dir().join(format!("llm-exec-it-{}", uuid::Uuid::new_v4()))
}

pub fn file_store(dir: &PathBuf) -> Arc<FileStore> {
    Arc::new(FileStore::new(dir.clone()))
}
