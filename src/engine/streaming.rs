//! Streaming coordination: chunk buffers, replay of completed streams, and the
//! background task that drives a provider stream.

use super::core::EngineInner;
use super::lifecycle::Lifecycle;
use crate::cache::{CacheEntry, CacheKey, EntryMetadata};
use crate::telemetry::EngineEvent;
use crate::types::{
    CacheSource, ChunkCallback, RequestState, ResolvedRequest, Response, StreamChunk, StreamEvent,
};
use crate::{Error, Result};
use futures::{FutureExt, Stream, StreamExt};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

pub const DEFAULT_RETAINED_STREAMS: usize = 256;

#[derive(Default)]
struct BufferState {
    chunks: Vec<StreamChunk>,
    drained: usize,
    closed: bool,
}

/// Append-only chunk history with a drain cursor and live subscribers.
struct ChunkBuffer {
    state: Mutex<BufferState>,
    version: watch::Sender<u64>,
}

impl ChunkBuffer {
    fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            state: Mutex::new(BufferState::default()),
            version,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Returns the index of the pushed chunk.
    fn push(&self, chunk: StreamChunk) -> usize {
        let index = {
            let mut state = self.lock();
            state.chunks.push(chunk);
            state.chunks.len() - 1
        };
        self.bump();
        index
    }

    fn close(&self) {
        self.lock().closed = true;
        self.bump();
    }

    fn snapshot(&self) -> Vec<StreamChunk> {
        self.lock().chunks.clone()
    }

    fn drain(&self) -> Vec<StreamChunk> {
        let mut state = self.lock();
        let start = state.drained;
        state.drained = state.chunks.len();
        state.chunks[start..].to_vec()
    }

    fn text(&self) -> String {
        self.lock().chunks.iter().map(|c| c.text.as_str()).collect()
    }

    /// Chunk at `index`, or whether the buffer is closed when there is none yet.
    fn at(&self, index: usize) -> std::result::Result<StreamChunk, bool> {
        let state = self.lock();
        state.chunks.get(index).cloned().ok_or(state.closed)
    }
}

/// Builds the final [`Response`] from stream events.
#[derive(Debug, Default)]
pub(crate) struct StreamAccumulator {
    text: String,
    chunks: usize,
    input_tokens: u64,
    output_tokens: u64,
    stop_reason: Option<String>,
}

impl StreamAccumulator {
    /// Folds one event in. Returns the text to emit as a chunk, if any.
    pub fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::ContentDelta { text } => {
                if text.is_empty() {
                    return None;
                }
                self.text.push_str(&text);
                self.chunks += 1;
                Some(text)
            }
            StreamEvent::Metadata {
                input_tokens,
                output_tokens,
                stop_reason,
            } => {
                if let Some(n) = input_tokens {
                    self.input_tokens = n;
                }
                if let Some(n) = output_tokens {
                    self.output_tokens = n;
                }
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                None
            }
            StreamEvent::StreamEnd { stop_reason } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                None
            }
        }
    }

    pub fn finish(self, model: &str) -> Response {
        let mut response = Response::new(self.text, model);
        response.stop_reason = self.stop_reason.unwrap_or_else(|| "end_turn".to_string());
        response.input_tokens = self.input_tokens;
        response.output_tokens = self.output_tokens;
        response
            .metadata
            .insert("streamed".into(), serde_json::Value::Bool(true));
        response
            .metadata
            .insert("chunks".into(), serde_json::Value::from(self.chunks));
        response
    }
}

/// A completed stream kept for verbatim replay.
#[derive(Debug, Clone)]
pub struct CompletedStream {
    pub chunks: Vec<StreamChunk>,
    pub response: Response,
}

/// Completed streams retained in memory by fingerprint, least recently used evicted first.
pub struct StreamCoordinator {
    retained: Mutex<LruCache<String, Arc<CompletedStream>>>,
}

impl StreamCoordinator {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            retained: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<CompletedStream>>> {
        self.retained.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CompletedStream>> {
        self.lock().get(&key.hash).cloned()
    }

    pub fn retain(&self, key: &CacheKey, stream: CompletedStream) {
        self.lock().put(key.hash.clone(), Arc::new(stream));
    }

    pub fn forget(&self, key: &CacheKey) -> bool {
        self.lock().pop(&key.hash).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StreamCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_STREAMS)
    }
}

struct StreamShared {
    id: String,
    fingerprint: Option<CacheKey>,
    buffer: ChunkBuffer,
    lifecycle: Lifecycle,
}

/// Handle to a streaming request.
///
/// Chunks are buffered as they arrive and stay available after the stream ends,
/// including after a failure.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<StreamShared>,
}

impl StreamHandle {
    fn new(id: String, fingerprint: Option<CacheKey>, lifecycle: Lifecycle) -> Self {
        Self {
            shared: Arc::new(StreamShared {
                id,
                fingerprint,
                buffer: ChunkBuffer::new(),
                lifecycle,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn fingerprint(&self) -> Option<&CacheKey> {
        self.shared.fingerprint.as_ref()
    }

    pub fn state(&self) -> RequestState {
        self.shared.lifecycle.state()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == RequestState::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.state() == RequestState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.state() == RequestState::Failed
    }

    /// Every chunk received so far, in order.
    pub fn chunks(&self) -> Vec<StreamChunk> {
        self.shared.buffer.snapshot()
    }

    /// Chunks not returned by a previous call.
    pub fn drain_chunks(&self) -> Vec<StreamChunk> {
        self.shared.buffer.drain()
    }

    /// Concatenated text of the chunks received so far.
    pub fn content(&self) -> String {
        self.shared.buffer.text()
    }

    /// Buffered chunks first, then live ones, ending when the stream ends.
    pub fn subscribe(&self) -> impl Stream<Item = StreamChunk> + Send + 'static {
        let shared = self.shared.clone();
        let rx = shared.buffer.version.subscribe();
        futures::stream::unfold((shared, rx, 0usize), |(shared, mut rx, next)| async move {
            loop {
                match shared.buffer.at(next) {
                    Ok(chunk) => return Some((chunk, (shared, rx, next + 1))),
                    Err(true) => return None,
                    Err(false) => {
                        if rx.changed().await.is_err() {
                            return None;
                        }
                    }
                }
            }
        })
    }

    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        self.shared.lifecycle.wait(timeout).await == RequestState::Completed
    }

    pub fn wait_for_completion_blocking(&self, timeout: Option<Duration>) -> bool {
        self.shared.lifecycle.wait_blocking(timeout) == RequestState::Completed
    }

    /// Waits for the aggregated response.
    pub async fn response(&self) -> Result<Response> {
        self.shared.lifecycle.wait(None).await;
        if let Some(error) = self.shared.lifecycle.error() {
            return Err(Error::Failed(error));
        }
        self.shared
            .lifecycle
            .response()
            .ok_or_else(|| Error::runtime(format!("stream {} has no result", self.shared.id)))
    }

    pub fn get_error(&self) -> Option<String> {
        self.shared.lifecycle.error().map(|e| e.to_string())
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("chunks", &self.shared.buffer.lock().chunks.len())
            .finish()
    }
}

fn deliver(callback: Option<&ChunkCallback>, chunk: &StreamChunk, request_id: &str) {
    if let Some(cb) = callback {
        if std::panic::catch_unwind(AssertUnwindSafe(|| cb(chunk))).is_err() {
            warn!(request_id, "chunk callback panicked, continuing stream");
        }
    }
}

impl EngineInner {
    /// Starts a streaming request, or replays a completed one with the same fingerprint.
    pub(crate) async fn start_stream(
        self: &Arc<Self>,
        id: &str,
        resolved: &ResolvedRequest,
    ) -> Result<StreamHandle> {
        let req = &resolved.request;
        let key = self.deriver().derive_stream(resolved);
        self.notify(
            req,
            EngineEvent::RequestStarted {
                request_id: id.to_string(),
                provider: resolved.provider.to_string(),
                model: resolved.model.clone(),
            },
        );

        if let Some(key) = &key {
            if req.clear_cache {
                self.coordinator().forget(key);
                self.cache().clear(key).await;
                self.notify(
                    req,
                    EngineEvent::CacheCleared {
                        request_id: id.to_string(),
                        fingerprint: key.hash.clone(),
                    },
                );
            }
            if req.use_cache {
                if let Some(handle) = self.replay(id, resolved, key).await {
                    return Ok(handle);
                }
            }
        }

        let adapter = self.providers().get(resolved.provider)?;
        let call = adapter.prepare(resolved)?;

        let lifecycle = Lifecycle::new();
        lifecycle.try_begin();
        let handle = StreamHandle::new(id.to_string(), key.clone(), lifecycle);

        let engine = self.clone();
        let shared = handle.shared.clone();
        let resolved = resolved.clone();
        self.runtime().spawn(async move {
            let run = AssertUnwindSafe(engine.drive_stream(&shared, &resolved, adapter, call));
            let outcome = match run.catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::runtime("stream task panicked")),
            };
            shared.buffer.close();
            match outcome {
                Ok(response) => {
                    shared.lifecycle.complete(response);
                }
                Err(e) => {
                    warn!(request_id = %shared.id, error = %e, "stream failed");
                    engine.notify(
                        &resolved.request,
                        EngineEvent::RequestFailed {
                            request_id: shared.id.clone(),
                            error: e.to_string(),
                        },
                    );
                    shared.lifecycle.fail(e);
                }
            }
        });

        Ok(handle)
    }

    async fn replay(&self, id: &str, resolved: &ResolvedRequest, key: &CacheKey) -> Option<StreamHandle> {
        let req = &resolved.request;
        let (chunks, mut response, source) = match self.coordinator().get(key) {
            Some(done) => (done.chunks.clone(), done.response.clone(), CacheSource::Local),
            None => {
                let (entry, source) = self.cache().get(key).await;
                let entry = match entry {
                    Some(entry) => entry,
                    None => {
                        self.notify(
                            req,
                            EngineEvent::CacheMiss {
                                request_id: id.to_string(),
                                fingerprint: key.hash.clone(),
                            },
                        );
                        return None;
                    }
                };
                let chunk = StreamChunk::new(entry.payload.text.clone(), entry.payload.model.clone())
                    .with_metadata("replay", serde_json::Value::Bool(true));
                (vec![chunk], entry.payload, source)
            }
        };
        response.cache_source = source;

        self.notify(
            req,
            EngineEvent::CacheHit {
                request_id: id.to_string(),
                fingerprint: key.hash.clone(),
                source,
            },
        );
        debug!(fingerprint = %key, chunks = chunks.len(), %source, "replaying completed stream");

        let handle = StreamHandle::new(
            id.to_string(),
            Some(key.clone()),
            Lifecycle::completed(response),
        );
        let count = chunks.len();
        for chunk in chunks {
            deliver(req.on_chunk.as_ref(), &chunk, id);
            handle.shared.buffer.push(chunk);
        }
        handle.shared.buffer.close();
        self.notify(
            req,
            EngineEvent::StreamReplayed {
                request_id: id.to_string(),
                fingerprint: key.hash.clone(),
                chunks: count,
            },
        );
        Some(handle)
    }

    async fn drive_stream(
        &self,
        shared: &StreamShared,
        resolved: &ResolvedRequest,
        adapter: Arc<dyn crate::provider::ProviderAdapter>,
        call: crate::provider::ProviderCall,
    ) -> Result<Response> {
        let req = &resolved.request;
        let id = shared.id.as_str();
        let permit = self.limiter().acquire(&resolved.model).await?;
        self.notify(
            req,
            EngineEvent::ApiCallStarted {
                request_id: id.to_string(),
                model: resolved.model.clone(),
            },
        );
        let started = Instant::now();

        // Only opening the stream is retried; chunks already delivered cannot be taken back.
        let mut events = self
            .retry()
            .run(
                |n| self.notify_retry(req, id, n),
                || adapter.invoke_stream(&call),
            )
            .await?;

        let mut acc = StreamAccumulator::default();
        while let Some(event) = events.next().await {
            if let Some(text) = acc.apply(event?) {
                let chunk = StreamChunk::new(text, call.model.clone());
                let len = chunk.text.len();
                deliver(req.on_chunk.as_ref(), &chunk, id);
                let index = shared.buffer.push(chunk);
                self.notify(
                    req,
                    EngineEvent::StreamChunkReceived {
                        request_id: id.to_string(),
                        index,
                        len,
                    },
                );
            }
        }
        drop(permit);

        let response = acc.finish(&call.model);
        self.notify(
            req,
            EngineEvent::ApiCallFinished {
                request_id: id.to_string(),
                model: response.model.clone(),
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        );

        if let (Some(key), true) = (&shared.fingerprint, req.use_cache) {
            self.coordinator().retain(
                key,
                CompletedStream {
                    chunks: shared.buffer.snapshot(),
                    response: response.clone(),
                },
            );
            let entry = CacheEntry::new(
                key.hash.clone(),
                response.clone(),
                EntryMetadata::from_request(resolved),
            );
            self.cache().set(key, &entry).await;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_builds_response() {
        let mut acc = StreamAccumulator::default();
        assert_eq!(acc.apply(StreamEvent::delta("Par")), Some("Par".into()));
        assert_eq!(acc.apply(StreamEvent::delta("")), None);
        assert_eq!(acc.apply(StreamEvent::delta("is")), Some("is".into()));
        acc.apply(StreamEvent::Metadata {
            input_tokens: Some(7),
            output_tokens: Some(2),
            stop_reason: None,
        });
        acc.apply(StreamEvent::StreamEnd {
            stop_reason: Some("stop".into()),
        });
        let resp = acc.finish("m");
        assert_eq!(resp.text, "Paris");
        assert_eq!(resp.stop_reason, "stop");
        assert_eq!(resp.total_tokens(), 9);
        assert_eq!(resp.metadata["chunks"], 2);
    }

    #[test]
    fn drain_returns_only_new_chunks() {
        let buffer = ChunkBuffer::new();
        buffer.push(StreamChunk::new("a", "m"));
        buffer.push(StreamChunk::new("b", "m"));
        assert_eq!(buffer.drain().len(), 2);
        assert!(buffer.drain().is_empty());
        buffer.push(StreamChunk::new("c", "m"));
        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].text, "c");
        assert_eq!(buffer.snapshot().len(), 3);
        assert_eq!(buffer.text(), "abc");
    }

    #[tokio::test]
    async fn subscribe_yields_buffered_then_live_chunks() {
        let lifecycle = Lifecycle::new();
        lifecycle.try_begin();
        let handle = StreamHandle::new("s".into(), None, lifecycle);
        handle.shared.buffer.push(StreamChunk::new("a", "m"));
        let sub = handle.subscribe();

        let producer = handle.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.buffer.push(StreamChunk::new("b", "m"));
            producer.buffer.close();
        });

        let texts: Vec<String> = sub.map(|c| c.text).collect().await;
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn coordinator_evicts_oldest() {
        let coord = StreamCoordinator::new(1);
        let done = CompletedStream {
            chunks: vec![],
            response: Response::new("x", "m"),
        };
        coord.retain(&CacheKey::new("a"), done.clone());
        coord.retain(&CacheKey::new("b"), done);
        assert!(coord.get(&CacheKey::new("a")).is_none());
        assert!(coord.get(&CacheKey::new("b")).is_some());
        assert!(coord.forget(&CacheKey::new("b")));
        assert!(coord.is_empty());
    }
}
