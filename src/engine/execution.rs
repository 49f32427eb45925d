//! Non-streaming execution: cache check, permit, provider call under retry, cache write.

use super::core::EngineInner;
use crate::cache::{CacheEntry, CacheKey, EntryMetadata};
use crate::resilience::RetryNotice;
use crate::telemetry::EngineEvent;
use crate::types::{CacheSource, GenerateRequest, ResolvedRequest, Response};
use crate::Result;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

impl EngineInner {
    /// Runs one logical request to its result. Streaming requests are handed to the
    /// stream coordinator and awaited.
    pub(crate) async fn execute(self: &Arc<Self>, id: &str, resolved: &ResolvedRequest) -> Result<Response> {
        if resolved.request.stream {
            return self.start_stream(id, resolved).await?.response().await;
        }

        let req = &resolved.request;
        self.notify(
            req,
            EngineEvent::RequestStarted {
                request_id: id.to_string(),
                provider: resolved.provider.to_string(),
                model: resolved.model.clone(),
            },
        );
        let key = self.deriver().derive(resolved);
        let result = self.execute_once(id, resolved, key.as_ref()).await;
        if let Err(e) = &result {
            warn!(request_id = id, model = %resolved.model, error = %e, "request failed");
            self.notify(
                req,
                EngineEvent::RequestFailed {
                    request_id: id.to_string(),
                    error: e.to_string(),
                },
            );
        }
        result
    }

    async fn execute_once(
        &self,
        id: &str,
        resolved: &ResolvedRequest,
        key: Option<&CacheKey>,
    ) -> Result<Response> {
        let req = &resolved.request;

        if let Some(key) = key {
            if req.clear_cache {
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
                let (entry, source) = self.cache().get(key).await;
                if let Some(entry) = entry {
                    let mut response = entry.payload;
                    response.cache_source = source;
                    self.notify(
                        req,
                        EngineEvent::CacheHit {
                            request_id: id.to_string(),
                            fingerprint: key.hash.clone(),
                            source,
                        },
                    );
                    return Ok(response);
                }
                self.notify(
                    req,
                    EngineEvent::CacheMiss {
                        request_id: id.to_string(),
                        fingerprint: key.hash.clone(),
                    },
                );
            }
        }

        let adapter = self.providers().get(resolved.provider)?;
        let call = adapter.prepare(resolved)?;

        let permit = self.limiter().acquire(&resolved.model).await?;
        debug!(request_id = id, model = %resolved.model, "acquired concurrency permit");
        self.notify(
            req,
            EngineEvent::ApiCallStarted {
                request_id: id.to_string(),
                model: resolved.model.clone(),
            },
        );
        let started = Instant::now();
        let raw = self
            .retry()
            .run(|n| self.notify_retry(req, id, n), || adapter.invoke(&call))
            .await?;
        let mut response = adapter.normalize(&call, raw)?;
        drop(permit);

        response.cache_source = CacheSource::Miss;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            request_id = id,
            model = %response.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            elapsed_ms,
            "api call finished"
        );
        self.notify(
            req,
            EngineEvent::ApiCallFinished {
                request_id: id.to_string(),
                model: response.model.clone(),
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
                elapsed_ms,
            },
        );

        if let (Some(key), true) = (key, req.use_cache) {
            let entry = CacheEntry::new(
                key.hash.clone(),
                response.clone(),
                EntryMetadata::from_request(resolved),
            );
            self.cache().set(key, &entry).await;
        }
        Ok(response)
    }

    pub(crate) fn notify_retry(&self, req: &GenerateRequest, id: &str, notice: &RetryNotice<'_>) {
        self.notify(
            req,
            EngineEvent::RetryScheduled {
                request_id: id.to_string(),
                attempt: notice.attempt,
                max_retries: notice.max_retries,
                delay_ms: notice.delay.as_millis() as u64,
                error: notice.error.to_string(),
            },
        );
    }

    /// Sends `event` to the sink and to the request's progress callback. A panicking
    /// observer is logged and otherwise ignored.
    pub(crate) fn notify(&self, req: &GenerateRequest, event: EngineEvent) {
        let sink = self.sink();
        if std::panic::catch_unwind(AssertUnwindSafe(|| sink.emit(&event))).is_err() {
            warn!(event = event.name(), "event sink panicked");
        }
        if let Some(cb) = &req.on_progress {
            if std::panic::catch_unwind(AssertUnwindSafe(|| cb(&event))).is_err() {
                warn!(event = event.name(), "progress callback panicked");
            }
        }
    }
}
