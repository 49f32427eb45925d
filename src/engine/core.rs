use super::builder::EngineBuilder;
use super::handle::RequestHandle;
use super::streaming::{StreamCoordinator, StreamHandle};
use crate::cache::{CacheKey, CacheKeyDeriver, TwoTierCache};
use crate::config::EngineConfig;
use crate::provider::ProviderRegistry;
use crate::resilience::{ConcurrencyLimiter, RetryPolicy};
use crate::telemetry::EventSink;
use crate::types::{ApiFamily, GenerateRequest, ResolvedRequest, Response};
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use tokio::runtime::Handle;

/// State shared by the engine and every handle it creates.
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) providers: ProviderRegistry,
    pub(crate) cache: TwoTierCache,
    pub(crate) deriver: CacheKeyDeriver,
    pub(crate) retry: RetryPolicy,
    pub(crate) limiter: ConcurrencyLimiter,
    pub(crate) coordinator: StreamCoordinator,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) runtime: Handle,
}

impl EngineInner {
    pub(crate) fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub(crate) fn cache(&self) -> &TwoTierCache {
        &self.cache
    }

    pub(crate) fn deriver(&self) -> &CacheKeyDeriver {
        &self.deriver
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub(crate) fn coordinator(&self) -> &StreamCoordinator {
        &self.coordinator
    }

    pub(crate) fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Applies defaults and rejects requests that can never succeed.
    pub(crate) fn resolve(&self, request: GenerateRequest) -> Result<ResolvedRequest> {
        if request.prompt.is_empty() {
            return Err(invalid_request("prompt", "prompt must not be empty"));
        }
        let provider = request.provider.unwrap_or(self.config.default_provider);
        // Unsupported providers fail here, before any cache or network work.
        self.providers.get(provider)?;

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        if model.trim().is_empty() {
            return Err(invalid_request("model", "model must not be empty"));
        }
        let max_tokens = request.max_tokens.unwrap_or(self.config.default_max_tokens);
        if max_tokens == 0 {
            return Err(invalid_request("max_tokens", "max_tokens must be positive"));
        }

        let temperature = if request.reasoning_effort.is_some() {
            if request.api_family != ApiFamily::Responses {
                return Err(invalid_request(
                    "reasoning_effort",
                    "reasoning effort requires the responses API family",
                ));
            }
            match request.sampling.temperature {
                Some(t) if t != 1.0 => {
                    return Err(invalid_request(
                        "temperature",
                        "reasoning calls accept no temperature other than 1",
                    ))
                }
                _ => None,
            }
        } else {
            Some(request.sampling.temperature.unwrap_or(0.0))
        };

        Ok(ResolvedRequest {
            provider,
            model,
            max_tokens,
            temperature,
            request,
        })
    }
}

fn invalid_request(field: &str, message: &str) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(format!("request.{}", field))
            .with_source("engine"),
    )
}

/// Request execution engine.
///
/// Owns the cache, the per-target limiter, the retry policy and the provider
/// registry. Cloning shares all of them.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The request with engine defaults applied.
    pub fn resolve(&self, request: GenerateRequest) -> Result<ResolvedRequest> {
        self.inner.resolve(request)
    }

    /// Fingerprint the request would be cached under, `None` when it is not cache-eligible.
    pub fn fingerprint(&self, request: &GenerateRequest) -> Result<Option<CacheKey>> {
        let resolved = self.inner.resolve(request.clone())?;
        Ok(if resolved.request.stream {
            self.inner.deriver.derive_stream(&resolved)
        } else {
            self.inner.deriver.derive(&resolved)
        })
    }

    /// Runs the request on the current task and returns its result. The error is
    /// returned exactly as raised.
    pub async fn generate(&self, request: GenerateRequest) -> Result<Response> {
        let resolved = self.inner.resolve(request)?;
        let id = uuid::Uuid::new_v4().to_string();
        self.inner.execute(&id, &resolved).await
    }

    /// Creates a handle without starting it; see [`RequestHandle::generate`].
    pub fn submit(&self, request: GenerateRequest) -> Result<RequestHandle> {
        let resolved = self.inner.resolve(request)?;
        Ok(RequestHandle::new(self.inner.clone(), resolved))
    }

    /// Starts a streaming request. A completed stream with the same fingerprint is
    /// replayed instead of calling the provider again.
    pub async fn stream(&self, mut request: GenerateRequest) -> Result<StreamHandle> {
        request.stream = true;
        let resolved = self.inner.resolve(request)?;
        let id = uuid::Uuid::new_v4().to_string();
        self.inner.start_stream(&id, &resolved).await
    }

    pub fn cache(&self) -> &TwoTierCache {
        &self.inner.cache
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.inner.limiter
    }

    pub fn stream_coordinator(&self) -> &StreamCoordinator {
        &self.inner.coordinator
    }

    /// Removes the cached result for `request`. Returns whether anything was removed.
    pub async fn clear_cache(&self, request: &GenerateRequest) -> Result<bool> {
        match self.fingerprint(request)? {
            Some(key) => {
                let retained = self.inner.coordinator.forget(&key);
                Ok(self.inner.cache.clear(&key).await || retained)
            }
            None => Ok(false),
        }
    }

    /// Clears both cache tiers and every retained stream.
    pub async fn clear_all_cache(&self) {
        self.inner.coordinator.clear();
        self.inner.cache.clear_all().await;
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("providers", &self.inner.providers)
            .field("remote_cache", &self.inner.cache.has_remote())
            .finish()
    }
}
