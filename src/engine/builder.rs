use super::core::{Engine, EngineInner};
use super::streaming::{StreamCoordinator, DEFAULT_RETAINED_STREAMS};
use crate::cache::{CacheBackend, CacheKeyDeriver, FileStore, HttpRemoteStore, TwoTierCache};
use crate::config::{EngineConfig, RetrySettings};
use crate::provider::{ProviderAdapter, ProviderRegistry};
use crate::resilience::{ConcurrencyLimiter, RetryConfig, RetryPolicy};
use crate::telemetry::EventSink;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Builder for [`Engine`].
///
/// Everything is optional except at least one provider adapter for the requests
/// you intend to send. Without explicit backends the local tier is a
/// [`FileStore`] under `config.cache_dir`, and the remote tier is an
/// [`HttpRemoteStore`] when `config.remote_cache_url` is set.
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    use_env: bool,
    providers: ProviderRegistry,
    local: Option<Arc<dyn CacheBackend>>,
    remote: Option<Arc<dyn CacheBackend>>,
    remote_ttl: Option<Duration>,
    sink: Arc<dyn EventSink>,
    max_concurrent: Option<usize>,
    retry: Option<RetryConfig>,
    retained_streams: usize,
    runtime: Option<Handle>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            use_env: false,
            providers: ProviderRegistry::new(),
            local: None,
            remote: None,
            remote_ttl: None,
            sink: crate::telemetry::noop_sink(),
            max_concurrent: None,
            retry: None,
            retained_streams: DEFAULT_RETAINED_STREAMS,
            runtime: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overlay `LLM_EXEC_*` environment variables on the configuration at build time.
    pub fn from_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    pub fn provider(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.providers.register(adapter);
        self
    }

    pub fn providers(mut self, registry: ProviderRegistry) -> Self {
        self.providers = registry;
        self
    }

    pub fn local_cache(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn remote_cache(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.remote = Some(backend);
        self
    }

    /// TTL passed to the remote tier on every write. Defaults to the cache TTL.
    pub fn remote_ttl(mut self, ttl: Duration) -> Self {
        self.remote_ttl = Some(ttl);
        self
    }

    /// Inject an event sink. Default is a no-op sink.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = Some(n);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// How many completed streams stay in memory for replay.
    pub fn retained_streams(mut self, n: usize) -> Self {
        self.retained_streams = n.max(1);
        self
    }

    /// Runtime for background tasks. Defaults to the runtime `build` is called on.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let mut config = self.config.unwrap_or_default();
        if self.use_env {
            config.apply_env()?;
        }
        if let Some(n) = self.max_concurrent {
            config.max_concurrent = Some(n);
        }
        if let Some(retry) = &self.retry {
            config.retry = RetrySettings {
                max_retries: retry.max_retries,
                base_delay_ms: retry.base_delay.as_millis() as u64,
                max_delay_ms: retry.max_delay.as_millis() as u64,
                jitter: retry.jitter,
            };
        }
        config.validate()?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                Error::configuration(
                    "no Tokio runtime: build the engine inside a runtime or pass one with runtime()",
                )
            })?,
        };

        let local: Arc<dyn CacheBackend> = match self.local {
            Some(local) => local,
            None => Arc::new(FileStore::new(config.cache_dir.clone())),
        };
        let remote: Option<Arc<dyn CacheBackend>> = match self.remote {
            Some(remote) => Some(remote),
            None => match &config.remote_cache_url {
                Some(url) => Some(Arc::new(HttpRemoteStore::new(url)?)),
                None => None,
            },
        };
        let mut cache = TwoTierCache::new(local);
        if let Some(remote) = remote {
            let ttl = self.remote_ttl.unwrap_or_else(|| config.cache_ttl());
            cache = cache.with_remote(remote, Some(ttl));
        }

        let retry = self
            .retry
            .unwrap_or_else(|| config.retry.to_retry_config());

        let inner = EngineInner {
            deriver: CacheKeyDeriver::new(config.fingerprint_len),
            limiter: ConcurrencyLimiter::new(config.max_concurrent)?,
            retry: RetryPolicy::new(retry),
            coordinator: StreamCoordinator::new(self.retained_streams),
            providers: self.providers,
            cache,
            sink: self.sink,
            runtime,
            config,
        };
        Ok(Engine {
            inner: Arc::new(inner),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
