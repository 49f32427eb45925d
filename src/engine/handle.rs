//! Handle for one submitted request.

use super::core::EngineInner;
use super::lifecycle::Lifecycle;
use crate::cache::CacheKey;
use crate::types::{RequestState, ResolvedRequest, Response};
use crate::{Error, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

struct HandleInner {
    id: String,
    engine: Arc<EngineInner>,
    request: ResolvedRequest,
    fingerprint: Option<CacheKey>,
    lifecycle: Lifecycle,
}

/// A request that runs on a background task once started.
///
/// Cloning is cheap; clones observe the same execution. Waiting with a timeout never
/// cancels the work.
#[derive(Clone)]
pub struct RequestHandle {
    inner: Arc<HandleInner>,
}

impl RequestHandle {
    pub(crate) fn new(engine: Arc<EngineInner>, request: ResolvedRequest) -> Self {
        let fingerprint = engine.deriver().derive(&request);
        Self {
            inner: Arc::new(HandleInner {
                id: uuid::Uuid::new_v4().to_string(),
                engine,
                request,
                fingerprint,
                lifecycle: Lifecycle::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Cache fingerprint, `None` when the request is not cache-eligible.
    pub fn fingerprint(&self) -> Option<&CacheKey> {
        self.inner.fingerprint.as_ref()
    }

    pub fn request(&self) -> &ResolvedRequest {
        &self.inner.request
    }

    /// Starts execution. Calling it again while pending or after completion does nothing.
    pub fn generate(&self) -> &Self {
        if !self.inner.lifecycle.try_begin() {
            debug!(request_id = %self.inner.id, state = %self.state(), "generate ignored, already started");
            return self;
        }
        let inner = self.inner.clone();
        self.inner.engine.runtime().spawn(async move {
            let run = AssertUnwindSafe(inner.engine.execute(&inner.id, &inner.request));
            match run.catch_unwind().await {
                Ok(Ok(response)) => {
                    inner.lifecycle.complete(response);
                }
                Ok(Err(e)) => {
                    inner.lifecycle.fail(e);
                }
                Err(_) => {
                    warn!(request_id = %inner.id, "request task panicked");
                    inner.lifecycle.fail(Error::runtime("request task panicked"));
                }
            }
        });
        self
    }

    pub fn state(&self) -> RequestState {
        self.inner.lifecycle.state()
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

    /// Starts the request if needed, then waits up to `timeout` (forever on `None`).
    /// Returns whether the request completed successfully.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        match self.state() {
            RequestState::Completed => return true,
            RequestState::Failed => return false,
            RequestState::NotStarted => {
                self.generate();
            }
            RequestState::Pending => {}
        }
        self.inner.lifecycle.wait(timeout).await == RequestState::Completed
    }

    /// Blocking variant for callers outside async code.
    pub fn wait_for_completion_blocking(&self, timeout: Option<Duration>) -> bool {
        match self.state() {
            RequestState::Completed => return true,
            RequestState::Failed => return false,
            RequestState::NotStarted => {
                self.generate();
            }
            RequestState::Pending => {}
        }
        self.inner.lifecycle.wait_blocking(timeout) == RequestState::Completed
    }

    /// Starts the request if needed and waits for its result.
    pub async fn response(&self) -> Result<Response> {
        self.wait_for_completion(None).await;
        self.result()
    }

    /// The terminal result, without waiting.
    pub fn result(&self) -> Result<Response> {
        if let Some(error) = self.inner.lifecycle.error() {
            return Err(Error::Failed(error));
        }
        self.inner.lifecycle.response().ok_or_else(|| {
            Error::runtime(format!(
                "request {} has no result yet (state {})",
                self.inner.id,
                self.state()
            ))
        })
    }

    /// Response text, once completed.
    pub fn content(&self) -> Option<String> {
        self.inner.lifecycle.response().map(|r| r.text)
    }

    /// Description of the terminal failure, if any.
    pub fn get_error(&self) -> Option<String> {
        self.inner.lifecycle.error().map(|e| e.to_string())
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.inner.id)
            .field("model", &self.inner.request.model)
            .field("state", &self.state())
            .finish()
    }
}
