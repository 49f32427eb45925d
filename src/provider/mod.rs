//! # Provider Module
//!
//! The engine talks to every provider through one capability interface,
//! [`ProviderAdapter`], selected by the closed routing key [`ProviderKind`].
//! Adapters own credentials and wire formats; the engine owns caching, retries,
//! concurrency and lifecycle.

use crate::types::{ResolvedRequest, Response, StreamEvent};
use crate::{BoxStream, Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Routing key for provider adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Bedrock,
    Anthropic,
    Perplexity,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Bedrock,
        ProviderKind::Anthropic,
        ProviderKind::Perplexity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Perplexity => "perplexity",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| {
                Error::configuration_with_context(
                    format!("unsupported provider '{}'", s),
                    ErrorContext::new()
                        .with_field_path("provider")
                        .with_details("expected one of: openai, bedrock, anthropic, perplexity"),
                )
            })
    }
}

/// Provider-shaped call parameters produced by [`ProviderAdapter::prepare`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCall {
    pub provider: ProviderKind,
    pub model: String,
    pub body: serde_json::Value,
}

/// Raw provider payload, before normalization.
pub type RawResponse = serde_json::Value;

/// One provider's capabilities.
///
/// `invoke` may fail with [`ProviderError`](crate::ProviderError)s carrying codes
/// and statuses; the engine's retry policy classifies them.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Builds call parameters. Configuration problems surface here, before any call.
    fn prepare(&self, request: &ResolvedRequest) -> Result<ProviderCall>;

    async fn invoke(&self, call: &ProviderCall) -> Result<RawResponse>;

    fn normalize(&self, call: &ProviderCall, raw: RawResponse) -> Result<Response>;

    /// Opens a streaming call. Adapters without streaming keep the default.
    async fn invoke_stream(&self, call: &ProviderCall) -> Result<BoxStream<'static, StreamEvent>> {
        Err(Error::configuration(format!(
            "provider '{}' does not support streaming (model {})",
            call.provider, call.model
        )))
    }
}

/// Adapters keyed by [`ProviderKind`].
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any adapter already registered for the same kind.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned().ok_or_else(|| {
            Error::configuration_with_context(
                format!("unsupported provider '{}': no adapter registered", kind),
                ErrorContext::new().with_field_path("provider").with_source("provider_registry"),
            )
        })
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.adapters.contains_key(k))
            .collect()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_names() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!(" bedrock ".parse::<ProviderKind>().unwrap(), ProviderKind::Bedrock);
        let err = "cohere".parse::<ProviderKind>().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("unsupported provider"));
    }

    #[test]
    fn serde_names_match_display() {
        for kind in ProviderKind::ALL {
            let v = serde_json::to_value(kind).unwrap();
            assert_eq!(v, kind.as_str());
        }
    }

    #[test]
    fn missing_adapter_is_configuration_error() {
        let registry = ProviderRegistry::new();
        let err = registry.get(ProviderKind::Anthropic).err().unwrap();
        assert!(err.is_configuration());
        assert!(registry.kinds().is_empty());
    }
}
