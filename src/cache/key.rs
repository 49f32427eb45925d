//! Cache key derivation.

use crate::types::{Prompt, ResolvedRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const DEFAULT_FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub model: Option<String>,
    pub provider: Option<String>,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            model: None,
            provider: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self.hash.len().min(8);
        &self.hash[..end]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Serializes `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sort(v))).collect();
                let mut out = serde_json::Map::new();
                for (k, v) in sorted {
                    out.insert(k.clone(), v);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    // Sorted insertion keeps the order stable even with serde_json's `preserve_order`.
    serde_json::to_string(&sort(value)).unwrap_or_default()
}

/// Derives fingerprints for cache-eligible requests.
///
/// Only deterministic calls (temperature 0, or reasoning mode) have a key at all;
/// everything else bypasses the cache. Callbacks and cache-control flags never
/// reach the digest.
#[derive(Debug, Clone)]
pub struct CacheKeyDeriver {
    len: usize,
}

impl CacheKeyDeriver {
    pub fn new(len: usize) -> Self {
        Self {
            len: len.clamp(8, 64),
        }
    }

    pub fn fingerprint_len(&self) -> usize {
        self.len
    }

    /// Key for a non-streaming request, or `None` when the request is not cache-eligible.
    pub fn derive(&self, request: &ResolvedRequest) -> Option<CacheKey> {
        if request.request.stream || !request.is_deterministic() {
            return None;
        }
        Some(self.digest(request, false))
    }

    /// Key under which a completed stream is retained and replayed.
    ///
    /// Streams live in their own namespace so a streamed result never answers a
    /// plain call and vice versa.
    pub fn derive_stream(&self, request: &ResolvedRequest) -> Option<CacheKey> {
        if !request.is_deterministic() {
            return None;
        }
        Some(self.digest(request, true))
    }

    fn digest(&self, request: &ResolvedRequest, stream: bool) -> CacheKey {
        let canonical = canonical_json(&Self::fields(request, stream));
        let hash: String = Sha256::digest(canonical.as_bytes())
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(&hash[..self.len])
            .with_model(request.model.clone())
            .with_provider(request.provider.as_str())
    }

    fn fields(request: &ResolvedRequest, stream: bool) -> Value {
        let req = &request.request;
        let prompt = match &req.prompt {
            Prompt::Text(text) => json!({ "text": text }),
            Prompt::Conversation(messages) => json!({ "messages": messages }),
        };
        let mut fields = json!({
            "provider": request.provider.as_str(),
            "api_family": req.api_family.as_str(),
            "model": request.model,
            "prompt": prompt,
            "max_tokens": request.max_tokens,
            "system_prompt": req.system_prompt,
            "temperature": request.temperature,
            "top_p": req.sampling.top_p,
            "top_k": req.sampling.top_k,
            "frequency_penalty": req.sampling.frequency_penalty,
            "presence_penalty": req.sampling.presence_penalty,
            "schema": req.schema.as_ref().map(|s| s.digest()),
            "reasoning_effort": req.reasoning_effort.map(|r| r.as_str()),
        });
        if stream {
            fields["stream"] = Value::Bool(true);
        }
        fields
    }
}

impl Default for CacheKeyDeriver {
    fn default() -> Self {
        Self::new(DEFAULT_FINGERPRINT_LEN)
    }
}
