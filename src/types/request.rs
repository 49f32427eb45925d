//! Normalized generation requests.

use super::message::Prompt;
use super::response::StreamChunk;
use crate::provider::ProviderKind;
use crate::telemetry::EngineEvent;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Per-request observer for lifecycle events (start, cache hit, API call done).
pub type ProgressCallback = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Per-request observer for streamed chunks.
pub type ChunkCallback = Arc<dyn Fn(&StreamChunk) + Send + Sync>;

/// Which API surface of a provider serves the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFamily {
    #[default]
    Responses,
    ChatCompletions,
}

impl ApiFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFamily::Responses => "responses",
            ApiFamily::ChatCompletions => "chat_completions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// Sampling knobs. `None` means "provider default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
}

/// Structured-output schema, identified by the digest of its canonical JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Derives the schema of a Rust type.
    pub fn from_type<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        let name = root
            .schema
            .metadata
            .as_ref()
            .and_then(|m| m.title.clone())
            .unwrap_or_else(T::schema_name);
        let schema = serde_json::to_value(&root).unwrap_or(serde_json::Value::Null);
        Self { name, schema }
    }

    /// Hex sha256 of the canonical serialization. Two schemas that differ only in
    /// key order share a digest.
    pub fn digest(&self) -> String {
        let canonical = crate::cache::canonical_json(&self.schema);
        let hash = Sha256::digest(canonical.as_bytes());
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// A provider-agnostic generation request.
///
/// Cache-control flags and callbacks never take part in the fingerprint.
#[derive(Clone)]
pub struct GenerateRequest {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub prompt: Prompt,
    pub system_prompt: Option<String>,
    pub sampling: SamplingParams,
    pub max_tokens: Option<u32>,
    pub schema: Option<ResponseSchema>,
    pub api_family: ApiFamily,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub use_cache: bool,
    pub clear_cache: bool,
    pub stream: bool,
    pub on_progress: Option<ProgressCallback>,
    pub on_chunk: Option<ChunkCallback>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<Prompt>) -> Self {
        Self {
            provider: None,
            model: None,
            prompt: prompt.into(),
            system_prompt: None,
            sampling: SamplingParams::default(),
            max_tokens: None,
            schema: None,
            api_family: ApiFamily::default(),
            reasoning_effort: None,
            use_cache: true,
            clear_cache: false,
            stream: false,
            on_progress: None,
            on_chunk: None,
        }
    }

    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn temperature(mut self, temp: f64) -> Self {
        self.sampling.temperature = Some(temp);
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.sampling.top_p = Some(top_p);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.sampling.top_k = Some(top_k);
        self
    }

    pub fn penalties(mut self, frequency: f64, presence: f64) -> Self {
        self.sampling.frequency_penalty = Some(frequency);
        self.sampling.presence_penalty = Some(presence);
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn api_family(mut self, family: ApiFamily) -> Self {
        self.api_family = family;
        self
    }

    pub fn reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub fn clear_cache(mut self, clear: bool) -> Self {
        self.clear_cache = clear;
        self
    }

    pub fn stream(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_chunk<F>(mut self, f: F) -> Self
    where
        F: Fn(&StreamChunk) + Send + Sync + 'static,
    {
        self.on_chunk = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for GenerateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerateRequest")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("prompt", &self.prompt.preview(150))
            .field("system_prompt", &self.system_prompt)
            .field("sampling", &self.sampling)
            .field("max_tokens", &self.max_tokens)
            .field("schema", &self.schema.as_ref().map(|s| &s.name))
            .field("api_family", &self.api_family)
            .field("reasoning_effort", &self.reasoning_effort)
            .field("use_cache", &self.use_cache)
            .field("clear_cache", &self.clear_cache)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

/// A request with engine defaults applied: provider and model chosen, token limit
/// filled, and the effective temperature decided.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub provider: ProviderKind,
    pub model: String,
    pub max_tokens: u32,
    /// `None` for reasoning calls, which take no temperature.
    pub temperature: Option<f64>,
    pub request: GenerateRequest,
}

impl ResolvedRequest {
    pub fn is_reasoning(&self) -> bool {
        self.request.reasoning_effort.is_some()
    }

    /// Deterministic calls: temperature exactly 0, or reasoning mode.
    pub fn is_deterministic(&self) -> bool {
        self.is_reasoning() || self.temperature == Some(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Capital {
        city: String,
        country: String,
    }

    #[test]
    fn schema_digest_ignores_key_order() {
        let a = ResponseSchema::new("A", json!({"type": "object", "properties": {"x": {"type": "string"}}}));
        let b = ResponseSchema::new("B", json!({"properties": {"x": {"type": "string"}}, "type": "object"}));
        assert_eq!(a.digest(), b.digest());
        let c = ResponseSchema::new("A", json!({"type": "object"}));
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn schema_from_type_is_stable() {
        let a = ResponseSchema::from_type::<Capital>();
        let b = ResponseSchema::from_type::<Capital>();
        assert_eq!(a.name, "Capital");
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn builder_defaults() {
        let req = GenerateRequest::new("hi");
        assert!(req.use_cache);
        assert!(!req.clear_cache);
        assert!(!req.stream);
        assert_eq!(req.api_family, ApiFamily::Responses);
        let dbg = format!("{:?}", req.temperature(0.0).on_chunk(|_| {}));
        assert!(dbg.contains("GenerateRequest"));
    }
}
