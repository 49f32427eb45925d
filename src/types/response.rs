//! Normalized responses and stream chunks.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    #[default]
    Miss,
    Local,
    Remote,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSource::Miss => "miss",
            CacheSource::Local => "local",
            CacheSource::Remote => "remote",
        }
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheSource::Miss)
    }
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-agnostic generation result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    /// Model that actually served the call.
    pub model: String,
    pub stop_reason: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Parsed structured-output payload, when a schema was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
    #[serde(default)]
    pub cache_source: CacheSource,
}

impl Response {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Reasoning tokens, when the adapter reported them under `reasoning_tokens`.
    pub fn reasoning_tokens(&self) -> Option<u64> {
        self.metadata.get("reasoning_tokens").and_then(|v| v.as_u64())
    }

    /// Prompt tokens served from the provider's own prompt cache (`cached_tokens`).
    pub fn cached_tokens(&self) -> Option<u64> {
        self.metadata.get("cached_tokens").and_then(|v| v.as_u64())
    }

    /// Deserializes the structured payload into `T`.
    pub fn structured<T: DeserializeOwned>(&self) -> crate::Result<Option<T>> {
        match &self.structured {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }
}

/// A fragment of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
    pub model: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl StreamChunk {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_source_defaults_to_miss_when_absent() {
        let resp: Response = serde_json::from_value(json!({
            "text": "Paris",
            "model": "m",
            "stop_reason": "end_turn",
            "input_tokens": 3,
            "output_tokens": 1
        }))
        .unwrap();
        assert_eq!(resp.cache_source, CacheSource::Miss);
        assert_eq!(resp.total_tokens(), 4);
    }

    #[test]
    fn structured_payload_deserializes() {
        #[derive(Deserialize)]
        struct Capital {
            city: String,
        }
        let mut resp = Response::new("{}", "m");
        assert!(resp.structured::<Capital>().unwrap().is_none());
        resp.structured = Some(json!({"city": "Paris"}));
        let cap: Capital = resp.structured().unwrap().unwrap();
        assert_eq!(cap.city, "Paris");
    }

    #[test]
    fn usage_details_come_from_metadata() {
        let mut resp = Response::new("Paris", "o3-mini");
        assert_eq!(resp.reasoning_tokens(), None);
        resp.metadata.insert("reasoning_tokens".into(), json!(128));
        resp.metadata.insert("cached_tokens".into(), json!(1024));
        assert_eq!(resp.reasoning_tokens(), Some(128));
        assert_eq!(resp.cached_tokens(), Some(1024));
    }
}
