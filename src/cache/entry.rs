//! Stored cache documents.

use crate::types::{ResolvedRequest, Response};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

const PREVIEW_CHARS: usize = 100;

/// Descriptive fields kept next to a cached payload. Never consulted on lookup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub request_preview: String,
    pub model: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Unix seconds.
    pub cached_at: u64,
}

impl EntryMetadata {
    pub fn from_request(request: &ResolvedRequest) -> Self {
        let req = &request.request;
        Self {
            request_preview: req.prompt.preview(PREVIEW_CHARS),
            model: request.model.clone(),
            provider: request.provider.as_str().to_string(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            system_prompt: req.system_prompt.clone(),
            schema: req.schema.as_ref().map(|s| s.name.clone()),
            cached_at: unix_now(),
        }
    }
}

/// One cached response as persisted by every tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub payload: Response,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    pub fn new(fingerprint: impl Into<String>, payload: Response, metadata: EntryMetadata) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            payload,
            metadata,
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
