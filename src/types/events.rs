//! Streaming events emitted by provider adapters.

use serde::{Deserialize, Serialize};

/// Unified streaming event.
///
/// Adapters translate their wire events into these; the engine accumulates them into
/// chunks and a final [`Response`](super::Response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StreamEvent {
    /// Partial content delta (text streaming)
    #[serde(rename = "ContentDelta")]
    ContentDelta { text: String },

    /// Usage and finish information, possibly partial.
    #[serde(rename = "Metadata")]
    Metadata {
        #[serde(skip_serializing_if = "Option::is_none")]
        input_tokens: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        output_tokens: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },

    /// Stream end
    #[serde(rename = "StreamEnd")]
    StreamEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        StreamEvent::ContentDelta { text: text.into() }
    }
}
