//! Normalized chat events and the streaming pipeline that produces them.
//!
//! Upstream bytes flow through [`lines::LineReassembler`] (chunk boundaries),
//! then [`decoder::decode_line`] (payload marker + classification), and leave
//! as [`NormalizedEvent`] frames encoded by [`NormalizedEvent::to_sse_frame`].

pub mod decoder;
pub mod lines;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::util::push_json_string_escaped;

pub use decoder::{classify_payload, decode_line, extract_payload};
pub use lines::{line_stream, LineReassembler};

/// Client-facing event schema, independent of the upstream wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NormalizedEvent {
    /// Incremental answer text.
    Message { answer: String },
    /// Inline media reference; `file_type` is currently always `"image"`.
    MessageFile {
        #[serde(rename = "type")]
        file_type: String,
        url: String,
    },
    /// End of one turn, carrying the upstream-assigned conversation id.
    MessageEnd { conversation_id: String },
    /// Terminal failure for this stream.
    Error { message: String },
}

impl NormalizedEvent {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        NormalizedEvent::Error {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            NormalizedEvent::Message { .. } => "message",
            NormalizedEvent::MessageFile { .. } => "message_file",
            NormalizedEvent::MessageEnd { .. } => "message_end",
            NormalizedEvent::Error { .. } => "error",
        }
    }

    /// An error event ends the relay; nothing is forwarded after it.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, NormalizedEvent::Error { .. })
    }

    /// Encode as compact JSON, byte-identical to `serde_json::to_string(self)`.
    #[must_use]
    pub fn to_json(&self) -> String {
        let mut out = String::with_capacity(48);
        out.push_str("{\"event\":\"");
        out.push_str(self.name());
        out.push('"');
        match self {
            NormalizedEvent::Message { answer } => push_json_field(&mut out, "answer", answer),
            NormalizedEvent::MessageFile { file_type, url } => {
                push_json_field(&mut out, "type", file_type);
                push_json_field(&mut out, "url", url);
            }
            NormalizedEvent::MessageEnd { conversation_id } => {
                push_json_field(&mut out, "conversation_id", conversation_id);
            }
            NormalizedEvent::Error { message } => push_json_field(&mut out, "message", message),
        }
        out.push('}');
        out
    }

    /// Encode as one complete event-stream frame: `data: <json>\n\n`.
    #[must_use]
    pub fn to_sse_frame(&self) -> Bytes {
        Bytes::from(sse_data_frame(&self.to_json()))
    }
}

#[inline]
fn push_json_field(out: &mut String, key: &str, value: &str) {
    out.push_str(",\"");
    out.push_str(key);
    out.push_str("\":");
    push_json_string_escaped(out, value);
}

/// Format an unnamed event-stream frame carrying a single-line payload.
#[must_use]
pub fn sse_data_frame(json: &str) -> String {
    let mut out = String::with_capacity(8 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}
