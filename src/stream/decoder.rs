use serde_json::Value;

use super::NormalizedEvent;
use crate::util::truncate_with_ellipsis;

/// Prefix marking a line that carries a JSON payload.
pub const PAYLOAD_MARKER: &str = "data:";

const LOG_PREVIEW_BYTES: usize = 120;

/// Strip the payload marker (and one optional following space) from a line.
///
/// Any other line (`event:`, `id:`, comments, blank keep-alive lines) yields
/// `None`.
#[inline]
#[must_use]
pub fn extract_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(PAYLOAD_MARKER)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Decode one reassembled line into at most one event.
///
/// Malformed JSON after the marker is logged and dropped; it never ends the
/// stream.
#[must_use]
pub fn decode_line(line: &str) -> Option<NormalizedEvent> {
    let payload = extract_payload(line)?;
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => classify_payload(&value),
        Err(err) => {
            tracing::warn!(
                error = %err,
                payload = %truncate_with_ellipsis(payload, LOG_PREVIEW_BYTES),
                "skipping malformed upstream payload"
            );
            None
        }
    }
}

/// Map a parsed upstream payload to a normalized event.
///
/// Field presence decides, checked in order:
/// 1. `answer` -> `message` (a turn's first chunk often also carries
///    `conversation_id`; it is still a message),
/// 2. `type == "image"` with a string `url` -> `message_file`,
/// 3. string `conversation_id` -> `message_end`.
///
/// The upstream `event` field is not consulted.
#[must_use]
pub fn classify_payload(payload: &Value) -> Option<NormalizedEvent> {
    let object = payload.as_object()?;

    if let Some(answer) = object.get("answer") {
        let answer = match answer {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        return Some(NormalizedEvent::Message { answer });
    }

    if object.get("type").and_then(Value::as_str) == Some("image") {
        return object
            .get("url")
            .and_then(Value::as_str)
            .map(|url| NormalizedEvent::MessageFile {
                file_type: "image".to_string(),
                url: url.to_string(),
            });
    }

    object
        .get("conversation_id")
        .and_then(Value::as_str)
        .map(|conversation_id| NormalizedEvent::MessageEnd {
            conversation_id: conversation_id.to_string(),
        })
}
