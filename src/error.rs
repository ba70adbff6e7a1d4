use serde_json::{json, Value};

/// Error type shared by the relay, upstream client and HTTP handlers.
///
/// `Upstream` and `Transport` render as their bare message so the text can be
/// surfaced to clients verbatim inside an error event.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),
    #[error("{message}")]
    Upstream { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
    #[error("Segmentation error: {0}")]
    Segmentation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Upstream HTTP status carried by this error, when one was received.
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            RelayError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Client-facing error body, shaped like an in-stream error event.
#[must_use]
pub fn error_payload(message: &str) -> Value {
    json!({
        "event": "error",
        "message": message,
    })
}

/// Format an error as (`status_code`, JSON body).
///
/// An oversized request body is a 413; every other failure that reaches a
/// non-streamed response maps to a 500. The body carries the error's description.
#[must_use]
pub fn format_error(err: &RelayError) -> (http::StatusCode, Value) {
    let status = match err {
        RelayError::PayloadTooLarge(_) => http::StatusCode::PAYLOAD_TOO_LARGE,
        _ => http::StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error_payload(&err.to_string()))
}

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}
