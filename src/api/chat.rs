//! Chat relay and generation-stop handlers.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use serde::Deserialize;

use crate::api::common::streaming::{relay_body, sse_ok_response};
use crate::api::common::{apply_allow_origin, preflight_response};
use crate::error::RelayError;
use crate::state::AppState;
use crate::upstream::{ChatQuery, DEFAULT_USER_ID};

/// Inbound chat turn, from a JSON body or a query string.
///
/// Each field has a fallback spelling (`message`, `userId`, `conversationId`);
/// the primary name wins when a client sends both.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatStreamRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, rename = "userId")]
    pub user_id_camel: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default, rename = "conversationId")]
    pub conversation_id_camel: Option<String>,
}

impl ChatStreamRequest {
    /// Parse a JSON request body.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] when the body is not a JSON object
    /// with string-or-null fields.
    pub fn from_json(body: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(body)
            .map_err(|err| RelayError::InvalidRequest(format!("malformed JSON body: {err}")))
    }

    /// Parse `query`/`message`, `user_id`/`userId` and
    /// `conversation_id`/`conversationId` from a raw query string.
    #[must_use]
    pub fn from_query(raw_query: Option<&str>) -> Self {
        let mut request = Self::default();
        let Some(raw_query) = raw_query else {
            return request;
        };
        for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
            let slot = match key.as_ref() {
                "query" => &mut request.query,
                "message" => &mut request.message,
                "user_id" => &mut request.user_id,
                "userId" => &mut request.user_id_camel,
                "conversation_id" => &mut request.conversation_id,
                "conversationId" => &mut request.conversation_id_camel,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        request
    }

    #[must_use]
    pub fn into_chat_query(self) -> ChatQuery {
        ChatQuery::new(
            self.query.or(self.message).unwrap_or_default(),
            non_empty(self.user_id)
                .or_else(|| non_empty(self.user_id_camel))
                .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            non_empty(self.conversation_id).or(self.conversation_id_camel),
        )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Default, Deserialize)]
struct StopBody {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default, rename = "userId")]
    user_id_camel: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

/// `POST /api/chat/stream`.
pub async fn stream_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match ChatStreamRequest::from_json(&body) {
        Ok(request) => relay_response(&state, request.into_chat_query(), "POST"),
        Err(err) => {
            tracing::warn!(error = %err, "rejected chat stream request");
            err.into_response()
        }
    }
}

/// `GET /api/chat/stream?query=..`.
pub async fn stream_query_handler(
    State(state): State<Arc<AppState>>,
    raw_query: Option<&str>,
) -> Response {
    let request = ChatStreamRequest::from_query(raw_query);
    relay_response(&state, request.into_chat_query(), "GET")
}

/// `OPTIONS /api/chat/stream`.
#[must_use]
pub fn preflight_handler() -> Response {
    preflight_response()
}

fn relay_response(state: &AppState, query: ChatQuery, method: &'static str) -> Response {
    let request_seq = state.next_request_seq();
    let request_id = state.request_uuid(request_seq);
    tracing::info!(
        %request_id,
        method,
        user_id = %query.user_id,
        has_conversation = query.conversation_id.is_some(),
        query_bytes = query.query.len(),
        "relaying chat stream"
    );

    let events = state.upstream.stream_chat(query);
    sse_ok_response(Body::from_stream(relay_body(events, request_id)))
}

/// `POST /api/chat/{task_id}/stop`.
pub async fn stop_handler(
    State(state): State<Arc<AppState>>,
    task_id: &str,
    raw_query: Option<&str>,
    body: Bytes,
) -> Response {
    let user_id = stop_user_id(raw_query, &body);
    tracing::info!(task_id, user_id = %user_id, "stopping generation");

    let mut response = match state.upstream.stop_generation(task_id, &user_id).await {
        Ok(payload) => Json(payload).into_response(),
        Err(err) => {
            tracing::warn!(task_id, error = %err, "stop generation failed");
            err.into_response()
        }
    };
    apply_allow_origin(&mut response);
    response
}

/// User id for a stop request: query string first, then an optional JSON body.
fn stop_user_id(raw_query: Option<&str>, body: &[u8]) -> String {
    let from_query = raw_query.and_then(|raw| {
        url::form_urlencoded::parse(raw.as_bytes())
            .find(|(key, value)| matches!(key.as_ref(), "user_id" | "userId") && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    });
    if let Some(user_id) = from_query {
        return user_id;
    }

    // A missing or unparseable body is not an error here.
    let from_body = serde_json::from_slice::<StopBody>(body)
        .ok()
        .and_then(|body| {
            non_empty(body.user_id)
                .or_else(|| non_empty(body.user_id_camel))
                .or_else(|| non_empty(body.user))
        });
    from_body.unwrap_or_else(|| DEFAULT_USER_ID.to_string())
}
