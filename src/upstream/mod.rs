//! Client for the conversational-AI backend's chat-messages API.

use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::error::RelayError;
use crate::stream::{decode_line, line_stream, NormalizedEvent};
use crate::transport::{HttpTransport, PreparedUpstream};
use crate::util::{describe_error, truncate_with_ellipsis};

const MAX_UPSTREAM_MESSAGE_BYTES: usize = 500;
const MAX_ERROR_BODY_BYTES: usize = 16 * 1024;
const STOP_ERROR_PREFIX: &str = "Error stopping generation";

/// User id substituted when a client does not send one.
pub const DEFAULT_USER_ID: &str = "default-user";

/// One user turn to forward upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatQuery {
    pub query: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
}

impl ChatQuery {
    /// Build a query; an empty conversation id means "start a new conversation".
    #[must_use]
    pub fn new(
        query: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.filter(|id| !id.trim().is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessagesRequest<'a> {
    inputs: serde_json::Map<String, Value>,
    query: &'a str,
    user: &'a str,
    response_mode: &'static str,
    conversation_id: Option<&'a str>,
    auto_generate_name: bool,
}

impl<'a> ChatMessagesRequest<'a> {
    fn streaming(query: &'a ChatQuery) -> Self {
        Self {
            inputs: serde_json::Map::new(),
            query: &query.query,
            user: &query.user_id,
            response_mode: "streaming",
            conversation_id: query.conversation_id.as_deref(),
            auto_generate_name: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct StopRequest<'a> {
    user: &'a str,
}

type LineStream = Pin<Box<dyn Stream<Item = Result<String, reqwest::Error>> + Send>>;

enum ChatPhase {
    Connect(UpstreamClient, ChatQuery),
    Read(LineStream),
    Done,
}

/// Backend client. Holds only immutable configuration and the shared pool.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    transport: HttpTransport,
    prepared: PreparedUpstream,
}

impl UpstreamClient {
    #[must_use]
    pub fn new(transport: HttpTransport, prepared: PreparedUpstream) -> Self {
        Self {
            transport,
            prepared,
        }
    }

    #[must_use]
    pub fn prepared(&self) -> &PreparedUpstream {
        &self.prepared
    }

    /// Forward one chat turn and expose the reply as a lazy event stream.
    ///
    /// Nothing is sent until the stream is first polled. Connection and status
    /// failures surface as a single [`NormalizedEvent::Error`]; a read failure
    /// mid-body appends one trailing error event after whatever was already
    /// decoded. Dropping the stream drops the upstream response.
    pub fn stream_chat(
        &self,
        query: ChatQuery,
    ) -> impl Stream<Item = NormalizedEvent> + Send + 'static {
        futures_util::stream::unfold(
            ChatPhase::Connect(self.clone(), query),
            |mut phase| async move {
                loop {
                    match phase {
                        ChatPhase::Connect(client, query) => {
                            match client.open_chat_stream(&query).await {
                                Ok(response) => {
                                    phase = ChatPhase::Read(Box::pin(line_stream(
                                        response.bytes_stream(),
                                    )));
                                }
                                Err(err) => {
                                    return Some((
                                        NormalizedEvent::error(err.to_string()),
                                        ChatPhase::Done,
                                    ));
                                }
                            }
                        }
                        ChatPhase::Read(mut lines) => match lines.next().await {
                            Some(Ok(line)) => {
                                if let Some(event) = decode_line(&line) {
                                    return Some((event, ChatPhase::Read(lines)));
                                }
                                phase = ChatPhase::Read(lines);
                            }
                            Some(Err(err)) => {
                                let message = describe_error(&err);
                                tracing::warn!(error = %message, "upstream body read failed mid-stream");
                                return Some((NormalizedEvent::error(message), ChatPhase::Done));
                            }
                            None => return None,
                        },
                        ChatPhase::Done => return None,
                    }
                }
            },
        )
    }

    async fn open_chat_stream(&self, query: &ChatQuery) -> Result<reqwest::Response, RelayError> {
        let body = serde_json::to_vec(&ChatMessagesRequest::streaming(query))
            .map_err(|err| RelayError::Internal(format!("failed to encode chat request: {err}")))?;
        let response = self
            .transport
            .send_stream(
                self.prepared.chat_messages_url(),
                self.prepared.stream_headers(),
                body.into(),
            )
            .await?;

        let status = response.status();
        tracing::debug!(
            status = status.as_u16(),
            has_conversation = query.conversation_id.is_some(),
            "upstream chat stream opened"
        );
        if status.is_success() {
            return Ok(response);
        }
        Err(status_error(response, None, self.transport.request_timeout()).await)
    }

    /// Ask the backend to stop an in-flight generation; returns its JSON verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the backend is unreachable or times
    /// out, and [`RelayError::Upstream`] for a non-2xx status or a non-JSON body.
    pub async fn stop_generation(&self, task_id: &str, user_id: &str) -> Result<Value, RelayError> {
        let url = self.prepared.stop_url(task_id)?;
        let body = serde_json::to_vec(&StopRequest { user: user_id })
            .map_err(|err| RelayError::Internal(format!("failed to encode stop request: {err}")))?;
        let response = self
            .transport
            .send_request(&url, self.prepared.json_headers(), body.into())
            .await
            .map_err(|err| RelayError::Transport(format!("{STOP_ERROR_PREFIX}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(
                response,
                Some(STOP_ERROR_PREFIX),
                self.transport.request_timeout(),
            )
            .await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| RelayError::Transport(format!("{STOP_ERROR_PREFIX}: {}", describe_error(&err))))?;
        serde_json::from_slice(&bytes).map_err(|err| RelayError::Upstream {
            status: status.as_u16(),
            message: format!("{STOP_ERROR_PREFIX}: invalid JSON response: {err}"),
        })
    }
}

/// Turn a non-2xx response into an error, preferring the backend's own message.
async fn status_error(
    response: reqwest::Response,
    fallback_prefix: Option<&str>,
    read_timeout: Duration,
) -> RelayError {
    let status = response.status().as_u16();
    let fallback = match response.error_for_status_ref() {
        Err(err) => describe_error(&err),
        Ok(_) => format!("upstream returned status {status}"),
    };
    let message = read_error_body(response, read_timeout)
        .await
        .and_then(|body| upstream_error_message(&body));
    let message = message.unwrap_or_else(|| match fallback_prefix {
        Some(prefix) => format!("{prefix}: {fallback}"),
        None => fallback,
    });
    tracing::warn!(status, message = %message, "upstream returned error status");
    RelayError::Upstream { status, message }
}

/// Read at most [`MAX_ERROR_BODY_BYTES`] of an error body within `read_timeout`.
async fn read_error_body(response: reqwest::Response, read_timeout: Duration) -> Option<Bytes> {
    let status = response.status().as_u16();
    let read = async {
        let mut body = BytesMut::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    tracing::debug!(error = %err, status, "failed to read upstream error body");
                    return None;
                }
            };
            let room = MAX_ERROR_BODY_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= MAX_ERROR_BODY_BYTES {
                break;
            }
        }
        Some(body.freeze())
    };
    match tokio::time::timeout(read_timeout, read).await {
        Ok(body) => body,
        Err(_) => {
            tracing::debug!(status, ?read_timeout, "timed out reading upstream error body");
            None
        }
    }
}

/// Top-level `message` string of a JSON error body, bounded in length.
#[must_use]
pub fn upstream_error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let message = value.get("message")?.as_str()?.trim();
    if message.is_empty() {
        return None;
    }
    Some(truncate_with_ellipsis(message, MAX_UPSTREAM_MESSAGE_BYTES))
}
