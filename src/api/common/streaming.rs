use std::convert::Infallible;
use std::time::Instant;

use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::apply_cors_headers;
use crate::observability::log_stream_complete;
use crate::stream::NormalizedEvent;

/// Where a relayed stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayPhase {
    /// No event forwarded yet.
    Idle,
    Streaming,
    /// An error frame was sent or the upstream sequence ended.
    Closed,
}

/// Per-stream counters, logged once when the body finishes or is dropped.
struct RelayStats {
    request_id: uuid::Uuid,
    started: Instant,
    events: u64,
    errored: bool,
    reported: bool,
}

impl RelayStats {
    fn new(request_id: uuid::Uuid) -> Self {
        Self {
            request_id,
            started: Instant::now(),
            events: 0,
            errored: false,
            reported: false,
        }
    }

    fn record(&mut self, event: &NormalizedEvent) {
        self.events += 1;
        if event.is_terminal() {
            self.errored = true;
        }
    }

    fn report(&mut self, client_gone: bool) {
        if self.reported {
            return;
        }
        self.reported = true;
        log_stream_complete(
            &self.request_id,
            self.events,
            self.errored,
            client_gone,
            self.started,
        );
    }
}

impl Drop for RelayStats {
    fn drop(&mut self) {
        // Dropped before completion: hyper discarded the body because the client went away.
        self.report(true);
    }
}

/// Encode normalized events as response body frames, one frame per event.
///
/// The body ends right after the first error frame, or when the event
/// sequence is exhausted. Nothing is buffered between events.
pub(crate) fn relay_body<S>(
    events: S,
    request_id: uuid::Uuid,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = NormalizedEvent> + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(events), RelayPhase::Idle, RelayStats::new(request_id)),
        |(mut events, phase, mut stats)| async move {
            if phase == RelayPhase::Closed {
                stats.report(false);
                return None;
            }
            let Some(event) = events.next().await else {
                stats.report(false);
                return None;
            };
            if phase == RelayPhase::Idle {
                tracing::debug!(
                    request_id = %stats.request_id,
                    first_event = event.name(),
                    elapsed_ms = stats.started.elapsed().as_millis(),
                    "first relay event"
                );
            }
            stats.record(&event);
            let next = if event.is_terminal() {
                RelayPhase::Closed
            } else {
                RelayPhase::Streaming
            };
            Some((Ok(event.to_sse_frame()), (events, next, stats)))
        },
    )
}

#[inline]
pub(crate) fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    headers.insert("x-accel-buffering", http::HeaderValue::from_static("no"));
    apply_cors_headers(&mut response);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> NormalizedEvent {
        NormalizedEvent::Message {
            answer: text.to_string(),
        }
    }

    async fn collect_frames(events: Vec<NormalizedEvent>) -> Vec<Bytes> {
        relay_body(futures_util::stream::iter(events), uuid::Uuid::nil())
            .map(|frame| match frame {
                Ok(bytes) => bytes,
                Err(never) => match never {},
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_frames_in_arrival_order() {
        let frames = collect_frames(vec![message("a"), message("b")]).await;
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"data: {\"event\":\"message\",\"answer\":\"a\"}\n\n"),
                Bytes::from_static(b"data: {\"event\":\"message\",\"answer\":\"b\"}\n\n"),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_closes_stream() {
        let frames = collect_frames(vec![
            message("partial"),
            NormalizedEvent::error("upstream reset"),
            message("never forwarded"),
        ])
        .await;
        assert_eq!(frames.len(), 2);
        assert!(frames[1].starts_with(b"data: {\"event\":\"error\""));
    }

    #[tokio::test]
    async fn test_empty_sequence_ends_without_marker() {
        assert!(collect_frames(Vec::new()).await.is_empty());
    }

    #[test]
    fn test_sse_headers() {
        let response = sse_ok_response(axum::body::Body::empty());
        let headers = response.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["connection"], "keep-alive");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert_eq!(headers["access-control-allow-origin"], "*");
    }
}
