use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 19_002;
const DEFAULT_DRIP_CHUNK_BYTES: usize = 7;
const DEFAULT_DRIP_DELAY_MS: u64 = 40;

type MockBody = UnsyncBoxBody<Bytes, Infallible>;

#[derive(Copy, Clone)]
enum MockScenario {
    Text,
    Image,
    Malformed,
    NotFound,
}

struct MockState {
    scenario: MockScenario,
    drip_chunk_bytes: usize,
    drip_delay: Duration,
    chat_requests: AtomicU64,
    stop_requests: AtomicU64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_parse("UPSTREAM_PORT", DEFAULT_UPSTREAM_PORT);
    let state = Arc::new(MockState {
        scenario: parse_scenario(),
        drip_chunk_bytes: env_parse("MOCK_DRIP_CHUNK_BYTES", DEFAULT_DRIP_CHUNK_BYTES).max(1),
        drip_delay: Duration::from_millis(env_parse("MOCK_DRIP_DELAY_MS", DEFAULT_DRIP_DELAY_MS)),
        chat_requests: AtomicU64::new(0),
        stop_requests: AtomicU64::new(0),
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));
    eprintln!("mock chat upstream listening on http://127.0.0.1:{port}/v1");

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("image") => MockScenario::Image,
        Ok("malformed") => MockScenario::Malformed,
        Ok("not_found") => MockScenario::NotFound,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &Arc<MockState>) -> Response<MockBody> {
    let (parts, body) = request.into_parts();
    drain_request_body(body).await;

    let method = parts.method;
    let path = parts.uri.path().strip_prefix("/v1").unwrap_or(parts.uri.path());

    if method == Method::GET && path == "/_mock/stats" {
        return stats_response(state);
    }
    if method != Method::POST {
        return json_response(StatusCode::METHOD_NOT_ALLOWED, br#"{"message":"method not allowed"}"#);
    }

    if path == "/chat-messages" {
        state.chat_requests.fetch_add(1, Ordering::Relaxed);
        return chat_response(state);
    }
    if path.starts_with("/chat-messages/") && path.ends_with("/stop") {
        state.stop_requests.fetch_add(1, Ordering::Relaxed);
        return json_response(StatusCode::OK, br#"{"result":"success"}"#);
    }
    json_response(StatusCode::NOT_FOUND, br#"{"code":"not_found","message":"not found"}"#)
}

async fn drain_request_body(mut body: Incoming) {
    while let Some(frame_result) = body.frame().await {
        if frame_result.is_err() {
            break;
        }
    }
}

fn chat_response(state: &MockState) -> Response<MockBody> {
    let script: &'static [u8] = match state.scenario {
        MockScenario::Text => CHAT_STREAM_TEXT,
        MockScenario::Image => CHAT_STREAM_IMAGE,
        MockScenario::Malformed => CHAT_STREAM_MALFORMED,
        MockScenario::NotFound => {
            return json_response(
                StatusCode::NOT_FOUND,
                br#"{"code":"not_found","message":"Conversation Not Exists.","status":404}"#,
            );
        }
    };

    // Deliberately small chunks so lines, markers and UTF-8 sequences straddle boundaries.
    let delay = state.drip_delay;
    let chunks = script.chunks(state.drip_chunk_bytes);
    let frames = futures_util::stream::unfold(chunks, move |mut chunks| async move {
        let chunk = chunks.next()?;
        tokio::time::sleep(delay).await;
        Some((Ok::<_, Infallible>(Frame::data(Bytes::from_static(chunk))), chunks))
    });

    let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn stats_response(state: &MockState) -> Response<MockBody> {
    let chat = state.chat_requests.load(Ordering::Relaxed);
    let stop = state.stop_requests.load(Ordering::Relaxed);
    let body = format!("{{\"chat_requests\":{chat},\"stop_requests\":{stop}}}");
    simple_response(StatusCode::OK, "application/json", Bytes::from(body.into_bytes()))
}

fn json_response(status: StatusCode, body: &'static [u8]) -> Response<MockBody> {
    simple_response(status, "application/json", Bytes::from_static(body))
}

fn simple_response(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<MockBody> {
    let mut response = Response::new(Full::new(body).boxed_unsync());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

const CHAT_STREAM_TEXT: &[u8] = "event: ping\n\ndata: {\"event\":\"message\",\"task_id\":\"task-mock\",\"message_id\":\"m-1\",\"conversation_id\":\"conv-mock\",\"answer\":\"Hello\"}\n\ndata: {\"event\":\"message\",\"task_id\":\"task-mock\",\"answer\":\", wörld\"}\n\ndata: {\"event\":\"message\",\"task_id\":\"task-mock\",\"answer\":\" 你好 😀\"}\n\ndata: {\"event\":\"message_end\",\"task_id\":\"task-mock\",\"conversation_id\":\"conv-mock\",\"metadata\":{}}\n\n".as_bytes();
const CHAT_STREAM_IMAGE: &[u8] = "data: {\"event\":\"message\",\"conversation_id\":\"conv-mock\",\"answer\":\"Here is a cat:\"}\n\ndata: {\"event\":\"message_file\",\"id\":\"f-1\",\"type\":\"image\",\"belongs_to\":\"assistant\",\"url\":\"https://files.example/cat.png\"}\n\ndata: {\"event\":\"message_end\",\"conversation_id\":\"conv-mock\"}\n\n".as_bytes();
const CHAT_STREAM_MALFORMED: &[u8] = "data: {\"event\":\"message\",\"answer\":\"before\"}\n\ndata: {\"event\":\"message\",\"answer\":\n\ndata: {\"event\":\"message\",\"answer\":\"after\"}\n\ndata: {\"event\":\"message_end\",\"conversation_id\":\"conv-mock\"}\n\n".as_bytes();
