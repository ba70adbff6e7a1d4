use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::common::apply_allow_origin;
use crate::api::{background, chat, health};
use crate::error::RelayError;
use crate::state::AppState;

/// Largest accepted JSON request body. Uploads use `segmentation.max_upload_bytes`.
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum RouteMatch<'a> {
    Health,
    ChatStream,
    ChatStreamQuery,
    ChatStreamPreflight,
    StopGeneration { task_id: &'a str },
    RemoveBackground,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path(), base_path.as_ref());
    let raw_query = parts.uri.query();

    let mut response = match route {
        RouteMatch::Health => health::health_handler(State(state)).into_response(),
        RouteMatch::ChatStream => match read_request_body(body).await {
            Ok(body_bytes) => chat::stream_handler(State(state), body_bytes).await,
            Err(response) => response,
        },
        RouteMatch::ChatStreamQuery => {
            chat::stream_query_handler(State(state), raw_query).await
        }
        RouteMatch::ChatStreamPreflight => chat::preflight_handler(),
        RouteMatch::StopGeneration { task_id } => match read_request_body(body).await {
            Ok(body_bytes) => {
                chat::stop_handler(State(state), task_id, raw_query, body_bytes).await
            }
            Err(response) => response,
        },
        RouteMatch::RemoveBackground => {
            background::remove_background(state, Request::from_parts(parts, body)).await
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    apply_allow_origin(&mut response);
    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(body: Body) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, DEFAULT_BODY_LIMIT_BYTES)
        .await
        .map_err(|_| {
            RelayError::PayloadTooLarge(format!("limit is {DEFAULT_BODY_LIMIT_BYTES} bytes"))
                .into_response()
        })
}

fn match_route<'a>(method: &Method, path: &'a str, base_path: &str) -> RouteMatch<'a> {
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };

    match path {
        "/" | "/api/ping" => {
            if method == Method::GET {
                RouteMatch::Health
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        "/api/chat/stream" => match *method {
            Method::POST => RouteMatch::ChatStream,
            Method::GET => RouteMatch::ChatStreamQuery,
            Method::OPTIONS => RouteMatch::ChatStreamPreflight,
            _ => RouteMatch::MethodNotAllowed,
        },
        "/api/remove-background" => {
            if method == Method::POST {
                RouteMatch::RemoveBackground
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        _ => {
            let Some(task_id) = path
                .strip_prefix("/api/chat/")
                .and_then(|rest| rest.strip_suffix("/stop"))
            else {
                return RouteMatch::NotFound;
            };
            if task_id.is_empty() || task_id.contains('/') {
                RouteMatch::NotFound
            } else if method != Method::POST {
                RouteMatch::MethodNotAllowed
            } else {
                RouteMatch::StopGeneration { task_id }
            }
        }
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}
