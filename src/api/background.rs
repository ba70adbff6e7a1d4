use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::handler::Handler;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::api::common::apply_allow_origin;
use crate::error::RelayError;
use crate::state::AppState;

const FILE_FIELD: &str = "file";

struct Upload {
    bytes: Bytes,
    file_name: Option<String>,
    content_type: Option<String>,
}

/// Route an upload through [`remove_background_handler`] with the configured
/// upload cap instead of axum's implicit multipart limit.
pub async fn remove_background(state: Arc<AppState>, request: http::Request<Body>) -> Response {
    let limit = state.config.segmentation.max_upload_bytes;
    remove_background_handler
        .layer(DefaultBodyLimit::max(limit))
        .call(request, state)
        .await
}

/// `POST /api/remove-background`: multipart image in, PNG out.
pub async fn remove_background_handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut response = match segment_upload(&state, multipart).await {
        Ok(png) => {
            let mut response = Response::new(Body::from(png));
            response.headers_mut().insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("image/png"),
            );
            response
        }
        Err(err) => {
            tracing::warn!(error = %err, "background removal failed");
            err.into_response()
        }
    };
    apply_allow_origin(&mut response);
    response
}

async fn segment_upload(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Bytes, RelayError> {
    let multipart =
        multipart.map_err(|rejection| RelayError::InvalidRequest(rejection.body_text()))?;
    let upload = read_file_field(multipart, state.config.segmentation.max_upload_bytes).await?;

    let segmenter = state.segmenter();
    tracing::info!(
        segmenter = segmenter.name(),
        file_name = upload.file_name.as_deref().unwrap_or(""),
        content_type = upload.content_type.as_deref().unwrap_or(""),
        bytes = upload.bytes.len(),
        "removing background"
    );
    let png = segmenter
        .segment(upload.bytes, upload.file_name.as_deref())
        .await?;
    tracing::info!(bytes = png.len(), "background removed");
    Ok(png)
}

async fn read_file_field(mut multipart: Multipart, limit: usize) -> Result<Upload, RelayError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| multipart_error(err, limit))?;
        if bytes.is_empty() {
            return Err(RelayError::InvalidRequest("uploaded file is empty".to_string()));
        }
        return Ok(Upload {
            bytes,
            file_name,
            content_type,
        });
    }
    Err(RelayError::InvalidRequest(format!(
        "missing multipart field '{FILE_FIELD}'"
    )))
}

fn multipart_error(err: MultipartError, limit: usize) -> RelayError {
    if err.status() == http::StatusCode::PAYLOAD_TOO_LARGE {
        RelayError::PayloadTooLarge(format!("upload limit is {limit} bytes"))
    } else {
        RelayError::InvalidRequest(err.body_text())
    }
}
