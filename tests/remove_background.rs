use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use chat_relay::config::AppConfig;
use chat_relay::error::RelayError;
use chat_relay::routing::dispatch::dispatch_request;
use chat_relay::segment::Segmenter;
use chat_relay::state::AppState;
use chat_relay::transport::{HttpTransport, PreparedUpstream};
use chat_relay::upstream::UpstreamClient;
use parking_lot::Mutex;
use serde_json::Value;

const BOUNDARY: &str = "relay-test-boundary";

#[derive(Default)]
struct FakeSegmenter {
    calls: Mutex<Vec<(Bytes, Option<String>)>>,
    fail: bool,
}

#[async_trait]
impl Segmenter for FakeSegmenter {
    async fn segment(&self, image: Bytes, file_name: Option<&str>) -> Result<Bytes, RelayError> {
        self.calls
            .lock()
            .push((image.clone(), file_name.map(str::to_string)));
        if self.fail {
            return Err(RelayError::Segmentation("model crashed".to_string()));
        }
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(&image);
        Ok(Bytes::from(png))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

fn build_state(segmenter: Arc<FakeSegmenter>) -> Arc<AppState> {
    build_state_with_limit(segmenter, AppConfig::default().segmentation.max_upload_bytes)
}

fn build_state_with_limit(segmenter: Arc<FakeSegmenter>, max_upload_bytes: usize) -> Arc<AppState> {
    let mut config = AppConfig::default();
    config.upstream.api_key = "app-test-key".to_string();
    config.segmentation.max_upload_bytes = max_upload_bytes;
    let transport = HttpTransport::new(&config.server).expect("transport");
    let prepared = PreparedUpstream::new(&config.upstream).expect("prepared upstream");
    let upstream = UpstreamClient::new(transport, prepared);
    Arc::new(AppState::new(config, upstream, segmenter))
}

fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/remove-background")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("build request")
}

async fn read_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body")
}

#[tokio::test]
async fn test_upload_is_segmented_and_returned_as_png() {
    let segmenter = Arc::new(FakeSegmenter::default());
    let state = build_state(Arc::clone(&segmenter));

    let response = dispatch_request(
        state,
        Arc::<str>::from(""),
        upload_request(multipart_body("file", "cat.jpg", b"jpeg-bytes")),
    )
    .await
    .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body = read_bytes(response).await;
    assert!(body.starts_with(b"\x89PNG"));
    assert!(body.ends_with(b"jpeg-bytes"));

    let calls = segmenter.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Bytes::from_static(b"jpeg-bytes"));
    assert_eq!(calls[0].1.as_deref(), Some("cat.jpg"));
}

#[tokio::test]
async fn test_missing_file_field_is_500() {
    let segmenter = Arc::new(FakeSegmenter::default());
    let state = build_state(Arc::clone(&segmenter));

    let response = dispatch_request(
        state,
        Arc::<str>::from(""),
        upload_request(multipart_body("image", "cat.jpg", b"jpeg-bytes")),
    )
    .await
    .expect("dispatch");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = serde_json::from_slice(&read_bytes(response).await).expect("json");
    assert_eq!(payload["event"], "error");
    assert!(payload["message"]
        .as_str()
        .expect("message")
        .contains("missing multipart field 'file'"));
    assert!(segmenter.calls.lock().is_empty());
}

#[tokio::test]
async fn test_empty_upload_is_500() {
    let segmenter = Arc::new(FakeSegmenter::default());
    let response = dispatch_request(
        build_state(Arc::clone(&segmenter)),
        Arc::<str>::from(""),
        upload_request(multipart_body("file", "empty.png", b"")),
    )
    .await
    .expect("dispatch");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(segmenter.calls.lock().is_empty());
}

#[tokio::test]
async fn test_segmenter_failure_is_500_with_description() {
    let segmenter = Arc::new(FakeSegmenter {
        fail: true,
        ..FakeSegmenter::default()
    });
    let response = dispatch_request(
        build_state(segmenter),
        Arc::<str>::from(""),
        upload_request(multipart_body("file", "cat.jpg", b"jpeg-bytes")),
    )
    .await
    .expect("dispatch");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = serde_json::from_slice(&read_bytes(response).await).expect("json");
    assert_eq!(payload["message"], "Segmentation error: model crashed");
}

#[tokio::test]
async fn test_non_multipart_request_is_rejected() {
    let segmenter = Arc::new(FakeSegmenter::default());
    let request = Request::builder()
        .method("POST")
        .uri("/api/remove-background")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .expect("build request");
    let response = dispatch_request(build_state(segmenter), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_upload_larger_than_json_body_limit_is_accepted() {
    let segmenter = Arc::new(FakeSegmenter::default());
    let photo = vec![0x5a_u8; 3 * 1024 * 1024];
    let response = dispatch_request(
        build_state(Arc::clone(&segmenter)),
        Arc::<str>::from(""),
        upload_request(multipart_body("file", "phone.jpg", &photo)),
    )
    .await
    .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_bytes(response).await.len(), 8 + photo.len());
    assert_eq!(segmenter.calls.lock()[0].0.len(), photo.len());
}

#[tokio::test]
async fn test_upload_over_configured_limit_is_413() {
    let segmenter = Arc::new(FakeSegmenter::default());
    let response = dispatch_request(
        build_state_with_limit(Arc::clone(&segmenter), 1024),
        Arc::<str>::from(""),
        upload_request(multipart_body("file", "big.jpg", &[0x5a_u8; 4096])),
    )
    .await
    .expect("dispatch");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let payload: Value = serde_json::from_slice(&read_bytes(response).await).expect("json");
    assert_eq!(payload["event"], "error");
    assert_eq!(
        payload["message"],
        "Request body too large: upload limit is 1024 bytes"
    );
    assert!(segmenter.calls.lock().is_empty());
}
