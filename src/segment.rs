//! Background removal, treated as an opaque `image bytes -> PNG bytes` routine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::SegmentationConfig;
use crate::error::RelayError;
use crate::transport::HttpTransport;
use crate::util::truncate_with_ellipsis;

const MAX_ERROR_BODY_BYTES: usize = 500;

/// Anything that can cut the background out of an uploaded image.
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Return the segmented image as PNG bytes.
    async fn segment(&self, image: Bytes, file_name: Option<&str>) -> Result<Bytes, RelayError>;

    /// Short label for logs and the health endpoint.
    fn name(&self) -> &'static str;
}

/// Posts the upload to an external segmentation service (e.g. a `rembg` server).
#[derive(Debug, Clone)]
pub struct HttpSegmenter {
    transport: HttpTransport,
    endpoint: url::Url,
    timeout: Duration,
}

impl HttpSegmenter {
    #[must_use]
    pub fn new(transport: HttpTransport, endpoint: url::Url, timeout: Duration) -> Self {
        Self {
            transport,
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl Segmenter for HttpSegmenter {
    async fn segment(&self, image: Bytes, file_name: Option<&str>) -> Result<Bytes, RelayError> {
        let part = reqwest::multipart::Part::bytes(image.to_vec())
            .file_name(file_name.unwrap_or("upload").to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .transport
            .send_multipart(&self.endpoint, form, self.timeout)
            .await
            .map_err(|err| RelayError::Segmentation(err.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| RelayError::Segmentation(format!("failed to read response: {err}")))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(RelayError::Segmentation(format!(
                "service returned {}: {}",
                status.as_u16(),
                truncate_with_ellipsis(text.trim(), MAX_ERROR_BODY_BYTES)
            )));
        }
        if body.is_empty() {
            return Err(RelayError::Segmentation(
                "service returned an empty image".to_string(),
            ));
        }
        Ok(body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Stand-in used when no segmentation endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSegmenter;

#[async_trait]
impl Segmenter for DisabledSegmenter {
    async fn segment(&self, _image: Bytes, _file_name: Option<&str>) -> Result<Bytes, RelayError> {
        Err(RelayError::Segmentation(
            "background removal is not configured".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Pick the segmenter implementation for the given configuration.
///
/// # Errors
///
/// Returns [`RelayError::Config`] when the configured endpoint is not a valid URL.
pub fn build_segmenter(
    config: &SegmentationConfig,
    transport: &HttpTransport,
) -> Result<Arc<dyn Segmenter>, RelayError> {
    let Some(endpoint) = config
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(Arc::new(DisabledSegmenter));
    };
    let endpoint = url::Url::parse(endpoint).map_err(|err| {
        RelayError::Config(format!("invalid segmentation endpoint '{endpoint}': {err}"))
    })?;
    Ok(Arc::new(HttpSegmenter::new(
        transport.clone(),
        endpoint,
        Duration::from_secs(config.timeout),
    )))
}
