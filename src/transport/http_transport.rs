use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::util::describe_error;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    connect_timeout: Duration,
    use_env_proxy: bool,
) -> Result<reqwest::Client, RelayError> {
    // No client-wide timeout: a streaming generation may legitimately run for minutes.
    // Bounded calls set a per-request timeout instead.
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none());

    if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Shared outbound HTTP client for the chat backend and the segmentation service.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Build the pooled client from server settings.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the TLS backend or client builder fails.
    pub fn new(config: &ServerConfig) -> Result<Self, RelayError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(config.connect_timeout),
            config.http_use_env_proxy,
        )?;
        Ok(Self {
            client,
            request_timeout: Duration::from_secs(config.timeout),
        })
    }

    /// Timeout applied by [`HttpTransport::send_request`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// POST a body and return the response as soon as headers arrive, leaving
    /// the body unread for streaming. No total timeout applies.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the request cannot be sent or no
    /// response headers are received.
    pub async fn send_stream(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        self.execute(url, headers, body, None).await
    }

    /// POST a body with the configured request timeout covering the whole exchange.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] on connect failure or timeout.
    pub async fn send_request(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        self.execute(url, headers, body, Some(self.request_timeout))
            .await
    }

    /// POST a multipart form with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] on connect failure or timeout.
    pub async fn send_multipart(
        &self,
        url: &url::Url,
        form: reqwest::multipart::Form,
        timeout: Duration,
    ) -> Result<reqwest::Response, RelayError> {
        self.client
            .post(url.clone())
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| RelayError::Transport(describe_error(&err)))
    }

    async fn execute(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, RelayError> {
        let mut request = reqwest::Request::new(http::Method::POST, url.clone());
        *request.headers_mut() = headers.clone();
        *request.body_mut() = Some(reqwest::Body::from(body));
        *request.timeout_mut() = timeout;

        self.client
            .execute(request)
            .await
            .map_err(|err| RelayError::Transport(describe_error(&err)))
    }
}
