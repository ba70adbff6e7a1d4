use crate::config::UpstreamConfig;
use crate::error::RelayError;

/// Precomputed backend URLs and headers, built once at startup.
#[derive(Debug, Clone)]
pub struct PreparedUpstream {
    base_url: url::Url,
    chat_messages_url: url::Url,
    json_headers: http::HeaderMap,
    stream_headers: http::HeaderMap,
}

impl PreparedUpstream {
    /// Parse the configured base URL and precompute headers.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the base URL is not an absolute
    /// http(s) URL or the API key cannot be used as a header value.
    pub fn new(upstream: &UpstreamConfig) -> Result<Self, RelayError> {
        let base_url = parse_base_url(&upstream.base_url)?;
        let chat_messages_url = join_segments(&base_url, &["chat-messages"])?;
        let json_headers = build_json_headers(&upstream.api_key)?;

        let mut stream_headers = json_headers.clone();
        stream_headers.insert(
            http::header::ACCEPT,
            http::HeaderValue::from_static("text/event-stream"),
        );

        Ok(Self {
            base_url,
            chat_messages_url,
            json_headers,
            stream_headers,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    /// `{base}/chat-messages`.
    #[must_use]
    pub fn chat_messages_url(&self) -> &url::Url {
        &self.chat_messages_url
    }

    /// `{base}/chat-messages/{task_id}/stop`, with `task_id` encoded as one path segment.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for an empty task id.
    pub fn stop_url(&self, task_id: &str) -> Result<url::Url, RelayError> {
        if task_id.is_empty() {
            return Err(RelayError::InvalidRequest("task id is empty".to_string()));
        }
        join_segments(&self.base_url, &["chat-messages", task_id, "stop"])
    }

    /// Auth and JSON content-type headers for non-streaming calls.
    #[must_use]
    pub fn json_headers(&self) -> &http::HeaderMap {
        &self.json_headers
    }

    /// [`Self::json_headers`] plus `Accept: text/event-stream`.
    #[must_use]
    pub fn stream_headers(&self) -> &http::HeaderMap {
        &self.stream_headers
    }
}

fn parse_base_url(raw: &str) -> Result<url::Url, RelayError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|err| RelayError::Config(format!("invalid upstream base_url '{raw}': {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.cannot_be_a_base() {
        return Err(RelayError::Config(format!(
            "upstream base_url must be an http(s) URL, got '{raw}'"
        )));
    }
    Ok(parsed)
}

fn join_segments(base: &url::Url, segments: &[&str]) -> Result<url::Url, RelayError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| RelayError::Config(format!("'{base}' cannot be a base URL")))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    url.set_query(None);
    Ok(url)
}

fn build_json_headers(api_key: &str) -> Result<http::HeaderMap, RelayError> {
    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    let mut auth = http::HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
        .map_err(|_| RelayError::Config("api_key contains invalid header characters".into()))?;
    auth.set_sensitive(true);
    headers.insert(http::header::AUTHORIZATION, auth);
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_upstream(base_url: &str) -> UpstreamConfig {
        UpstreamConfig {
            base_url: base_url.to_string(),
            api_key: "app-test-key".to_string(),
        }
    }

    #[test]
    fn test_chat_messages_url_with_and_without_trailing_slash() {
        for base in ["https://api.dify.ai/v1", "https://api.dify.ai/v1/"] {
            let prepared = PreparedUpstream::new(&make_upstream(base)).expect("valid");
            assert_eq!(
                prepared.chat_messages_url().as_str(),
                "https://api.dify.ai/v1/chat-messages"
            );
        }
    }

    #[test]
    fn test_stop_url_encodes_task_id_as_one_segment() {
        let prepared = PreparedUpstream::new(&make_upstream("http://127.0.0.1:9000/v1")).unwrap();
        assert_eq!(
            prepared.stop_url("task-123").unwrap().as_str(),
            "http://127.0.0.1:9000/v1/chat-messages/task-123/stop"
        );
        assert_eq!(
            prepared.stop_url("a/b c").unwrap().as_str(),
            "http://127.0.0.1:9000/v1/chat-messages/a%2Fb%20c/stop"
        );
        assert!(prepared.stop_url("").is_err());
    }

    #[test]
    fn test_bare_host_base_url() {
        let prepared = PreparedUpstream::new(&make_upstream("http://localhost:8080")).unwrap();
        assert_eq!(
            prepared.chat_messages_url().as_str(),
            "http://localhost:8080/chat-messages"
        );
    }

    #[test]
    fn test_headers() {
        let prepared = PreparedUpstream::new(&make_upstream("https://api.dify.ai/v1")).unwrap();
        let json = prepared.json_headers();
        assert_eq!(json.get("authorization").unwrap(), "Bearer app-test-key");
        assert!(json.get("authorization").unwrap().is_sensitive());
        assert_eq!(json.get("content-type").unwrap(), "application/json");
        assert!(json.get("accept").is_none());
        assert_eq!(
            prepared.stream_headers().get("accept").unwrap(),
            "text/event-stream"
        );
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        assert!(PreparedUpstream::new(&make_upstream("ftp://example.com")).is_err());
        assert!(PreparedUpstream::new(&make_upstream("not a url")).is_err());
    }
}
