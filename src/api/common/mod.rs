pub(crate) mod streaming;

use axum::response::Response;

pub(crate) const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";
pub(crate) const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization";
pub(crate) const CORS_MAX_AGE_SECS: &str = "86400";

/// Permissive CORS: any origin may read any response.
#[inline]
pub(crate) fn apply_allow_origin(response: &mut Response) {
    response
        .headers_mut()
        .entry(http::header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .or_insert(http::HeaderValue::from_static("*"));
}

#[inline]
pub(crate) fn apply_cors_headers(response: &mut Response) {
    apply_allow_origin(response);
    let headers = response.headers_mut();
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_METHODS,
        http::HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_HEADERS,
        http::HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
}

/// Answer a CORS preflight with an empty JSON object.
#[must_use]
pub(crate) fn preflight_response() -> Response {
    let mut response = Response::new(axum::body::Body::from("{}"));
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    apply_cors_headers(&mut response);
    response.headers_mut().insert(
        http::header::ACCESS_CONTROL_MAX_AGE,
        http::HeaderValue::from_static(CORS_MAX_AGE_SECS),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_headers() {
        let response = preflight_response();
        assert_eq!(response.status(), http::StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "GET, POST, OPTIONS");
        assert_eq!(
            headers["access-control-allow-headers"],
            "Content-Type, Authorization"
        );
        assert_eq!(headers["access-control-max-age"], "86400");
    }

    #[test]
    fn test_allow_origin_keeps_existing_value() {
        let mut response = Response::new(axum::body::Body::empty());
        response.headers_mut().insert(
            http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
            http::HeaderValue::from_static("https://app.example"),
        );
        apply_allow_origin(&mut response);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://app.example"
        );
    }
}
