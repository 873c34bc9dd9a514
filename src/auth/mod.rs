//! Pre-shared key check for the outreach API.
//!
//! The key comes from `OUTREACH_API_PSK`. Staff clients send it as `x-api-key`
//! or as a bearer token. When no key is configured every request passes, which
//! is only meant for local development.
//!
//! The layer wraps the `/api` routes only. `/health` and the voice gateway's
//! `/api/webhooks/call-events` callback are merged in outside it, since the
//! gateway has no way to send our key.

use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;

/// Header carrying the outreach API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Middleware body; `expected_psk` is `Config::api_psk`.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let rejection = match presented_key(request.headers()) {
        Some(key) if keys_match(key, &expected) => None,
        Some(_) => Some("Invalid API key"),
        None => Some("Missing API key"),
    };

    match rejection {
        None => next.run(request).await,
        Some(reason) => {
            tracing::debug!(path = %request.uri().path(), reason, "Request rejected");
            AppError::Unauthorized(reason.to_string()).into_response()
        }
    }
}

/// The key a client presented: `x-api-key` wins over `Authorization: Bearer`.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        })
}

/// Constant-time comparison.
fn keys_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_keys_match() {
        assert!(keys_match("outreach-key", "outreach-key"));
        assert!(!keys_match("outreach-key", "outreach-kez"));
        assert!(!keys_match("short", "much-longer-key"));
    }

    #[test]
    fn test_presented_key_prefers_header_over_bearer() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_key(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-bearer"),
        );
        assert_eq!(presented_key(&headers), Some("from-bearer"));

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(presented_key(&headers), Some("from-header"));
    }

    #[test]
    fn test_basic_auth_is_not_a_key() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(presented_key(&headers), None);
    }
}
