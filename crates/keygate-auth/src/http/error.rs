//! Error responses.
//!
//! This module implements `IntoResponse` for `AuthError`, producing the
//! OAuth 2.0 error body (RFC 6749 §5.2):
//!
//! ```json
//! { "error": "invalid_grant", "error_description": "authorization code expired" }
//! ```

use axum::{
    Json,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::AuthError;
use crate::ratelimit::RateLimitDecision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// OAuth 2.0 error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub error_description: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_for(&self);

        let description = if self.is_server_error() {
            tracing::error!(error = %self, category = %self.category(), "Request failed");
            match self {
                AuthError::Storage { .. } => "service temporarily unavailable".to_string(),
                _ => "internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        let mut headers = no_store_headers();

        if status == StatusCode::UNAUTHORIZED {
            let scheme = if matches!(self, AuthError::InvalidClient { .. }) {
                "Basic"
            } else {
                "Bearer"
            };
            let value = format!(
                "{scheme} realm=\"keygate\", error=\"{}\", error_description=\"{}\"",
                self.error_code(),
                description.replace('"', "'")
            );
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        if let AuthError::RateLimited {
            retry_after,
            limit,
            reset_at,
        } = &self
        {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after.as_secs().max(1)));
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(*limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(*reset_at));
        }

        let body = ErrorBody {
            error: self.error_code(),
            error_description: description,
        };
        (status, headers, Json(body)).into_response()
    }
}

/// HTTP status for each error.
#[must_use]
pub fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidRequest { .. }
        | AuthError::InvalidGrant { .. }
        | AuthError::InvalidScope { .. }
        | AuthError::ChallengeExpired
        | AuthError::UnsupportedResponseType { .. }
        | AuthError::UnsupportedGrantType { .. } => StatusCode::BAD_REQUEST,
        AuthError::InvalidClient { .. }
        | AuthError::InvalidSignature
        | AuthError::InvalidToken { .. }
        | AuthError::TokenExpired
        | AuthError::TokenRevoked => StatusCode::UNAUTHORIZED,
        AuthError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        AuthError::AlreadyConsumed { .. } => StatusCode::CONFLICT,
        AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        AuthError::Storage { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `Cache-Control: no-store` and `Pragma: no-cache`, required on token
/// responses and applied to every response carrying secrets or errors.
#[must_use]
pub fn no_store_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

/// Adds `X-RateLimit-*` headers for an allowed request.
pub fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    if decision.limit == u64::MAX {
        return;
    }
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at.unix_timestamp()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&AuthError::invalid_grant("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&AuthError::invalid_client("x")), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&AuthError::InvalidSignature), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&AuthError::ChallengeExpired), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&AuthError::already_consumed("x")), StatusCode::CONFLICT);
        assert_eq!(status_for(&AuthError::unauthorized("x")), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&AuthError::storage("x")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(&AuthError::internal("x")), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rate_limited_headers() {
        let response = AuthError::RateLimited {
            retry_after: Duration::from_secs(50),
            limit: 5,
            reset_at: 1_767_268_860,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers[header::RETRY_AFTER], "50");
        assert_eq!(headers[X_RATELIMIT_LIMIT], "5");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[X_RATELIMIT_RESET], "1767268860");
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    }

    #[test]
    fn test_invalid_client_challenge_header() {
        let response = AuthError::invalid_client("unknown client").into_response();
        let value = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
        assert!(value.starts_with("Basic realm=\"keygate\""));
        assert!(value.contains("error=\"invalid_client\""));
    }

    #[test]
    fn test_internal_details_hidden() {
        let response = AuthError::internal("connection string leaked").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
