//! HTTP surface of the authentication engine.
//!
//! Every handler shares [`AuthState`] and returns `AuthResult<Response>`;
//! errors are rendered by the [`IntoResponse`](axum::response::IntoResponse)
//! implementation in [`error`].

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::engine::AuthEngine;

pub mod authorize;
pub mod challenge;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod introspect;
pub mod lnurl;
pub mod register;
pub mod revoke;
pub mod token;

pub use authorize::{AuthorizeQuery, authorize_handler};
pub use challenge::{
    ChallengeResponse, ChallengeStatusResponse, VerifyRequest, challenge_status_handler,
    create_challenge_handler, verify_challenge_handler,
};
pub use discovery::{ServerMetadata, discovery_handler, jwks_handler};
pub use extract::ClientAddr;
pub use introspect::{TokenActionForm, introspect_handler};
pub use lnurl::{LnurlCallback, LnurlStatus, lnurl_callback_handler};
pub use register::{register_handler, rotate_secret_handler};
pub use revoke::revoke_handler;
pub use token::{TokenForm, token_handler};

/// Shared state for the auth routes.
#[derive(Clone)]
pub struct AuthState {
    pub engine: Arc<AuthEngine>,
    /// Take the caller address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl AuthState {
    #[must_use]
    pub fn new(engine: Arc<AuthEngine>) -> Self {
        Self {
            engine,
            trust_forwarded_for: false,
        }
    }

    #[must_use]
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

/// Builds the auth routes with their state applied.
pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/auth/challenge", post(create_challenge_handler))
        .route("/auth/challenge/{session_id}", get(challenge_status_handler))
        .route("/auth/challenge/verify", post(verify_challenge_handler))
        .route("/auth/lnurl", get(lnurl_callback_handler))
        .route("/oauth/register", post(register_handler))
        .route("/oauth/clients/rotate-secret", post(rotate_secret_handler))
        .route("/oauth/authorize", get(authorize_handler))
        .route("/oauth/token", post(token_handler))
        .route("/oauth/introspect", post(introspect_handler))
        .route("/oauth/revoke", post(revoke_handler))
        .route("/.well-known/openid-configuration", get(discovery_handler))
        .route("/.well-known/jwks.json", get(jwks_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::config::AuthConfig;
    use crate::storage::MemoryStateStore;

    fn test_config() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.issuer = "https://id.example".to_string();
        config.signing.algorithm = "HS256".to_string();
        config.signing.secret = Some("0123456789abcdef0123456789abcdef".to_string());
        config
    }

    fn state_with(config: AuthConfig) -> AuthState {
        let engine = AuthEngine::build(config, Arc::new(MemoryStateStore::new()))
            .expect("engine builds");
        AuthState::new(Arc::new(engine))
    }

    fn app() -> Router {
        router(state_with(test_config()))
    }

    async fn challenge_from(app: &Router, forwarded_for: &str) -> StatusCode {
        app.clone()
            .oneshot(
                Request::post("/auth/challenge")
                    .header("x-forwarded-for", forwarded_for)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_challenge_endpoint_returns_k1() {
        let response = app()
            .oneshot(
                Request::post("/auth/challenge")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(error::X_RATELIMIT_REMAINING));
        let body = json_body(response).await;
        assert_eq!(body["k1"].as_str().unwrap().len(), 64);
        assert!(body["lnurl"].as_str().unwrap().contains("tag=login"));
    }

    #[tokio::test]
    async fn test_forwarded_for_ignored_by_default() {
        let mut config = test_config();
        config.rate_limiting.challenge = 2;
        config.rate_limiting.window = std::time::Duration::from_secs(3600);
        let app = router(state_with(config));

        assert_eq!(challenge_from(&app, "198.51.100.1").await, StatusCode::OK);
        assert_eq!(challenge_from(&app, "198.51.100.2").await, StatusCode::OK);
        // A fresh header value does not buy a fresh budget.
        assert_eq!(
            challenge_from(&app, "198.51.100.3").await,
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_forwarded_for_used_when_trusted() {
        let mut config = test_config();
        config.rate_limiting.challenge = 1;
        config.rate_limiting.window = std::time::Duration::from_secs(3600);
        let app = router(state_with(config).with_trust_forwarded_for(true));

        assert_eq!(challenge_from(&app, "198.51.100.1").await, StatusCode::OK);
        assert_eq!(challenge_from(&app, "198.51.100.2").await, StatusCode::OK);
        assert_eq!(
            challenge_from(&app, "198.51.100.1").await,
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_unknown_session_reports_not_found() {
        let response = app()
            .oneshot(
                Request::get("/auth/challenge/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "not_found");
    }

    #[tokio::test]
    async fn test_token_endpoint_rejects_unknown_grant() {
        let response = app()
            .oneshot(
                Request::post("/oauth/token")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("grant_type=password&client_id=abc"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        let body = json_body(response).await;
        assert_eq!(body["error"], "unsupported_grant_type");
    }

    #[tokio::test]
    async fn test_authorize_unknown_client_is_not_redirected() {
        let response = app()
            .oneshot(
                Request::get(
                    "/oauth/authorize?response_type=code&client_id=nope\
                     &redirect_uri=https%3A%2F%2Fevil.example%2Fcb&session_id=s",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[tokio::test]
    async fn test_discovery_advertises_s256_only() {
        let response = app()
            .oneshot(
                Request::get("/.well-known/openid-configuration")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["issuer"], "https://id.example");
        assert_eq!(body["code_challenge_methods_supported"][0], "S256");
    }
}
