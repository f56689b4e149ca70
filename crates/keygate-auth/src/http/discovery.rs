//! Discovery documents.
//!
//! - `GET /.well-known/openid-configuration` - server metadata (RFC 8414)
//! - `GET /.well-known/jwks.json` - public signing keys (RFC 7517)

use axum::{Json, extract::State, http::header, response::IntoResponse};
use serde::{Deserialize, Serialize};

use super::AuthState;
use crate::config::AuthConfig;
use crate::token::SigningAlgorithm;

/// Authorization server metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,
    pub jwks_uri: String,
    pub scopes_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub token_signing_alg_values_supported: Vec<String>,
}

impl ServerMetadata {
    #[must_use]
    pub fn new(config: &AuthConfig, algorithm: SigningAlgorithm) -> Self {
        let base = config.issuer.trim_end_matches('/');
        Self {
            issuer: config.issuer.clone(),
            authorization_endpoint: format!("{base}/oauth/authorize"),
            token_endpoint: format!("{base}/oauth/token"),
            registration_endpoint: format!("{base}/oauth/register"),
            introspection_endpoint: format!("{base}/oauth/introspect"),
            revocation_endpoint: format!("{base}/oauth/revoke"),
            jwks_uri: format!("{base}/.well-known/jwks.json"),
            scopes_supported: config.oauth.supported_scopes.clone(),
            response_types_supported: vec!["code".to_string()],
            grant_types_supported: config.oauth.grant_types.clone(),
            code_challenge_methods_supported: vec!["S256".to_string()],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic".to_string(),
                "client_secret_post".to_string(),
                "none".to_string(),
            ],
            subject_types_supported: vec!["public".to_string()],
            token_signing_alg_values_supported: vec![algorithm.as_str().to_string()],
        }
    }
}

/// Handler for `GET /.well-known/openid-configuration`.
pub async fn discovery_handler(State(state): State<AuthState>) -> impl IntoResponse {
    let metadata = ServerMetadata::new(&state.engine.config, state.engine.jwt.algorithm());
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(metadata),
    )
}

/// Handler for `GET /.well-known/jwks.json`.
///
/// HS256 deployments publish an empty key set.
pub async fn jwks_handler(State(state): State<AuthState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(state.engine.jwt.jwks()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_endpoints() {
        let mut config = AuthConfig::default();
        config.issuer = "https://id.example/".to_string();
        let metadata = ServerMetadata::new(&config, SigningAlgorithm::ES384);

        assert_eq!(metadata.token_endpoint, "https://id.example/oauth/token");
        assert_eq!(metadata.jwks_uri, "https://id.example/.well-known/jwks.json");
        assert_eq!(metadata.code_challenge_methods_supported, vec!["S256"]);
        assert_eq!(metadata.token_signing_alg_values_supported, vec!["ES384"]);
    }
}
