//! OAuth 2.0 token endpoint handler.
//!
//! Supported grant types:
//!
//! - `authorization_code` - Exchange an authorization code for tokens
//! - `refresh_token` - Refresh an access token
//!
//! # Example
//!
//! ```ignore
//! POST /oauth/token
//! Content-Type: application/x-www-form-urlencoded
//!
//! grant_type=authorization_code
//! &code=SplxlOBeZQQYbYS6WxSbIA
//! &redirect_uri=https://app.example.com/callback
//! &code_verifier=dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk
//! &client_id=kgc_0d9c...
//! ```

use axum::{
    Form, Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::AuthState;
use super::error::no_store_headers;
use super::extract::client_credentials;
use crate::oauth::CodeExchange;
use crate::{AuthError, AuthResult};

/// Token request form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenForm {
    #[serde(default)]
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Handler for `POST /oauth/token`.
///
/// Clients authenticate with HTTP Basic or with `client_id` (and
/// `client_secret` for confidential clients) in the body.
pub async fn token_handler(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> AuthResult<Response> {
    let credentials = client_credentials(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    )?;
    debug!(
        grant_type = %form.grant_type,
        client_id = %credentials.client_id,
        "Processing token request"
    );

    if !state.engine.grant_type_enabled(&form.grant_type) {
        return Err(AuthError::unsupported_grant_type(&form.grant_type));
    }

    let result = match form.grant_type.as_str() {
        "authorization_code" => {
            let exchange = CodeExchange {
                code: required(form.code, "code")?,
                redirect_uri: required(form.redirect_uri, "redirect_uri")?,
                code_verifier: form.code_verifier,
            };
            state
                .engine
                .authorization
                .exchange_code(&exchange, &credentials)
                .await
        }
        "refresh_token" => {
            let refresh_token = required(form.refresh_token, "refresh_token")?;
            state
                .engine
                .tokens
                .refresh_token_pair(&refresh_token, &credentials, form.scope.as_deref())
                .await
        }
        other => Err(AuthError::unsupported_grant_type(other)),
    };

    match result {
        Ok(response) => {
            info!(
                client_id = %credentials.client_id,
                grant_type = %form.grant_type,
                "Token issued"
            );
            Ok((no_store_headers(), Json(response)).into_response())
        }
        Err(e) => {
            warn!(
                client_id = %credentials.client_id,
                grant_type = %form.grant_type,
                error = %e,
                "Token request failed"
            );
            Err(e)
        }
    }
}

fn required(value: Option<String>, name: &str) -> AuthResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::invalid_request(format!("missing parameter: {name}")))
}
